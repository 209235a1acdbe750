//! zotmirror CLI - mirror Zotero libraries into a local SQL database
//!
//! Thin wrapper over zotmirror-core: argument parsing, logging setup, and
//! per-library batch orchestration live here; all sync semantics live in the
//! core crate.

use std::env;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use thiserror::Error;
use zotmirror_core::db::Database;
use zotmirror_core::remote::{fetch_key_info, ZoteroClient, DEFAULT_API_BASE};
use zotmirror_core::schema_cache::SchemaCache;
use zotmirror_core::{Library, LibraryKind, SyncEngine, SyncOutcome};

#[derive(Parser)]
#[command(name = "zotmirror")]
#[command(about = "Mirror Zotero libraries into a local SQL database")]
#[command(version)]
struct Cli {
    /// Path to the local database file
    #[arg(long, value_name = "PATH", default_value = "zotmirror.db")]
    db_path: PathBuf,

    /// Path to the schema cache file
    #[arg(long, value_name = "PATH", default_value = "schema.json")]
    schema_cache: PathBuf,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sync one library
    Sync {
        /// User library id
        #[arg(short, long, conflicts_with = "group")]
        user: Option<i64>,
        /// Group library id
        #[arg(short, long)]
        group: Option<i64>,
        /// Zotero API key (or set ZOTERO_API_KEY)
        #[arg(short = 'k', long)]
        key: Option<String>,
        /// Refetch the remote schema unconditionally
        #[arg(long)]
        refresh_schema: bool,
    },
    /// Sync every library the API key can access
    SyncAll {
        /// Zotero API key (or set ZOTERO_API_KEY)
        #[arg(short = 'k', long)]
        key: Option<String>,
        /// Skip the key's user library, sync groups only
        #[arg(short, long)]
        skip_user: bool,
        /// Refetch the remote schema unconditionally
        #[arg(long)]
        refresh_schema: bool,
    },
    /// Show what an API key can access
    KeyInfo {
        /// Zotero API key (or set ZOTERO_API_KEY)
        #[arg(short = 'k', long)]
        key: Option<String>,
    },
}

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Core(#[from] zotmirror_core::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("No library given: pass --user or --group")]
    NoLibrary,
    #[error("No API key given: pass --key or set ZOTERO_API_KEY")]
    NoApiKey,
}

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    let Cli {
        db_path,
        schema_cache,
        verbose,
        command,
    } = Cli::parse();
    init_tracing(verbose);

    match command {
        Commands::Sync {
            user,
            group,
            key,
            refresh_schema,
        } => {
            let library = resolve_library(user, group)?;
            run_sync(
                &db_path,
                &schema_cache,
                library,
                resolve_api_key(key),
                refresh_schema,
            )
            .await
        }
        Commands::SyncAll {
            key,
            skip_user,
            refresh_schema,
        } => {
            run_sync_all(
                &db_path,
                &schema_cache,
                resolve_api_key(key),
                skip_user,
                refresh_schema,
            )
            .await
        }
        Commands::KeyInfo { key } => run_key_info(resolve_api_key(key)).await,
    }
}

fn init_tracing(verbose: bool) {
    let directive = if verbose {
        "zotmirror_core=debug"
    } else {
        "zotmirror_core=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(directive.parse().unwrap()),
        )
        .init();
}

fn resolve_library(user: Option<i64>, group: Option<i64>) -> Result<Library, CliError> {
    match (user, group) {
        (Some(id), None) => Ok(Library::new(LibraryKind::User, id)?),
        (None, Some(id)) => Ok(Library::new(LibraryKind::Group, id)?),
        _ => Err(CliError::NoLibrary),
    }
}

fn resolve_api_key(flag: Option<String>) -> Option<String> {
    flag.or_else(|| env::var("ZOTERO_API_KEY").ok())
        .filter(|key| !key.trim().is_empty())
}

fn print_outcome(library: Library, outcome: &SyncOutcome) {
    println!(
        "{}: {} inserted, {} updated, {} deleted (now at version {})",
        library.storage_namespace(),
        outcome.inserted,
        outcome.updated,
        outcome.deleted,
        outcome.final_version
    );
    if outcome.skipped_deletions > 0 {
        println!(
            "  {} stale deletion reports were skipped",
            outcome.skipped_deletions
        );
    }
}

async fn run_sync(
    db_path: &Path,
    schema_path: &Path,
    library: Library,
    api_key: Option<String>,
    refresh_schema: bool,
) -> Result<(), CliError> {
    let db = Database::open(db_path).await?;
    let http = reqwest::Client::new();
    let schema = SchemaCache::new(schema_path)
        .get(&http, refresh_schema)
        .await?;

    let engine = SyncEngine::new(&db, &schema);
    let remote = ZoteroClient::new(library, api_key)?;
    let outcome = engine.sync(&library, &remote).await?;
    print_outcome(library, &outcome);
    Ok(())
}

async fn run_sync_all(
    db_path: &Path,
    schema_path: &Path,
    api_key: Option<String>,
    skip_user: bool,
    refresh_schema: bool,
) -> Result<(), CliError> {
    let api_key = api_key.ok_or(CliError::NoApiKey)?;
    let http = reqwest::Client::new();
    let info = fetch_key_info(&http, DEFAULT_API_BASE, &api_key).await?;

    let mut libraries = Vec::new();
    if !skip_user && info.access.user_library() {
        libraries.push(Library::new(LibraryKind::User, info.user_id)?);
    }
    for group_id in info.access.group_ids() {
        libraries.push(Library::new(LibraryKind::Group, group_id)?);
    }
    if info.access.grants_all_groups() {
        eprintln!(
            "this key grants access to all of the user's groups; \
             only explicitly listed groups are synced, pass --group for the rest"
        );
    }
    if libraries.is_empty() {
        println!("nothing to sync for this API key");
        return Ok(());
    }

    let db = Database::open(db_path).await?;
    let schema = SchemaCache::new(schema_path)
        .get(&http, refresh_schema)
        .await?;
    let engine = SyncEngine::new(&db, &schema);

    // each library is an independent unit of failure: report and continue
    let mut failures = 0usize;
    for library in libraries {
        let remote = ZoteroClient::new(library, Some(api_key.clone()))?;
        match engine.sync(&library, &remote).await {
            Ok(outcome) => print_outcome(library, &outcome),
            Err(error) => {
                failures += 1;
                eprintln!("skipping {}: {error}", library.storage_namespace());
            }
        }
    }
    if failures > 0 {
        eprintln!("{failures} libraries failed to sync");
    }
    Ok(())
}

async fn run_key_info(api_key: Option<String>) -> Result<(), CliError> {
    let api_key = api_key.ok_or(CliError::NoApiKey)?;
    let http = reqwest::Client::new();
    let info = fetch_key_info(&http, DEFAULT_API_BASE, &api_key).await?;
    println!("{}", serde_json::to_string_pretty(&info)?);
    Ok(())
}
