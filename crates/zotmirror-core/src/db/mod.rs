//! Database layer: connection management, storage materializer, sync ledger

mod connection;
pub mod ledger;
pub mod materializer;

pub use connection::Database;
pub use ledger::SyncHandle;
