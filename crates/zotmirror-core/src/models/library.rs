//! Library identity and storage namespace derivation

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Upper sanity bound on remote library ids
const MAX_LIBRARY_ID: i64 = 999_999_999;

/// Owner kind of a remote library
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LibraryKind {
    User,
    Group,
}

impl LibraryKind {
    /// Single-character tag used in the storage namespace
    pub const fn prefix(self) -> char {
        match self {
            Self::User => 'u',
            Self::Group => 'g',
        }
    }

    /// URL path segment used by the remote API
    pub const fn api_segment(self) -> &'static str {
        match self {
            Self::User => "users",
            Self::Group => "groups",
        }
    }
}

impl fmt::Display for LibraryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Group => write!(f, "group"),
        }
    }
}

/// A remote library to mirror, validated at construction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Library {
    kind: LibraryKind,
    id: i64,
}

impl Library {
    /// Create a library reference, rejecting out-of-range ids before any I/O
    pub fn new(kind: LibraryKind, id: i64) -> Result<Self> {
        if id <= 0 {
            return Err(Error::InvalidLibrary(format!(
                "{kind} library id {id} must be positive"
            )));
        }
        if id > MAX_LIBRARY_ID {
            return Err(Error::InvalidLibrary(format!(
                "{kind} library id {id} exceeds {MAX_LIBRARY_ID}"
            )));
        }
        Ok(Self { kind, id })
    }

    pub const fn kind(&self) -> LibraryKind {
        self.kind
    }

    pub const fn id(&self) -> i64 {
        self.id
    }

    /// Deterministic storage namespace, e.g. `zot_u_12345`.
    ///
    /// Safe as a SQL identifier root by construction: a fixed prefix, the
    /// lowercase kind tag, and a bounded decimal id (at most 15 characters).
    pub fn storage_namespace(&self) -> String {
        format!("zot_{}_{}", self.kind.prefix(), self.id)
    }
}

impl fmt::Display for Library {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} library {}", self.kind, self.id)
    }
}
