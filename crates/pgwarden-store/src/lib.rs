// ABOUTME: Append-only record store for pgwarden with two interchangeable backing media.
// ABOUTME: SQLite tables are the default; a revision-checked JSON document is the alternative.

pub mod document;
pub mod sqlite;

use std::path::Path;

use pgwarden_core::{Record, RecordId, Schema, ValidationError};
use thiserror::Error;

pub use document::DocumentStore;
pub use sqlite::SqliteStore;

/// Errors that can occur while reading or writing records.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("collection {0} has not been defined")]
    UndefinedCollection(&'static str),

    #[error("state was modified concurrently (expected revision {expected}, found {found})")]
    Conflict { expected: u64, found: u64 },

    #[error("unsupported state document version {0}")]
    UnsupportedVersion(u32),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A schema-validated, append-only store of typed records.
///
/// Ids are allocated by the store, strictly increasing per collection and
/// never reused. Every row is validated against its schema both when it is
/// written and when it is read back.
pub trait RecordStore {
    /// Register a collection. Defining the same schema twice is a no-op.
    fn define(&mut self, schema: &'static Schema) -> Result<(), StoreError>;

    /// Validate and persist a draft, returning the stored record with its id.
    /// On error nothing is written.
    fn insert<R: Record>(&mut self, draft: &R::Draft) -> Result<R, StoreError>;

    fn fetch_all<R: Record>(&self) -> Result<Vec<R>, StoreError>;

    fn fetch_by_id<R: Record>(&self, id: RecordId) -> Result<Option<R>, StoreError>;

    /// The record with the greatest value of `field`; ties go to the record
    /// inserted last.
    fn fetch_latest_by<R: Record>(&self, field: &str) -> Result<Option<R>, StoreError>;
}

/// Which medium backs the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Backend {
    #[default]
    Sqlite,
    Document,
}

impl Backend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::Sqlite => "sqlite",
            Backend::Document => "document",
        }
    }

    /// File name of the state file inside the state directory.
    pub fn file_name(&self) -> &'static str {
        match self {
            Backend::Sqlite => "db.sqlite",
            Backend::Document => "state.json",
        }
    }
}

impl std::str::FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sqlite" => Ok(Backend::Sqlite),
            "document" => Ok(Backend::Document),
            other => Err(format!("unknown state backend: {other}")),
        }
    }
}

/// Define every pgwarden collection on a freshly opened store.
pub fn define_all<S: RecordStore>(store: &mut S) -> Result<(), StoreError> {
    for schema in pgwarden_core::all_schemas() {
        store.define(schema)?;
    }
    Ok(())
}

/// Open the SQLite store at `path` with every collection defined.
pub fn open_sqlite(path: &Path) -> Result<SqliteStore, StoreError> {
    let mut store = SqliteStore::open(path)?;
    define_all(&mut store)?;
    Ok(store)
}

/// Open the document store at `path` with every collection defined.
pub fn open_document(path: &Path) -> Result<DocumentStore, StoreError> {
    let mut store = DocumentStore::open(path)?;
    define_all(&mut store)?;
    Ok(store)
}
