// ABOUTME: Error taxonomy shared by every lifecycle operation.
// ABOUTME: Lifts store, storage and download errors into validation, not-found and tool failures.

use std::path::PathBuf;

use pgwarden_core::ValidationError;
use pgwarden_store::StoreError;
use thiserror::Error;

use crate::fetch::FetchError;
use crate::storage::StorageError;

#[derive(Debug, Error)]
pub enum LifecycleError {
    /// A referenced record or artifact does not exist. Never retried.
    #[error("{0} not found")]
    NotFound(String),

    /// An external tool exited unsuccessfully.
    #[error("{tool} failed{}: {stderr}", exit_suffix(.exit_code))]
    ToolFailure {
        tool: String,
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error(transparent)]
    Validation(ValidationError),

    #[error("state store error: {0}")]
    Store(StoreError),

    #[error("object storage error: {0}")]
    Storage(StorageError),

    #[error("download failed: {0}")]
    Download(FetchError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A destructive operation was requested without confirmation.
    #[error("{0} requires confirmation (rerun with --force)")]
    Unconfirmed(String),

    #[error("invalid connection string: {0}")]
    InvalidConnection(String),

    #[error("{} already exists", .0.display())]
    AlreadyExists(PathBuf),
}

fn exit_suffix(exit_code: &Option<i32>) -> String {
    match exit_code {
        Some(code) => format!(" with exit code {code}"),
        None => String::new(),
    }
}

impl From<ValidationError> for LifecycleError {
    fn from(err: ValidationError) -> Self {
        LifecycleError::Validation(err)
    }
}

impl From<StoreError> for LifecycleError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Validation(err) => LifecycleError::Validation(err),
            other => LifecycleError::Store(other),
        }
    }
}

impl From<StorageError> for LifecycleError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(key) => LifecycleError::NotFound(key),
            other => LifecycleError::Storage(other),
        }
    }
}

impl From<FetchError> for LifecycleError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::NotFound(url) => LifecycleError::NotFound(url),
            other => LifecycleError::Download(other),
        }
    }
}
