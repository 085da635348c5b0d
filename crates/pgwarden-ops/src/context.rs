// ABOUTME: Settings and collaborator handles passed to every lifecycle operation.
// ABOUTME: Also hands out unique scratch paths and builds object keys under the configured prefixes.

use std::path::{Path, PathBuf};

use ulid::Ulid;

use crate::clock::{Clock, SystemClock};
use crate::fetch::{HttpFetcher, ReqwestFetcher};
use crate::fs::{LocalFs, SystemFs};
use crate::runner::{ProcessRunner, SystemRunner};
use crate::storage::{FilesystemStorage, ObjectStorage};

/// Distinguished name fields for issued server certificates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsSubject {
    pub country: String,
    pub state: String,
    pub locality: String,
    pub organization: String,
    pub organizational_unit: String,
    pub common_name: String,
    pub email: String,
}

impl TlsSubject {
    /// The `-subj` argument for `openssl req`.
    pub fn to_subj(&self) -> String {
        format!(
            "/C={}/ST={}/L={}/O={}/OU={}/CN={}/emailAddress={}",
            self.country,
            self.state,
            self.locality,
            self.organization,
            self.organizational_unit,
            self.common_name,
            self.email
        )
    }
}

/// Everything an operation needs to know about the deployment.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Database dumped and restored by default.
    pub database: String,
    pub data_dir: PathBuf,
    pub certs_dir: PathBuf,
    pub tmp_dir: PathBuf,
    /// Local state file synced by `state push` and `state pull`.
    pub state_file: PathBuf,
    pub archives_prefix: String,
    pub backups_prefix: String,
    pub dumps_prefix: String,
    pub certs_prefix: String,
    pub cert_validity_days: u32,
    pub tls_subject: TlsSubject,
    /// Account that owns installed TLS files.
    pub service_account: String,
}

/// Collaborators plus settings, shared by the lifecycle managers.
pub struct Context {
    pub settings: Settings,
    pub storage: Box<dyn ObjectStorage>,
    pub runner: Box<dyn ProcessRunner>,
    pub fs: Box<dyn LocalFs>,
    pub clock: Box<dyn Clock>,
    pub fetcher: Box<dyn HttpFetcher>,
}

impl Context {
    /// Real collaborators: directory-tree object storage, system processes and filesystem.
    pub fn system(settings: Settings, storage: FilesystemStorage) -> Self {
        Self {
            settings,
            storage: Box::new(storage),
            runner: Box::new(SystemRunner),
            fs: Box::new(SystemFs),
            clock: Box::new(SystemClock),
            fetcher: Box::new(ReqwestFetcher),
        }
    }

    /// A fresh, unique name for scratch files and artifacts.
    pub fn unique_name(&self) -> String {
        Ulid::new().to_string().to_lowercase()
    }

    /// A unique path inside the scratch directory.
    pub fn scratch_path(&self, suffix: &str) -> PathBuf {
        self.settings
            .tmp_dir
            .join(format!("{}{suffix}", self.unique_name()))
    }

    /// Remove a scratch file or directory, downgrading failure to a warning.
    pub fn discard(&self, path: &Path) {
        let result = if path.is_dir() {
            self.fs.remove_dir_all(path)
        } else {
            self.fs.remove_file(path)
        };
        if let Err(e) = result {
            tracing::warn!(path = %path.display(), error = %e, "failed to delete temporary file, leaving it in place");
        }
    }
}

/// Join a prefix and a name into an object key.
pub fn object_key(prefix: &str, name: &str) -> String {
    format!(
        "{}/{}",
        prefix.trim_end_matches('/'),
        name.trim_start_matches('/')
    )
}

/// Final path component of an object key.
pub fn key_file_name(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}
