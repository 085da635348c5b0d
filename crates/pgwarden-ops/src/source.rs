// ABOUTME: Dump source resolution: classify a restore source, then acquire a local file for it.
// ABOUTME: Classification is pure; acquisition downloads when needed and hands back an idempotent release.

use std::fmt;
use std::path::{Path, PathBuf};

use pgwarden_core::DumpRecord;
use pgwarden_store::RecordStore;
use reqwest::Url;
use tracing::{debug, warn};

use crate::context::Context;
use crate::error::LifecycleError;
use crate::fetch::origin;
use crate::fs::LocalFs;

/// Where a dump to restore comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DumpSource {
    /// A dump recorded in the store, by id.
    StoreLookup(String),
    /// A dump published at an absolute URL.
    RemoteFetch(Url),
    /// A file already on the local filesystem.
    LocalPath(PathBuf),
}

impl fmt::Display for DumpSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DumpSource::StoreLookup(id) => write!(f, "dump {id}"),
            DumpSource::RemoteFetch(url) => write!(f, "dump at {}", origin(url)),
            DumpSource::LocalPath(path) => write!(f, "dump located at {}", path.display()),
        }
    }
}

/// Classify a source string. First match wins: all digits, then an
/// absolute URL, then a local path.
pub fn classify(source: &str) -> DumpSource {
    if !source.is_empty() && source.bytes().all(|b| b.is_ascii_digit()) {
        return DumpSource::StoreLookup(source.to_string());
    }
    debug!(source, "source is not a dump id");

    if let Ok(url) = Url::parse(source) {
        return DumpSource::RemoteFetch(url);
    }
    debug!(source, "source is not a url, assuming a local path");

    DumpSource::LocalPath(PathBuf::from(source))
}

/// A dump available as a local file for the duration of a restore.
///
/// Temporary downloads are deleted by `release` (or on drop); files that
/// were already on disk are never touched.
pub struct AcquiredDump<'a> {
    path: PathBuf,
    cleanup: Option<&'a dyn LocalFs>,
    released: bool,
}

impl<'a> AcquiredDump<'a> {
    fn temporary(path: PathBuf, fs: &'a dyn LocalFs) -> Self {
        Self {
            path,
            cleanup: Some(fs),
            released: false,
        }
    }

    fn borrowed(path: PathBuf) -> Self {
        Self {
            path,
            cleanup: None,
            released: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_temporary(&self) -> bool {
        self.cleanup.is_some()
    }

    /// Best-effort cleanup. Safe to call more than once; failures are
    /// logged and swallowed.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        match self.cleanup {
            Some(fs) => {
                debug!(path = %self.path.display(), "deleting temporary files");
                if let Err(e) = fs.remove_file(&self.path) {
                    warn!(
                        path = %self.path.display(),
                        error = %e,
                        "failed to delete temporary file, leaving it in place"
                    );
                }
            }
            None => debug!(
                path = %self.path.display(),
                "file existed before this command, leaving it in place"
            ),
        }
    }
}

impl Drop for AcquiredDump<'_> {
    fn drop(&mut self) {
        self.release();
    }
}

pub struct DumpSourceResolver<'a> {
    ctx: &'a Context,
}

impl<'a> DumpSourceResolver<'a> {
    pub fn new(ctx: &'a Context) -> Self {
        Self { ctx }
    }

    /// Make `source` available as a local file.
    pub fn acquire<S: RecordStore>(
        &self,
        store: &S,
        source: &DumpSource,
    ) -> Result<AcquiredDump<'a>, LifecycleError> {
        match source {
            DumpSource::StoreLookup(id) => self.from_store(store, id),
            DumpSource::RemoteFetch(url) => self.from_url(url),
            DumpSource::LocalPath(path) => {
                if !self.ctx.fs.exists(path) {
                    return Err(LifecycleError::NotFound(format!("file {}", path.display())));
                }
                debug!(path = %path.display(), "the dump is a file in the local filesystem");
                Ok(AcquiredDump::borrowed(path.clone()))
            }
        }
    }

    fn from_store<S: RecordStore>(
        &self,
        store: &S,
        id: &str,
    ) -> Result<AcquiredDump<'a>, LifecycleError> {
        let not_found = || LifecycleError::NotFound(format!("dump {id}"));
        let id = id.parse().map_err(|_| not_found())?;
        let record = store.fetch_by_id::<DumpRecord>(id)?.ok_or_else(not_found)?;

        if !self.ctx.storage.exists(&record.artifact_path)? {
            return Err(LifecycleError::NotFound(format!(
                "dump file {}",
                record.artifact_path
            )));
        }

        let local = self.ctx.scratch_path(".dump");
        debug!(key = %record.artifact_path, "downloading dump");
        if let Err(e) = self.ctx.storage.get(&record.artifact_path, &local) {
            self.discard_partial(&local);
            return Err(e.into());
        }
        Ok(AcquiredDump::temporary(local, self.ctx.fs.as_ref()))
    }

    fn from_url(&self, url: &Url) -> Result<AcquiredDump<'a>, LifecycleError> {
        let local = self.ctx.scratch_path(".dump");
        debug!(url = %origin(url), "downloading dump");
        if let Err(e) = self.ctx.fetcher.download(url, &local) {
            self.discard_partial(&local);
            return Err(e.into());
        }
        Ok(AcquiredDump::temporary(local, self.ctx.fs.as_ref()))
    }

    fn discard_partial(&self, path: &Path) {
        if self.ctx.fs.exists(path) {
            self.ctx.discard(path);
        }
    }
}
