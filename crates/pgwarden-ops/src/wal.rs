// ABOUTME: WAL segment archiving: compress and ship segments, fetch them back for replay, and summarize.
// ABOUTME: Invoked by the server's archive and restore commands with the segment path and file name.

use std::path::Path;

use pgwarden_core::{ArchiveRecord, NewArchive};
use pgwarden_store::RecordStore;
use serde::Serialize;
use tracing::{debug, info};

use crate::context::{Context, object_key};
use crate::error::LifecycleError;
use crate::runner::{Invocation, run_checked};

/// Totals over every archived segment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WalStats {
    pub segments: usize,
    pub total_bytes: u64,
}

pub struct WalArchiver<'a> {
    ctx: &'a Context,
}

impl<'a> WalArchiver<'a> {
    pub fn new(ctx: &'a Context) -> Self {
        Self { ctx }
    }

    fn key(&self, filename: &str) -> String {
        object_key(
            &self.ctx.settings.archives_prefix,
            &format!("{filename}.tar.gz"),
        )
    }

    /// Compress the segment at `path` and store it as `filename`.
    pub fn archive<S: RecordStore>(
        &self,
        store: &mut S,
        path: &Path,
        filename: &str,
    ) -> Result<ArchiveRecord, LifecycleError> {
        if !self.ctx.fs.exists(path) {
            return Err(LifecycleError::NotFound(format!(
                "WAL file {}",
                path.display()
            )));
        }

        let mut tarball = path.as_os_str().to_owned();
        tarball.push(".tar.gz");
        let tarball = std::path::PathBuf::from(tarball);

        let result = self.ship(store, path, filename, &tarball);
        if self.ctx.fs.exists(&tarball) {
            self.ctx.discard(&tarball);
        }
        let record = result?;

        info!(filename, id = record.id, "WAL file archived");
        Ok(record)
    }

    fn ship<S: RecordStore>(
        &self,
        store: &mut S,
        path: &Path,
        filename: &str,
        tarball: &Path,
    ) -> Result<ArchiveRecord, LifecycleError> {
        let parent = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let member = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| LifecycleError::NotFound(format!("WAL file {}", path.display())))?;

        debug!("compressing file");
        run_checked(
            self.ctx.runner.as_ref(),
            &Invocation::new("tar")
                .arg("-zcf")
                .path_arg(tarball)
                .arg("-C")
                .path_arg(parent)
                .arg(member),
        )?;

        let artifact_path = self.key(filename);
        debug!(key = %artifact_path, "uploading WAL file");
        self.ctx.storage.put(&artifact_path, tarball)?;

        debug!("updating internal state");
        let record = store.insert::<ArchiveRecord>(&NewArchive {
            artifact_path,
            size_bytes: self.ctx.fs.file_size(tarball)?,
            archived_at: self.ctx.clock.now(),
        })?;
        Ok(record)
    }

    /// Fetch the segment archived as `filename` and place it at `path`.
    pub fn unarchive(&self, path: &Path, filename: &str) -> Result<(), LifecycleError> {
        let key = self.key(filename);
        if !self.ctx.storage.exists(&key)? {
            return Err(LifecycleError::NotFound(format!("WAL file {key}")));
        }

        let scratch = self.ctx.settings.tmp_dir.join(self.ctx.unique_name());
        self.ctx.fs.create_dir_all(&scratch)?;
        let result = self.fetch(&key, &scratch, path, filename);
        self.ctx.discard(&scratch);
        result?;

        info!(filename, "WAL file unarchived");
        Ok(())
    }

    fn fetch(&self, key: &str, scratch: &Path, path: &Path, filename: &str) -> Result<(), LifecycleError> {
        let tarball = scratch.join(format!("{filename}.tar.gz"));
        debug!(%key, "downloading WAL file");
        self.ctx.storage.get(key, &tarball)?;

        debug!("decompressing file");
        run_checked(
            self.ctx.runner.as_ref(),
            &Invocation::new("tar")
                .arg("-zxf")
                .path_arg(&tarball)
                .arg("-C")
                .path_arg(scratch),
        )?;

        let segment = scratch.join(filename);
        if !self.ctx.fs.exists(&segment) {
            return Err(LifecycleError::NotFound(format!(
                "segment {filename} inside {key}"
            )));
        }
        self.ctx.fs.rename(&segment, path)?;
        Ok(())
    }

    pub fn stats<S: RecordStore>(&self, store: &S) -> Result<WalStats, LifecycleError> {
        debug!("loading archives data");
        let archives = store.fetch_all::<ArchiveRecord>()?;
        Ok(WalStats {
            segments: archives.len(),
            total_bytes: archives.iter().map(|a| a.size_bytes).sum(),
        })
    }
}
