// ABOUTME: Backup lineage manager: full vs. incremental decisions, capture, upload and restore.
// ABOUTME: Incremental backups are computed against the manifest of the most recently completed backup.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use pgwarden_core::{BackupRecord, NewBackup, RECOVERY_MARKER, RecordId, ValidationError};
use pgwarden_store::RecordStore;
use tracing::{debug, error, info};

use crate::context::{Context, object_key};
use crate::error::LifecycleError;
use crate::runner::{Invocation, run_checked};

/// Name of the manifest pg_basebackup writes into the captured directory.
pub const MANIFEST_FILE: &str = "backup_manifest";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackupOptions {
    /// Base the backup on the latest completed one when there is one.
    pub incremental: bool,
    /// Request an immediate checkpoint instead of waiting for the next one.
    pub fast: bool,
}

/// Explicit operator consent for destructive restores.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    Confirmed,
    Unconfirmed,
}

impl From<bool> for Confirmation {
    fn from(force: bool) -> Self {
        if force {
            Confirmation::Confirmed
        } else {
            Confirmation::Unconfirmed
        }
    }
}

pub struct BackupLineage<'a> {
    ctx: &'a Context,
}

impl<'a> BackupLineage<'a> {
    pub fn new(ctx: &'a Context) -> Self {
        Self { ctx }
    }

    /// Capture a backup, upload it with its manifest, and record it.
    ///
    /// An incremental request with no previous backup is downgraded to a
    /// full backup.
    pub fn create_backup<S: RecordStore>(
        &self,
        store: &mut S,
        options: BackupOptions,
    ) -> Result<BackupRecord, LifecycleError> {
        if options.incremental {
            info!("incremental backup in progress");
        } else {
            info!("full backup in progress");
        }

        let name = self.ctx.unique_name();
        let scratch = self.ctx.settings.tmp_dir.join(&name);
        self.ctx.fs.create_dir_all(&scratch)?;

        let result = self.capture(store, options, &name, &scratch);
        self.ctx.discard(&scratch);
        let record = result?;

        info!(
            id = record.id,
            parent_id = ?record.parent_id,
            elapsed_s = record.elapsed().num_seconds(),
            "backup created"
        );
        Ok(record)
    }

    fn capture<S: RecordStore>(
        &self,
        store: &mut S,
        options: BackupOptions,
        name: &str,
        scratch: &Path,
    ) -> Result<BackupRecord, LifecycleError> {
        let basis = if options.incremental {
            self.previous_manifest(store, scratch)?
        } else {
            None
        };

        let data_dir = scratch.join("data");
        let mut invocation = Invocation::new("pg_basebackup");
        if options.fast {
            invocation = invocation.args(["-c", "fast"]);
        } else {
            debug!("waiting for the next checkpoint before taking the backup");
        }
        invocation = invocation.arg("-D").path_arg(&data_dir).arg("-P");
        if let Some((_, manifest)) = &basis {
            invocation = invocation.arg("--incremental").path_arg(manifest);
        }

        let started_at = self.ctx.clock.now();
        run_checked(self.ctx.runner.as_ref(), &invocation)?;
        let completed_at = self.ctx.clock.now();

        debug!("compressing backup");
        self.ctx.fs.touch(&data_dir.join(RECOVERY_MARKER))?;
        let archive = scratch.join(format!("{name}.tar.gz"));
        run_checked(
            self.ctx.runner.as_ref(),
            &Invocation::new("tar")
                .arg("-zcf")
                .path_arg(&archive)
                .arg("-C")
                .path_arg(&data_dir)
                .arg("."),
        )?;

        let prefix = &self.ctx.settings.backups_prefix;
        let artifact_path = object_key(prefix, &format!("{name}.tar.gz"));
        let manifest_path = object_key(prefix, &format!("{name}.manifest"));

        debug!(key = %artifact_path, "uploading backup");
        self.ctx.storage.put(&artifact_path, &archive)?;
        self.ctx
            .storage
            .put(&manifest_path, &data_dir.join(MANIFEST_FILE))?;

        debug!("updating internal state");
        let record = store.insert::<BackupRecord>(&NewBackup {
            parent_id: basis.map(|(id, _)| id),
            artifact_path,
            manifest_path,
            size_bytes: self.ctx.fs.file_size(&archive)?,
            started_at,
            completed_at,
        })?;
        Ok(record)
    }

    /// The latest completed backup's id and a local copy of its manifest.
    fn previous_manifest<S: RecordStore>(
        &self,
        store: &S,
        scratch: &Path,
    ) -> Result<Option<(RecordId, PathBuf)>, LifecycleError> {
        debug!("looking for the last backup");
        let Some(previous) = store.fetch_latest_by::<BackupRecord>("completed_at")? else {
            info!("no previous backup found, falling back to a full backup");
            return Ok(None);
        };

        let local = scratch.join(format!("basis-{}.manifest", previous.id));
        debug!(id = previous.id, "downloading the last backup's manifest");
        self.ctx.storage.get(&previous.manifest_path, &local)?;
        Ok(Some((previous.id, local)))
    }

    /// Replace the data directory with the contents of a stored backup and
    /// mark it for recovery on the next boot.
    pub fn restore_backup<S: RecordStore>(
        &self,
        store: &S,
        id: RecordId,
        confirmation: Confirmation,
    ) -> Result<(), LifecycleError> {
        let record = store
            .fetch_by_id::<BackupRecord>(id)?
            .ok_or_else(|| LifecycleError::NotFound(format!("backup {id}")))?;

        if !self.ctx.storage.exists(&record.artifact_path)? {
            error!(
                id,
                key = %record.artifact_path,
                "backup is recorded but its artifact is missing from object storage"
            );
            return Err(LifecycleError::NotFound(format!(
                "backup artifact {}",
                record.artifact_path
            )));
        }

        let data_dir = &self.ctx.settings.data_dir;
        if confirmation != Confirmation::Confirmed {
            return Err(LifecycleError::Unconfirmed(format!(
                "restoring backup {id} erases everything in {}",
                data_dir.display()
            )));
        }

        info!(id, "restoring from backup");
        let archive = self.ctx.scratch_path(&format!("-backup-{id}.tar.gz"));
        debug!(key = %record.artifact_path, "downloading backup");
        self.ctx.storage.get(&record.artifact_path, &archive)?;

        let result = self.unpack(&archive, data_dir);
        self.ctx.discard(&archive);
        result?;

        info!(id, "backup is ready for recovery");
        Ok(())
    }

    fn unpack(&self, archive: &Path, data_dir: &Path) -> Result<(), LifecycleError> {
        debug!(data_dir = %data_dir.display(), "erasing the data directory");
        self.ctx.fs.create_dir_all(data_dir)?;
        self.ctx.fs.clear_dir(data_dir)?;

        debug!("extracting the backup");
        run_checked(
            self.ctx.runner.as_ref(),
            &Invocation::new("tar")
                .arg("-zxf")
                .path_arg(archive)
                .arg("-C")
                .path_arg(data_dir),
        )?;

        self.ctx.fs.touch(&data_dir.join(RECOVERY_MARKER))?;
        debug!("recovery signal created");
        Ok(())
    }

    /// Every backup, oldest first.
    pub fn list_backups<S: RecordStore>(&self, store: &S) -> Result<Vec<BackupRecord>, LifecycleError> {
        let mut backups = store.fetch_all::<BackupRecord>()?;
        backups.sort_by_key(|b| b.id);
        Ok(backups)
    }

    /// The backup `id` followed by each ancestor up to its full base backup.
    pub fn chain<S: RecordStore>(
        &self,
        store: &S,
        id: RecordId,
    ) -> Result<Vec<BackupRecord>, LifecycleError> {
        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        let mut next = Some(id);

        while let Some(current) = next {
            if !seen.insert(current) {
                return Err(ValidationError::Invariant {
                    collection: "backups",
                    reason: format!("lineage of backup {id} loops back to {current}"),
                }
                .into());
            }
            let record = store
                .fetch_by_id::<BackupRecord>(current)?
                .ok_or_else(|| LifecycleError::NotFound(format!("backup {current}")))?;
            next = record.parent_id;
            chain.push(record);
        }

        Ok(chain)
    }
}
