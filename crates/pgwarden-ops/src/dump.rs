// ABOUTME: Logical dump manager: create, import, download, link, list and restore pg_dump archives.
// ABOUTME: Connection strings are parsed up front and their passwords only ever travel through the environment.

use std::path::{Path, PathBuf};
use std::time::Duration;

use pgwarden_core::{DumpRecord, NewDump, RecordId};
use pgwarden_store::RecordStore;
use percent_encoding::percent_decode_str;
use reqwest::Url;
use tracing::{debug, info};

use crate::context::{Context, key_file_name, object_key};
use crate::error::LifecycleError;
use crate::runner::{Invocation, run_checked};
use crate::source::{DumpSourceResolver, classify};

/// Lifetime of presigned dump links unless the caller asks otherwise.
pub const DEFAULT_LINK_TTL: Duration = Duration::from_secs(3600);

const DEFAULT_PORT: u16 = 5432;

/// A remote database to dump, parsed from a `postgres://` URL.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionTarget {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub database: String,
    pub password: Option<String>,
    redacted: String,
}

impl std::fmt::Debug for ConnectionTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.redacted)
    }
}

impl ConnectionTarget {
    pub fn parse(connection: &str) -> Result<Self, LifecycleError> {
        let invalid = |reason: &str| LifecycleError::InvalidConnection(reason.to_string());
        let url = Url::parse(connection).map_err(|e| invalid(&e.to_string()))?;

        if !matches!(url.scheme(), "postgres" | "postgresql") {
            return Err(invalid("expected a postgres:// or postgresql:// URL"));
        }
        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| invalid("missing host"))?
            .to_string();
        let database = decode(url.path().trim_start_matches('/'));
        if database.is_empty() {
            return Err(invalid("missing database name"));
        }

        let mut redacted = url.clone();
        if url.password().is_some() {
            // Only fails for URLs that cannot carry credentials, which were rejected above.
            let _ = redacted.set_password(Some("******"));
        }

        Ok(Self {
            host,
            port: url.port().unwrap_or(DEFAULT_PORT),
            user: decode(url.username()),
            database,
            password: url.password().map(decode),
            redacted: redacted.to_string(),
        })
    }

    /// The connection string with its password masked.
    pub fn redacted(&self) -> &str {
        &self.redacted
    }
}

fn decode(component: &str) -> String {
    percent_decode_str(component).decode_utf8_lossy().into_owned()
}

pub struct DumpManager<'a> {
    ctx: &'a Context,
}

impl<'a> DumpManager<'a> {
    pub fn new(ctx: &'a Context) -> Self {
        Self { ctx }
    }

    /// Dump the local database, or the one behind `connection`, and record it.
    pub fn create_dump<S: RecordStore>(
        &self,
        store: &mut S,
        connection: Option<&str>,
    ) -> Result<DumpRecord, LifecycleError> {
        let mut invocation = Invocation::new("pg_dump");
        match connection {
            None => invocation = invocation.args(["-d", self.ctx.settings.database.as_str()]),
            Some(connection) => {
                let target = ConnectionTarget::parse(connection)?;
                debug!(connection = %target.redacted(), "using connection string");
                invocation = invocation
                    .arg("-h")
                    .arg(&target.host)
                    .arg("-p")
                    .arg(target.port.to_string())
                    .arg("-U")
                    .arg(&target.user)
                    .arg("-d")
                    .arg(&target.database);
                if let Some(password) = &target.password {
                    invocation = invocation.env("PGPASSWORD", password);
                }
            }
        }

        let name = self.ctx.unique_name();
        let local = self.ctx.settings.tmp_dir.join(format!("{name}.dump"));
        let invocation = invocation
            .args([
                "-Fc",
                "-Z",
                "9",
                "-c",
                "-E",
                "UTF-8",
                "--no-owner",
                "--no-privileges",
                "--if-exists",
                "-f",
            ])
            .path_arg(&local);

        info!("dump in progress");
        let result = self.capture(store, &invocation, &name, &local);
        if self.ctx.fs.exists(&local) {
            self.ctx.discard(&local);
        }
        let record = result?;

        info!(
            id = record.id,
            elapsed_s = (record.completed_at - record.started_at).num_seconds(),
            "dump created"
        );
        Ok(record)
    }

    fn capture<S: RecordStore>(
        &self,
        store: &mut S,
        invocation: &Invocation,
        name: &str,
        local: &Path,
    ) -> Result<DumpRecord, LifecycleError> {
        let started_at = self.ctx.clock.now();
        run_checked(self.ctx.runner.as_ref(), invocation)?;
        let completed_at = self.ctx.clock.now();

        let artifact_path = object_key(&self.ctx.settings.dumps_prefix, &format!("{name}.dump"));
        debug!(key = %artifact_path, "uploading dump");
        self.ctx.storage.put(&artifact_path, local)?;

        debug!("updating internal state");
        let record = store.insert::<DumpRecord>(&NewDump {
            artifact_path,
            size_bytes: self.ctx.fs.file_size(local)?,
            started_at,
            completed_at,
        })?;
        Ok(record)
    }

    /// Upload an existing dump file and record it.
    pub fn import_dump<S: RecordStore>(
        &self,
        store: &mut S,
        file: &Path,
    ) -> Result<DumpRecord, LifecycleError> {
        if !self.ctx.fs.exists(file) {
            return Err(LifecycleError::NotFound(format!("file {}", file.display())));
        }

        let artifact_path = object_key(
            &self.ctx.settings.dumps_prefix,
            &format!("{}.dump", self.ctx.unique_name()),
        );
        info!(file = %file.display(), "importing dump");
        let started_at = self.ctx.clock.now();
        let size_bytes = self.ctx.storage.put(&artifact_path, file)?;
        let completed_at = self.ctx.clock.now();

        let record = store.insert::<DumpRecord>(&NewDump {
            artifact_path,
            size_bytes,
            started_at,
            completed_at,
        })?;
        info!(id = record.id, "dump imported");
        Ok(record)
    }

    fn stored_dump<S: RecordStore>(
        &self,
        store: &S,
        id: RecordId,
    ) -> Result<DumpRecord, LifecycleError> {
        let record = store
            .fetch_by_id::<DumpRecord>(id)?
            .ok_or_else(|| LifecycleError::NotFound(format!("dump {id}")))?;
        if !self.ctx.storage.exists(&record.artifact_path)? {
            return Err(LifecycleError::NotFound(format!(
                "dump file {}",
                record.artifact_path
            )));
        }
        Ok(record)
    }

    /// Copy a stored dump into `dest_dir`, returning the written path.
    pub fn download_dump<S: RecordStore>(
        &self,
        store: &S,
        id: RecordId,
        dest_dir: &Path,
    ) -> Result<PathBuf, LifecycleError> {
        let record = self.stored_dump(store, id)?;
        let dest = dest_dir.join(key_file_name(&record.artifact_path));
        if self.ctx.fs.exists(&dest) {
            return Err(LifecycleError::AlreadyExists(dest));
        }

        debug!(key = %record.artifact_path, dest = %dest.display(), "downloading dump");
        self.ctx.storage.get(&record.artifact_path, &dest)?;
        info!(id, path = %dest.display(), "dump downloaded");
        Ok(dest)
    }

    /// A temporary download link for a stored dump.
    pub fn link_dump<S: RecordStore>(
        &self,
        store: &S,
        id: RecordId,
        ttl: Duration,
    ) -> Result<String, LifecycleError> {
        let record = self.stored_dump(store, id)?;
        Ok(self.ctx.storage.presign(&record.artifact_path, ttl)?)
    }

    /// Every dump, oldest first.
    pub fn list_dumps<S: RecordStore>(&self, store: &S) -> Result<Vec<DumpRecord>, LifecycleError> {
        let mut dumps = store.fetch_all::<DumpRecord>()?;
        dumps.sort_by_key(|d| d.id);
        Ok(dumps)
    }

    /// Restore the configured database from a dump id, URL or local path.
    pub fn restore_dump<S: RecordStore>(
        &self,
        store: &S,
        source: &str,
    ) -> Result<(), LifecycleError> {
        let source = classify(source);
        let database = &self.ctx.settings.database;
        info!(%source, database = %database, "restoring, this may take a while");

        let mut dump = DumpSourceResolver::new(self.ctx).acquire(store, &source)?;

        debug!("running pg_restore");
        let result = run_checked(
            self.ctx.runner.as_ref(),
            &Invocation::new("pg_restore")
                .args(["--no-owner", "-d", database.as_str()])
                .path_arg(dump.path()),
        );
        dump.release();
        result?;

        info!(%source, database = %database, "database restored");
        Ok(())
    }
}
