// ABOUTME: Certificate lifecycle manager: reuse, issue or rotate server TLS material.
// ABOUTME: The record store is the source of truth and the local certs directory a checksum-keyed cache of it.

use std::path::{Path, PathBuf};

use chrono::Duration;
use pgwarden_core::{CertificateRecord, NewCertificate, ValidationError};
use pgwarden_store::RecordStore;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::context::{Context, object_key};
use crate::error::LifecycleError;
use crate::runner::{Invocation, run_checked};

/// Certificates expiring sooner than this are replaced.
pub const RENEWAL_THRESHOLD_DAYS: i64 = 7;

pub const KEY_FILE: &str = "server.key";
pub const CERT_FILE: &str = "server.crt";
pub const CA_FILE: &str = "root.crt";

const KEY_MODE: u32 = 0o400;
const CERT_MODE: u32 = 0o444;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallOutcome {
    /// The local certificate already matched the record; nothing was written.
    AlreadyCurrent,
    Installed,
}

/// Hex-encoded SHA-256 digest.
pub fn checksum(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Object key, partial file, installed file and mode of one certificate file.
type Staged<'k> = (&'k String, PathBuf, PathBuf, u32);

pub struct CertificateManager<'a> {
    ctx: &'a Context,
}

impl<'a> CertificateManager<'a> {
    pub fn new(ctx: &'a Context) -> Self {
        Self { ctx }
    }

    /// Where the installed files live.
    pub fn local_paths(&self) -> [PathBuf; 3] {
        let dir = &self.ctx.settings.certs_dir;
        [dir.join(KEY_FILE), dir.join(CERT_FILE), dir.join(CA_FILE)]
    }

    /// The certificate with the latest expiry, issuing a new one when there
    /// is none or it expires within the renewal threshold.
    pub fn resolve_certificate<S: RecordStore>(
        &self,
        store: &mut S,
    ) -> Result<CertificateRecord, LifecycleError> {
        let now = self.ctx.clock.now();
        match store.fetch_latest_by::<CertificateRecord>("expires_at")? {
            Some(current) if current.time_to_expiry(now) >= Duration::days(RENEWAL_THRESHOLD_DAYS) => {
                debug!(id = current.id, expires_at = %current.expires_at, "reusing certificate");
                Ok(current)
            }
            Some(current) => {
                info!(id = current.id, expires_at = %current.expires_at, "certificate expires soon, issuing a new one");
                self.issue(store)
            }
            None => {
                info!("no certificate found, issuing one");
                self.issue(store)
            }
        }
    }

    /// Issue a new certificate regardless of the current one.
    pub fn rotate_certificate<S: RecordStore>(
        &self,
        store: &mut S,
    ) -> Result<CertificateRecord, LifecycleError> {
        info!("rotating server certificates");
        self.issue(store)
    }

    fn issue<S: RecordStore>(&self, store: &mut S) -> Result<CertificateRecord, LifecycleError> {
        let name = self.ctx.unique_name();
        let scratch = self.ctx.settings.tmp_dir.join(&name);
        self.ctx.fs.create_dir_all(&scratch)?;

        let result = self.generate(store, &name, &scratch);
        self.ctx.discard(&scratch);
        let record = result?;

        info!(
            id = record.id,
            checksum = %record.checksum,
            expires_at = %record.expires_at,
            "certificate issued; restart the server to apply it"
        );
        Ok(record)
    }

    fn generate<S: RecordStore>(
        &self,
        store: &mut S,
        name: &str,
        scratch: &Path,
    ) -> Result<CertificateRecord, LifecycleError> {
        let settings = &self.ctx.settings;
        let key = scratch.join(KEY_FILE);
        let cert = scratch.join(CERT_FILE);
        let ca = scratch.join(CA_FILE);

        debug!("generating server certificates");
        let created_at = self.ctx.clock.now();
        run_checked(
            self.ctx.runner.as_ref(),
            &Invocation::new("openssl")
                .args(["req", "-noenc", "-new", "-x509", "-days"])
                .arg(settings.cert_validity_days.to_string())
                .arg("-keyout")
                .path_arg(&key)
                .arg("-out")
                .path_arg(&cert)
                .arg("-subj")
                .arg(settings.tls_subject.to_subj()),
        )?;
        let expires_at = created_at + Duration::days(i64::from(settings.cert_validity_days));

        self.ctx.fs.copy(&cert, &ca)?;
        let checksum = checksum(&self.ctx.fs.read(&cert)?);
        debug!(%checksum, "certificate checksum");

        let key_path = object_key(&settings.certs_prefix, &format!("{name}/{KEY_FILE}"));
        let cert_path = object_key(&settings.certs_prefix, &format!("{name}/{CERT_FILE}"));
        let ca_path = object_key(&settings.certs_prefix, &format!("{name}/{CA_FILE}"));

        debug!("uploading server certificates");
        self.ctx.storage.put(&key_path, &key)?;
        self.ctx.storage.put(&cert_path, &cert)?;
        self.ctx.storage.put(&ca_path, &ca)?;

        let record = store.insert::<CertificateRecord>(&NewCertificate {
            key_path,
            cert_path,
            ca_path,
            checksum,
            created_at,
            expires_at,
        })?;
        Ok(record)
    }

    /// Checksum of the installed certificate, `None` when there is none.
    pub fn local_checksum(&self) -> Result<Option<String>, LifecycleError> {
        let cert = self.ctx.settings.certs_dir.join(CERT_FILE);
        if !self.ctx.fs.exists(&cert) {
            return Ok(None);
        }
        Ok(Some(checksum(&self.ctx.fs.read(&cert)?)))
    }

    /// Make the local files match `record`, doing nothing when they already do.
    pub fn install_certificate(
        &self,
        record: &CertificateRecord,
    ) -> Result<InstallOutcome, LifecycleError> {
        if self.local_checksum()?.as_deref() == Some(record.checksum.as_str()) {
            debug!(id = record.id, "installed certificate is current");
            return Ok(InstallOutcome::AlreadyCurrent);
        }

        let dir = &self.ctx.settings.certs_dir;
        self.ctx.fs.create_dir_all(dir)?;

        debug!(id = record.id, "downloading server certificates");
        let staged = [
            (&record.key_path, KEY_FILE, KEY_MODE),
            (&record.cert_path, CERT_FILE, CERT_MODE),
            (&record.ca_path, CA_FILE, CERT_MODE),
        ]
        .into_iter()
        .map(|(key, file, mode)| {
            let partial = dir.join(format!(".{file}.{}.partial", self.ctx.unique_name()));
            (key, partial, dir.join(file), mode)
        })
        .collect::<Vec<_>>();

        if let Err(e) = self.stage(record, &staged) {
            self.discard_partials(&staged);
            return Err(e);
        }

        // Every file is ready before the first one replaces an installed file.
        for (i, (_, partial, target, _)) in staged.iter().enumerate() {
            if let Err(e) = self.ctx.fs.rename(partial, target) {
                self.discard_partials(&staged[i..]);
                return Err(e.into());
            }
        }

        info!(id = record.id, "server certificates installed");
        Ok(InstallOutcome::Installed)
    }

    /// Download every file next to its final location, verify the
    /// certificate against the record and apply modes and ownership, all
    /// before anything installed is replaced.
    fn stage(
        &self,
        record: &CertificateRecord,
        staged: &[Staged<'_>],
    ) -> Result<(), LifecycleError> {
        for (key, partial, _, _) in staged {
            self.ctx.storage.get(key, partial)?;
        }

        let (_, staged_cert, _, _) = &staged[1];
        let downloaded = checksum(&self.ctx.fs.read(staged_cert)?);
        if downloaded != record.checksum {
            return Err(ValidationError::Invariant {
                collection: "certificates",
                reason: format!(
                    "stored certificate {} has checksum {downloaded}, expected {}",
                    record.cert_path, record.checksum
                ),
            }
            .into());
        }

        debug!("setting permissions for server certificates");
        let account = &self.ctx.settings.service_account;
        for (_, partial, _, mode) in staged {
            self.ctx.fs.set_mode(partial, *mode)?;
            self.ctx.fs.set_owner(partial, account)?;
        }
        Ok(())
    }

    fn discard_partials(&self, staged: &[Staged<'_>]) {
        for (_, partial, _, _) in staged {
            if self.ctx.fs.exists(partial) {
                self.ctx.discard(partial);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_is_lowercase_sha256_hex() {
        assert_eq!(
            checksum(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
