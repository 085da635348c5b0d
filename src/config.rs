// ABOUTME: Configuration loading and validation for the pgwarden binary.
// ABOUTME: Reads environment variables with defaults, and renders them for `config ls` with secrets redacted.

use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;

use pgwarden_ops::{FilesystemStorage, Settings, TlsSubject};
use pgwarden_store::Backend;
use thiserror::Error;

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} is required")]
    Missing(&'static str),

    #[error("{var} is invalid: {reason}")]
    Invalid { var: &'static str, reason: String },
}

const WAL_SIZES: [&str; 7] = ["16MB", "32MB", "64MB", "128MB", "256MB", "512MB", "1GB"];

/// Variables whose values `config ls` never prints in full.
const SECRETS: [&str; 2] = ["POSTGRES_PASSWORD", "PG_STORAGE_SECRET"];

/// Severity threshold, spelled the way the database server spells it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Notice,
    Warning,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Notice => "notice",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
        }
    }

    /// The equivalent `tracing` filter directive.
    pub fn directive(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info | LogLevel::Notice => "info",
            LogLevel::Warning => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "notice" => Ok(LogLevel::Notice),
            "warning" => Ok(LogLevel::Warning),
            "error" => Ok(LogLevel::Error),
            other => Err(format!(
                "expected one of debug, info, notice, warning, error; got {other:?}"
            )),
        }
    }
}

/// pgwarden configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub postgres_password: String,
    pub database: String,
    pub data_dir: PathBuf,
    pub max_connections: u32,
    pub shared_buffers: String,
    pub max_wal_size: String,
    pub storage_root: PathBuf,
    pub storage_secret: Option<String>,
    pub archives_prefix: String,
    pub backups_prefix: String,
    pub dumps_prefix: String,
    pub certs_prefix: String,
    pub cert_validity_days: u32,
    pub tls_subject: TlsSubject,
    pub log_level: LogLevel,
    pub api_port: u16,
    pub state_dir: PathBuf,
    pub state_backend: Backend,
    pub certs_dir: PathBuf,
    pub tmp_dir: PathBuf,
}

struct Vars<'a>(&'a HashMap<String, String>);

impl Vars<'_> {
    fn get(&self, var: &'static str) -> Option<&str> {
        self.0.get(var).map(String::as_str)
    }

    fn required(&self, var: &'static str) -> Result<String, ConfigError> {
        match self.get(var) {
            Some(value) if !value.is_empty() => Ok(value.to_string()),
            _ => Err(ConfigError::Missing(var)),
        }
    }

    fn or(&self, var: &'static str, default: &str) -> String {
        self.get(var).unwrap_or(default).to_string()
    }

    fn absolute(&self, var: &'static str, default: &str) -> Result<String, ConfigError> {
        let value = self.or(var, default);
        if !value.starts_with('/') {
            return Err(invalid(var, format!("expected an absolute path, got {value:?}")));
        }
        Ok(value)
    }

    fn number<T>(&self, var: &'static str, default: T, min: T, max: T) -> Result<T, ConfigError>
    where
        T: FromStr + PartialOrd + std::fmt::Display + Copy,
    {
        let Some(raw) = self.get(var) else {
            return Ok(default);
        };
        let value: T = raw
            .trim()
            .parse()
            .map_err(|_| invalid(var, format!("expected an integer, got {raw:?}")))?;
        if value < min || value > max {
            return Err(invalid(var, format!("must be between {min} and {max}")));
        }
        Ok(value)
    }
}

fn invalid(var: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        var,
        reason: reason.into(),
    }
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let vars: HashMap<String, String> = std::env::vars().collect();
        Self::from_vars(&vars)
    }

    /// Load configuration from an explicit variable map.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let v = Vars(vars);

        let postgres_password = v.required("POSTGRES_PASSWORD")?;
        let length = postgres_password.chars().count();
        if !(8..=64).contains(&length) {
            return Err(invalid("POSTGRES_PASSWORD", "must be 8 to 64 characters long"));
        }
        if postgres_password.chars().any(char::is_whitespace) {
            return Err(invalid("POSTGRES_PASSWORD", "must not contain whitespace"));
        }

        let max_wal_size = v.or("POSTGRES_MAX_WAL_SIZE", "64MB");
        if !WAL_SIZES.contains(&max_wal_size.as_str()) {
            return Err(invalid(
                "POSTGRES_MAX_WAL_SIZE",
                format!("expected one of {}", WAL_SIZES.join(", ")),
            ));
        }

        let email = v.or("TLS_SUBJECT_EMAIL", "");
        if !email.is_empty() && !email.contains('@') {
            return Err(invalid("TLS_SUBJECT_EMAIL", "expected an email address"));
        }

        Ok(Self {
            postgres_password,
            database: v.required("POSTGRES_DB")?,
            data_dir: v.absolute("POSTGRES_DATA_DIR", "/var/lib/postgresql/data")?.into(),
            max_connections: v.number("POSTGRES_MAX_CONNECTIONS", 100, 1, u32::MAX)?,
            shared_buffers: v.or("POSTGRES_SHARED_BUFFERS", "64MB"),
            max_wal_size,
            storage_root: v.absolute("PG_STORAGE_ROOT", "/var/lib/pg/storage")?.into(),
            storage_secret: v.get("PG_STORAGE_SECRET").filter(|s| !s.is_empty()).map(str::to_string),
            archives_prefix: v.absolute("PG_ARCHIVES_PREFIX", "/archives")?,
            backups_prefix: v.absolute("PG_BACKUPS_PREFIX", "/backups")?,
            dumps_prefix: v.absolute("PG_DUMPS_PREFIX", "/dumps")?,
            certs_prefix: v.absolute("PG_CERTS_PREFIX", "/certs")?,
            cert_validity_days: v.number("TLS_SUBJECT_EXPIRY_DAYS", 365, 90, 365)?,
            tls_subject: TlsSubject {
                country: v.or("TLS_SUBJECT_COUNTRY", ""),
                state: v.or("TLS_SUBJECT_STATE", ""),
                locality: v.or("TLS_SUBJECT_LOCALITY", ""),
                organization: v.or("TLS_SUBJECT_ORGANIZATION", ""),
                organizational_unit: v.or("TLS_SUBJECT_ORGANIZATIONAL_UNIT", ""),
                common_name: v.or("TLS_SUBJECT_COMMON_NAME", ""),
                email,
            },
            log_level: v
                .or("PG_LOG_LEVEL", "info")
                .parse()
                .map_err(|reason: String| invalid("PG_LOG_LEVEL", reason))?,
            api_port: v.number("PG_API_PORT", 3456, 80, u16::MAX)?,
            state_dir: v.absolute("PG_STATE_DIR", "/var/lib/pg")?.into(),
            state_backend: v
                .or("PG_STATE_BACKEND", "sqlite")
                .parse()
                .map_err(|reason: String| invalid("PG_STATE_BACKEND", reason))?,
            certs_dir: v.absolute("PG_CERTS_DIR", "/var/lib/pg/certs")?.into(),
            tmp_dir: v.absolute("PG_TMP_DIR", "/tmp")?.into(),
        })
    }

    /// Location of the record store for the configured backend.
    pub fn state_file(&self) -> PathBuf {
        self.state_dir.join(self.state_backend.file_name())
    }

    /// Settings handed to the lifecycle managers.
    pub fn settings(&self) -> Settings {
        Settings {
            database: self.database.clone(),
            data_dir: self.data_dir.clone(),
            certs_dir: self.certs_dir.clone(),
            tmp_dir: self.tmp_dir.clone(),
            state_file: self.state_file(),
            archives_prefix: self.archives_prefix.clone(),
            backups_prefix: self.backups_prefix.clone(),
            dumps_prefix: self.dumps_prefix.clone(),
            certs_prefix: self.certs_prefix.clone(),
            cert_validity_days: self.cert_validity_days,
            tls_subject: self.tls_subject.clone(),
            // The server refuses key files owned by anyone else.
            service_account: "postgres".to_string(),
        }
    }

    pub fn storage(&self) -> FilesystemStorage {
        FilesystemStorage::new(&self.storage_root, self.storage_secret.clone())
    }

    /// Every setting as (variable, value), sorted by variable, secrets redacted.
    pub fn entries(&self) -> Vec<(&'static str, String)> {
        let path = |p: &PathBuf| p.display().to_string();
        let subject = &self.tls_subject;
        let mut entries = vec![
            ("POSTGRES_PASSWORD", self.postgres_password.clone()),
            ("POSTGRES_DB", self.database.clone()),
            ("POSTGRES_DATA_DIR", path(&self.data_dir)),
            ("POSTGRES_MAX_CONNECTIONS", self.max_connections.to_string()),
            ("POSTGRES_SHARED_BUFFERS", self.shared_buffers.clone()),
            ("POSTGRES_MAX_WAL_SIZE", self.max_wal_size.clone()),
            ("PG_STORAGE_ROOT", path(&self.storage_root)),
            (
                "PG_STORAGE_SECRET",
                self.storage_secret.clone().unwrap_or_default(),
            ),
            ("PG_ARCHIVES_PREFIX", self.archives_prefix.clone()),
            ("PG_BACKUPS_PREFIX", self.backups_prefix.clone()),
            ("PG_DUMPS_PREFIX", self.dumps_prefix.clone()),
            ("PG_CERTS_PREFIX", self.certs_prefix.clone()),
            ("TLS_SUBJECT_EXPIRY_DAYS", self.cert_validity_days.to_string()),
            ("TLS_SUBJECT_COUNTRY", subject.country.clone()),
            ("TLS_SUBJECT_STATE", subject.state.clone()),
            ("TLS_SUBJECT_LOCALITY", subject.locality.clone()),
            ("TLS_SUBJECT_ORGANIZATION", subject.organization.clone()),
            (
                "TLS_SUBJECT_ORGANIZATIONAL_UNIT",
                subject.organizational_unit.clone(),
            ),
            ("TLS_SUBJECT_COMMON_NAME", subject.common_name.clone()),
            ("TLS_SUBJECT_EMAIL", subject.email.clone()),
            ("PG_LOG_LEVEL", self.log_level.as_str().to_string()),
            ("PG_API_PORT", self.api_port.to_string()),
            ("PG_STATE_DIR", path(&self.state_dir)),
            ("PG_STATE_BACKEND", self.state_backend.as_str().to_string()),
            ("PG_CERTS_DIR", path(&self.certs_dir)),
            ("PG_TMP_DIR", path(&self.tmp_dir)),
        ];
        for (key, value) in &mut entries {
            if SECRETS.contains(&*key) && !value.is_empty() {
                *value = redact(value);
            }
        }
        entries.sort_by(|a, b| a.0.cmp(b.0));
        entries
    }
}

/// Mask a secret, keeping its first and last character when it is long
/// enough that doing so reveals little.
pub fn redact(secret: &str) -> String {
    const STARS: &str = "**********";
    let chars: Vec<char> = secret.chars().collect();
    match (chars.first(), chars.last()) {
        (Some(first), Some(last)) if chars.len() >= 10 => format!("{first}{STARS}{last}"),
        _ => STARS.to_string(),
    }
}
