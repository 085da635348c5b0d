// ABOUTME: Strongly typed records for backups, dumps, WAL archives and certificates.
// ABOUTME: Each record type carries its schema, its draft (pre-insert) shape, and its cross-field invariants.

use std::fmt::Debug;

use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::schema::{FieldKind, FieldSpec, Schema, ValidationError};

/// Store-allocated record identifier.
pub type RecordId = i64;

/// Length of a hex-encoded SHA-256 digest.
pub const CHECKSUM_LEN: usize = 64;

/// A persisted, immutable record type.
///
/// The store validates `Draft` values against `schema()` before allocating an
/// id, and validates every row it reads back the same way before handing out
/// a `Self`.
pub trait Record: Serialize + DeserializeOwned + Clone + Debug {
    /// The record without its id, as submitted for insertion.
    type Draft: Serialize + Debug;

    fn schema() -> &'static Schema;

    fn id(&self) -> RecordId;

    /// Cross-field invariants that a single field rule cannot express.
    fn check(&self) -> Result<(), ValidationError> {
        Ok(())
    }
}

/// Validate a draft and return its normalized columns.
pub fn encode_draft<R: Record>(draft: &R::Draft) -> Result<Map<String, Value>, ValidationError> {
    let schema = R::schema();
    let value = serde_json::to_value(draft).map_err(|e| ValidationError::Malformed {
        collection: schema.collection,
        reason: e.to_string(),
    })?;
    schema.validate_draft(&value)
}

/// Validate a full row read from (or about to be written to) a medium and
/// turn it into a typed record.
pub fn decode_row<R: Record>(row: &Map<String, Value>) -> Result<R, ValidationError> {
    let schema = R::schema();
    let normalized = schema.validate_row(row)?;
    let record: R = serde_json::from_value(Value::Object(normalized)).map_err(|e| {
        ValidationError::Malformed {
            collection: schema.collection,
            reason: e.to_string(),
        }
    })?;
    record.check()?;
    Ok(record)
}

fn ordered(
    collection: &'static str,
    earlier: (&'static str, DateTime<Utc>),
    later: (&'static str, DateTime<Utc>),
    strict: bool,
) -> Result<(), ValidationError> {
    let ok = if strict {
        later.1 > earlier.1
    } else {
        later.1 >= earlier.1
    };
    if ok {
        Ok(())
    } else {
        Err(ValidationError::Invariant {
            collection,
            reason: format!(
                "{} must be {} {}",
                later.0,
                if strict { "after" } else { "at or after" },
                earlier.0
            ),
        })
    }
}

// ---------------------------------------------------------------------------
// Backups
// ---------------------------------------------------------------------------

pub static BACKUP_SCHEMA: Schema = Schema {
    collection: "backups",
    fields: &[
        FieldSpec::new("id", FieldKind::PrimaryKey),
        FieldSpec::new(
            "parent_id",
            FieldKind::ForeignKey {
                references: "backups",
                nullable: true,
            },
        ),
        FieldSpec::new("artifact_path", FieldKind::AbsolutePath),
        FieldSpec::new("manifest_path", FieldKind::AbsolutePath),
        FieldSpec::new("size_bytes", FieldKind::Bytes),
        FieldSpec::new("started_at", FieldKind::Timestamp),
        FieldSpec::new("completed_at", FieldKind::Timestamp),
    ],
};

/// A physical base backup. `parent_id` links an incremental backup to the
/// backup whose manifest it was computed against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupRecord {
    pub id: RecordId,
    pub parent_id: Option<RecordId>,
    pub artifact_path: String,
    pub manifest_path: String,
    pub size_bytes: u64,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub started_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewBackup {
    pub parent_id: Option<RecordId>,
    pub artifact_path: String,
    pub manifest_path: String,
    pub size_bytes: u64,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub started_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub completed_at: DateTime<Utc>,
}

impl BackupRecord {
    pub fn is_incremental(&self) -> bool {
        self.parent_id.is_some()
    }

    pub fn elapsed(&self) -> Duration {
        self.completed_at - self.started_at
    }
}

impl Record for BackupRecord {
    type Draft = NewBackup;

    fn schema() -> &'static Schema {
        &BACKUP_SCHEMA
    }

    fn id(&self) -> RecordId {
        self.id
    }

    fn check(&self) -> Result<(), ValidationError> {
        if self.parent_id == Some(self.id) {
            return Err(ValidationError::Invariant {
                collection: BACKUP_SCHEMA.collection,
                reason: format!("backup {} cannot be its own parent", self.id),
            });
        }
        ordered(
            BACKUP_SCHEMA.collection,
            ("started_at", self.started_at),
            ("completed_at", self.completed_at),
            false,
        )
    }
}

// ---------------------------------------------------------------------------
// Dumps
// ---------------------------------------------------------------------------

pub static DUMP_SCHEMA: Schema = Schema {
    collection: "dumps",
    fields: &[
        FieldSpec::new("id", FieldKind::PrimaryKey),
        FieldSpec::new("artifact_path", FieldKind::AbsolutePath),
        FieldSpec::new("size_bytes", FieldKind::Bytes),
        FieldSpec::new("started_at", FieldKind::Timestamp),
        FieldSpec::new("completed_at", FieldKind::Timestamp),
    ],
};

/// A logical dump produced by pg_dump or imported from a file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DumpRecord {
    pub id: RecordId,
    pub artifact_path: String,
    pub size_bytes: u64,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub started_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewDump {
    pub artifact_path: String,
    pub size_bytes: u64,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub started_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub completed_at: DateTime<Utc>,
}

impl Record for DumpRecord {
    type Draft = NewDump;

    fn schema() -> &'static Schema {
        &DUMP_SCHEMA
    }

    fn id(&self) -> RecordId {
        self.id
    }

    fn check(&self) -> Result<(), ValidationError> {
        ordered(
            DUMP_SCHEMA.collection,
            ("started_at", self.started_at),
            ("completed_at", self.completed_at),
            false,
        )
    }
}

// ---------------------------------------------------------------------------
// WAL archives
// ---------------------------------------------------------------------------

pub static ARCHIVE_SCHEMA: Schema = Schema {
    collection: "wal_archives",
    fields: &[
        FieldSpec::new("id", FieldKind::PrimaryKey),
        FieldSpec::new("artifact_path", FieldKind::AbsolutePath),
        FieldSpec::new("size_bytes", FieldKind::Bytes),
        FieldSpec::new("archived_at", FieldKind::Timestamp),
    ],
};

/// A compressed WAL segment shipped to object storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveRecord {
    pub id: RecordId,
    pub artifact_path: String,
    pub size_bytes: u64,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub archived_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewArchive {
    pub artifact_path: String,
    pub size_bytes: u64,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub archived_at: DateTime<Utc>,
}

impl Record for ArchiveRecord {
    type Draft = NewArchive;

    fn schema() -> &'static Schema {
        &ARCHIVE_SCHEMA
    }

    fn id(&self) -> RecordId {
        self.id
    }
}

// ---------------------------------------------------------------------------
// Certificates
// ---------------------------------------------------------------------------

pub static CERTIFICATE_SCHEMA: Schema = Schema {
    collection: "certificates",
    fields: &[
        FieldSpec::new("id", FieldKind::PrimaryKey),
        FieldSpec::new("key_path", FieldKind::AbsolutePath),
        FieldSpec::new("cert_path", FieldKind::AbsolutePath),
        FieldSpec::new("ca_path", FieldKind::AbsolutePath),
        FieldSpec::new("checksum", FieldKind::FixedText(CHECKSUM_LEN)),
        FieldSpec::new("created_at", FieldKind::Timestamp),
        FieldSpec::new("expires_at", FieldKind::Timestamp),
    ],
};

/// Server TLS material stored in object storage. The checksum is the SHA-256
/// of the certificate file and identifies the material issued at `created_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateRecord {
    pub id: RecordId,
    pub key_path: String,
    pub cert_path: String,
    pub ca_path: String,
    pub checksum: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewCertificate {
    pub key_path: String,
    pub cert_path: String,
    pub ca_path: String,
    pub checksum: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub expires_at: DateTime<Utc>,
}

impl CertificateRecord {
    /// Time left before expiry; negative once expired.
    pub fn time_to_expiry(&self, now: DateTime<Utc>) -> Duration {
        self.expires_at - now
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

impl Record for CertificateRecord {
    type Draft = NewCertificate;

    fn schema() -> &'static Schema {
        &CERTIFICATE_SCHEMA
    }

    fn id(&self) -> RecordId {
        self.id
    }

    fn check(&self) -> Result<(), ValidationError> {
        if !self.checksum.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ValidationError::InvalidField {
                collection: CERTIFICATE_SCHEMA.collection,
                field: "checksum",
                reason: "must be a hex digest".to_string(),
            });
        }
        ordered(
            CERTIFICATE_SCHEMA.collection,
            ("created_at", self.created_at),
            ("expires_at", self.expires_at),
            true,
        )
    }
}

/// Every schema the store needs to define before use.
pub fn all_schemas() -> [&'static Schema; 4] {
    [
        &BACKUP_SCHEMA,
        &DUMP_SCHEMA,
        &ARCHIVE_SCHEMA,
        &CERTIFICATE_SCHEMA,
    ]
}
