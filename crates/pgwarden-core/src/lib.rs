// ABOUTME: Core domain types for pgwarden: record schemas, typed records, and the recovery selector.
// ABOUTME: Everything here is pure; storage and process execution live in the store and ops crates.

pub mod record;
pub mod recovery;
pub mod schema;
pub mod size;

pub use record::{
    ARCHIVE_SCHEMA, ArchiveRecord, BACKUP_SCHEMA, BackupRecord, CERTIFICATE_SCHEMA, CHECKSUM_LEN,
    CertificateRecord, DUMP_SCHEMA, DumpRecord, NewArchive, NewBackup, NewCertificate, NewDump,
    Record, RecordId, all_schemas, decode_row, encode_draft,
};
pub use recovery::{
    BootMode, RECOVERY_MARKER, RecoveryAction, RecoveryPlan, marker_path, marker_present,
    select_recovery_mode,
};
pub use schema::{FieldKind, FieldSpec, Schema, ValidationError};
pub use size::human_size;
