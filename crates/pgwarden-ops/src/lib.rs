// ABOUTME: Lifecycle operations for pgwarden: backups, certificates, dumps, WAL archives and state sync.
// ABOUTME: Operations take the record store explicitly and reach the outside world only through collaborator traits.

pub mod backup;
pub mod certs;
pub mod clock;
pub mod context;
pub mod dump;
pub mod error;
pub mod fetch;
pub mod fs;
pub mod runner;
pub mod source;
pub mod state;
pub mod storage;
pub mod testing;
pub mod wal;

pub use backup::{BackupLineage, BackupOptions, Confirmation};
pub use certs::{CertificateManager, InstallOutcome};
pub use context::{Context, Settings, TlsSubject};
pub use dump::{ConnectionTarget, DEFAULT_LINK_TTL, DumpManager};
pub use error::LifecycleError;
pub use source::{AcquiredDump, DumpSource, DumpSourceResolver, classify};
pub use state::StateSync;
pub use storage::{FilesystemStorage, ObjectStorage, StorageError};
pub use wal::{WalArchiver, WalStats};
