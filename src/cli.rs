// ABOUTME: Command-line interface definition for the pgwarden binary.
// ABOUTME: One subcommand group per lifecycle area, parsed with clap derive.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// pgwarden - operational sidecar for PostgreSQL
#[derive(Parser, Debug)]
#[command(name = "pgwarden")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Starts the PostgreSQL server
    Start {
        /// The target timestamp to recover to (point-in-time recovery)
        #[arg(short = 't', long)]
        target_timestamp: Option<String>,

        /// Promote the recovered state instead of pausing at the target
        #[arg(long, requires = "target_timestamp")]
        promote: bool,

        /// Do not run the webhook listener alongside the server
        #[arg(long)]
        no_api: bool,
    },

    /// Backup management commands
    Backup {
        #[command(subcommand)]
        command: BackupCommand,
    },

    /// Logical dump management commands
    Dump {
        #[command(subcommand)]
        command: DumpCommand,
    },

    /// WAL archiving commands, invoked by the server
    Wal {
        #[command(subcommand)]
        command: WalCommand,
    },

    /// Server TLS certificate commands
    Certs {
        #[command(subcommand)]
        command: CertsCommand,
    },

    /// Internal state synchronization commands
    State {
        #[command(subcommand)]
        command: StateCommand,
    },

    /// Configuration commands
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[derive(Subcommand, Debug)]
pub enum BackupCommand {
    /// Creates a new backup
    New {
        /// Do not wait for the next checkpoint before taking the backup
        #[arg(short, long)]
        fast: bool,

        /// Only capture data changed since the last backup
        #[arg(short, long)]
        incremental: bool,
    },

    /// Lists all available backups
    Ls,

    /// Shows a backup and every backup it depends on
    Chain { id: i64 },

    /// Restores the data directory from a stored backup
    Restore {
        id: i64,

        /// Confirm erasing the current data directory
        #[arg(short, long)]
        force: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum DumpCommand {
    /// Creates a new dump file
    New {
        /// Connection string of the database to dump instead of the local one
        #[arg(short, long)]
        connection: Option<String>,
    },

    /// Uploads an existing dump file and records it
    Import { file: PathBuf },

    /// Lists all dumps available
    Ls,

    /// Downloads a dump into a local directory
    Download {
        id: i64,

        /// Directory to write the dump into
        #[arg(short, long, default_value = ".")]
        output_dir: PathBuf,
    },

    /// Generates a temporary download link for a dump
    Link {
        id: i64,

        /// Lifetime of the link in seconds
        #[arg(long, default_value_t = 3600)]
        ttl: u64,
    },

    /// Restores the database from a dump id, URL or local file
    Restore { source: String },
}

#[derive(Subcommand, Debug)]
pub enum WalCommand {
    /// Archives a WAL segment file
    Archive {
        /// Path to the WAL segment file
        #[arg(short, long)]
        path: PathBuf,

        /// The name the file is archived under
        #[arg(short, long)]
        filename: String,
    },

    /// Fetches an archived WAL segment file
    Unarchive {
        /// Where the WAL segment file should be placed
        #[arg(short, long)]
        path: PathBuf,

        /// The name the file was archived under
        #[arg(short, long)]
        filename: String,
    },

    /// Displays statistics about archived WAL segments
    Stats,
}

#[derive(Subcommand, Debug)]
pub enum CertsCommand {
    /// Installs the server TLS certificates, issuing them when needed
    Install,

    /// Issues new server TLS certificates
    Rotate,
}

#[derive(Subcommand, Debug)]
pub enum StateCommand {
    /// Uploads the internal state to object storage
    Push,

    /// Downloads the internal state from object storage
    Pull,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Lists all configuration values
    Ls,
}
