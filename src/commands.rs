// ABOUTME: Dispatches parsed subcommands to the lifecycle managers.
// ABOUTME: Opens the configured record store only for commands that read or write records.

use anyhow::{Context as _, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use pgwarden_core::{BackupRecord, DumpRecord, human_size};
use pgwarden_ops::{
    BackupLineage, BackupOptions, CertificateManager, Context, DumpManager, StateSync,
    WalArchiver,
};
use pgwarden_store::{Backend, RecordStore, open_document, open_sqlite};
use std::time::Duration;
use tracing::debug;

use crate::cli::{
    BackupCommand, CertsCommand, Command, ConfigCommand, DumpCommand, StateCommand, WalCommand,
};
use crate::config::Config;
use crate::start::{self, StartOptions};

pub fn run(command: Command, config: &Config) -> Result<()> {
    let ctx = Context::system(config.settings(), config.storage());

    // These never touch the record store; opening it would create the state
    // file that `state pull` refuses to overwrite.
    match command {
        Command::Config {
            command: ConfigCommand::Ls,
        } => {
            print_config(config);
            return Ok(());
        }
        Command::State { command } => return sync_state(&ctx, command),
        Command::Wal {
            command: WalCommand::Unarchive { path, filename },
        } => {
            WalArchiver::new(&ctx).unarchive(&path, &filename)?;
            return Ok(());
        }
        _ => {}
    }

    let state_file = config.state_file();
    debug!(path = %state_file.display(), backend = config.state_backend.as_str(), "opening state");
    match config.state_backend {
        Backend::Sqlite => {
            let mut store = open_sqlite(&state_file)
                .with_context(|| format!("failed to open {}", state_file.display()))?;
            execute(&mut store, &ctx, config, command)
        }
        Backend::Document => {
            let mut store = open_document(&state_file)
                .with_context(|| format!("failed to open {}", state_file.display()))?;
            execute(&mut store, &ctx, config, command)
        }
    }
}

fn execute<S: RecordStore>(
    store: &mut S,
    ctx: &Context,
    config: &Config,
    command: Command,
) -> Result<()> {
    match command {
        Command::Start {
            target_timestamp,
            promote,
            no_api,
        } => start::run(
            store,
            ctx,
            config,
            StartOptions {
                target_timestamp,
                promote,
                api: !no_api,
            },
        )?,

        Command::Backup { command } => {
            let lineage = BackupLineage::new(ctx);
            match command {
                BackupCommand::New { fast, incremental } => {
                    lineage.create_backup(store, BackupOptions { incremental, fast })?;
                }
                BackupCommand::Ls => print_backups(&lineage.list_backups(store)?),
                BackupCommand::Chain { id } => print_backups(&lineage.chain(store, id)?),
                BackupCommand::Restore { id, force } => {
                    lineage.restore_backup(store, id, force.into())?;
                }
            }
        }

        Command::Dump { command } => {
            let dumps = DumpManager::new(ctx);
            match command {
                DumpCommand::New { connection } => {
                    dumps.create_dump(store, connection.as_deref())?;
                }
                DumpCommand::Import { file } => {
                    dumps.import_dump(store, &file)?;
                }
                DumpCommand::Ls => print_dumps(&dumps.list_dumps(store)?),
                DumpCommand::Download { id, output_dir } => {
                    let path = dumps.download_dump(store, id, &output_dir)?;
                    println!("{}", path.display());
                }
                DumpCommand::Link { id, ttl } => {
                    println!("{}", dumps.link_dump(store, id, Duration::from_secs(ttl))?);
                }
                DumpCommand::Restore { source } => dumps.restore_dump(store, &source)?,
            }
        }

        Command::Wal { command } => {
            let archiver = WalArchiver::new(ctx);
            match command {
                WalCommand::Archive { path, filename } => {
                    archiver.archive(store, &path, &filename)?;
                }
                WalCommand::Stats => {
                    let stats = archiver.stats(store)?;
                    println!("segments  {}", stats.segments);
                    println!("size      {}", human_size(stats.total_bytes));
                }
                WalCommand::Unarchive { path, filename } => archiver.unarchive(&path, &filename)?,
            }
        }

        Command::Certs { command } => {
            let certs = CertificateManager::new(ctx);
            match command {
                CertsCommand::Install => {
                    let record = certs.resolve_certificate(store)?;
                    certs.install_certificate(&record)?;
                }
                CertsCommand::Rotate => {
                    certs.rotate_certificate(store)?;
                }
            }
        }

        Command::State { command } => sync_state(ctx, command)?,
        Command::Config {
            command: ConfigCommand::Ls,
        } => print_config(config),
    }
    Ok(())
}

fn sync_state(ctx: &Context, command: StateCommand) -> Result<()> {
    let sync = StateSync::new(ctx);
    let key = match command {
        StateCommand::Push => sync.push()?,
        StateCommand::Pull => sync.pull()?,
    };
    println!("{key}");
    Ok(())
}

fn timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn print_backups(backups: &[BackupRecord]) {
    println!(
        "{:>5}  {:>6}  {:>10}  {:<20}  {:<20}  artifact",
        "id", "parent", "size", "started_at", "completed_at"
    );
    for backup in backups {
        let parent = backup
            .parent_id
            .map(|p| p.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:>5}  {:>6}  {:>10}  {:<20}  {:<20}  {}",
            backup.id,
            parent,
            human_size(backup.size_bytes),
            timestamp(&backup.started_at),
            timestamp(&backup.completed_at),
            backup.artifact_path
        );
    }
}

fn print_dumps(dumps: &[DumpRecord]) {
    println!(
        "{:>5}  {:>10}  {:<20}  {:<20}  artifact",
        "id", "size", "started_at", "completed_at"
    );
    for dump in dumps {
        println!(
            "{:>5}  {:>10}  {:<20}  {:<20}  {}",
            dump.id,
            human_size(dump.size_bytes),
            timestamp(&dump.started_at),
            timestamp(&dump.completed_at),
            dump.artifact_path
        );
    }
}

fn print_config(config: &Config) {
    let entries = config.entries();
    let width = entries.iter().map(|(k, _)| k.len()).max().unwrap_or(0);
    for (key, value) in entries {
        println!("{key:<width$}  {value}");
    }
}
