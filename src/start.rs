// ABOUTME: Boots the database server with TLS, WAL archiving and the selected recovery plan.
// ABOUTME: Supervises the server process alongside the webhook listener and stops both together.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context as _, Result, bail};
use pgwarden_core::{RecoveryPlan, marker_present, select_recovery_mode};
use pgwarden_ops::certs::{CA_FILE, CERT_FILE, KEY_FILE};
use pgwarden_ops::{CertificateManager, Context};
use pgwarden_server::{AppState, SelfLauncher};
use pgwarden_store::RecordStore;
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::config::Config;

/// Entry script of the official postgres image.
const ENTRYPOINT: &str = "docker-entrypoint.sh";

#[derive(Debug, Clone, Default)]
pub struct StartOptions {
    pub target_timestamp: Option<String>,
    pub promote: bool,
    pub api: bool,
}

pub fn run<S: RecordStore>(
    store: &mut S,
    ctx: &Context,
    config: &Config,
    options: StartOptions,
) -> Result<()> {
    let certs = CertificateManager::new(ctx);
    let record = certs.resolve_certificate(store)?;
    certs.install_certificate(&record)?;

    let plan = select_recovery_mode(
        marker_present(&config.data_dir),
        options.target_timestamp.as_deref(),
        options.promote,
    );
    if plan.is_recovering() {
        info!("starting in recovery mode");
        if let (Some(target), Some(action)) = (&plan.target, plan.action) {
            info!(%target, %action, "point-in-time recovery requested");
        }
    } else if options.target_timestamp.is_some() {
        warn!("no recovery marker in the data directory, ignoring the recovery target");
    }

    let args = server_args(config, &plan);
    let runtime = tokio::runtime::Runtime::new().context("failed to start async runtime")?;
    runtime.block_on(supervise(args, options.api.then_some(config.api_port)))
}

/// Arguments for the server: tuning, archiving, TLS, then the recovery target.
pub fn server_args(config: &Config, plan: &RecoveryPlan) -> Vec<String> {
    let certs = &config.certs_dir;
    let mut settings: Vec<(String, String)> = [
        ("max_connections", config.max_connections.to_string()),
        ("shared_buffers", config.shared_buffers.clone()),
        ("wal_level", "replica".to_string()),
        ("summarize_wal", "on".to_string()),
        ("wal_summary_keep_time", "30d".to_string()),
        ("max_wal_size", config.max_wal_size.clone()),
        ("archive_mode", "on".to_string()),
        (
            "archive_command",
            "pgwarden wal archive -p %p -f %f".to_string(),
        ),
        (
            "restore_command",
            "pgwarden wal unarchive -p %p -f %f".to_string(),
        ),
        ("ssl", "on".to_string()),
        ("ssl_ca_file", certs.join(CA_FILE).display().to_string()),
        ("ssl_cert_file", certs.join(CERT_FILE).display().to_string()),
        ("ssl_key_file", certs.join(KEY_FILE).display().to_string()),
        ("ssl_crl_file", String::new()),
        ("ssl_ciphers", "HIGH:MEDIUM:+3DES:!aNULL".to_string()),
        ("ssl_prefer_server_ciphers", "on".to_string()),
    ]
    .into_iter()
    .map(|(name, value)| (name.to_string(), value))
    .collect();
    settings.extend(plan.server_settings());

    let mut args = vec!["postgres".to_string()];
    for (name, value) in settings {
        args.push("-c".to_string());
        args.push(format!("{name}={value}"));
    }
    args
}

async fn supervise(args: Vec<String>, api_port: Option<u16>) -> Result<()> {
    let mut server = Command::new(ENTRYPOINT)
        .args(&args)
        .spawn()
        .with_context(|| format!("failed to start {ENTRYPOINT}"))?;
    info!(pid = ?server.id(), "database server started");

    let (stop, stopped) = watch::channel(false);
    let listener = match api_port {
        Some(port) => {
            let state = Arc::new(AppState::new(Arc::new(SelfLauncher::current()?)));
            let addr = SocketAddr::from(([0, 0, 0, 0], port));
            let mut stopped = stopped.clone();
            Some(tokio::spawn(pgwarden_server::serve(addr, state, async move {
                let _ = stopped.changed().await;
            })))
        }
        None => None,
    };

    let status = tokio::select! {
        status = server.wait() => status?,
        _ = shutdown_signal() => {
            info!("shutdown requested, stopping the database server");
            interrupt(&server).await;
            server.wait().await?
        }
    };
    let _ = stop.send(true);

    if let Some(listener) = listener {
        listener.await??;
    }
    if !status.success() {
        bail!("database server exited with {status}");
    }
    info!("database server stopped");
    Ok(())
}

/// Ask the server for a fast shutdown.
async fn interrupt(server: &Child) {
    let Some(pid) = server.id() else {
        return;
    };
    let result = Command::new("kill")
        .args(["-INT", &pid.to_string()])
        .status()
        .await;
    if let Err(e) = result {
        warn!(pid, error = %e, "failed to signal the database server");
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config() -> Config {
        let vars: HashMap<String, String> = [
            ("POSTGRES_PASSWORD", "correct-horse"),
            ("POSTGRES_DB", "app"),
            ("PG_CERTS_DIR", "/etc/pg/certs"),
            ("POSTGRES_MAX_CONNECTIONS", "250"),
        ]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        Config::from_vars(&vars).unwrap()
    }

    fn settings(args: &[String]) -> Vec<&str> {
        args.iter()
            .skip(1)
            .filter(|a| a.as_str() != "-c")
            .map(String::as_str)
            .collect()
    }

    #[test]
    fn fresh_boot_wires_archiving_and_tls() {
        let plan = select_recovery_mode(false, Some("2024-05-01 12:00:00"), true);
        let args = server_args(&config(), &plan);

        assert_eq!(args[0], "postgres");
        let settings = settings(&args);
        assert!(settings.contains(&"max_connections=250"));
        assert!(settings.contains(&"archive_mode=on"));
        assert!(settings.contains(&"archive_command=pgwarden wal archive -p %p -f %f"));
        assert!(settings.contains(&"restore_command=pgwarden wal unarchive -p %p -f %f"));
        assert!(settings.contains(&"ssl_cert_file=/etc/pg/certs/server.crt"));
        assert!(settings.contains(&"ssl_key_file=/etc/pg/certs/server.key"));
        assert!(settings.contains(&"ssl_ca_file=/etc/pg/certs/root.crt"));
        assert!(settings.iter().all(|s| !s.starts_with("recovery_target")));
    }

    #[test]
    fn point_in_time_plan_appends_target_settings() {
        let plan = select_recovery_mode(true, Some("2024-05-01 12:00:00"), false);
        let args = server_args(&config(), &plan);

        let settings = settings(&args);
        let n = settings.len();
        assert_eq!(settings[n - 2], "recovery_target_time='2024-05-01 12:00:00'");
        assert_eq!(settings[n - 1], "recovery_target_action=pause");
    }
}
