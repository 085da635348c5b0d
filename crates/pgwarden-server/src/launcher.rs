// ABOUTME: Launches pgwarden subcommands as child processes on behalf of webhook handlers.
// ABOUTME: The trait seam lets router tests record launches instead of spawning processes.

use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("failed to start {command}: {source}")]
    Spawn {
        command: String,
        source: std::io::Error,
    },

    #[error("{command} exited with status {status}: {stderr}")]
    Failed {
        command: String,
        status: String,
        stderr: String,
    },
}

/// Runs a subcommand to completion.
#[async_trait]
pub trait CommandLauncher: Send + Sync {
    async fn launch(&self, args: &[&str]) -> Result<(), LaunchError>;
}

/// Launches the given program, normally the running pgwarden executable.
#[derive(Debug, Clone)]
pub struct SelfLauncher {
    program: PathBuf,
}

impl SelfLauncher {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// A launcher for the executable of the current process.
    pub fn current() -> std::io::Result<Self> {
        Ok(Self::new(std::env::current_exe()?))
    }
}

#[async_trait]
impl CommandLauncher for SelfLauncher {
    async fn launch(&self, args: &[&str]) -> Result<(), LaunchError> {
        let command = format!("{} {}", self.program.display(), args.join(" "));
        debug!(%command, "launching");

        let output = Command::new(&self.program)
            .args(args)
            .output()
            .await
            .map_err(|source| LaunchError::Spawn {
                command: command.clone(),
                source,
            })?;

        if output.status.success() {
            Ok(())
        } else {
            Err(LaunchError::Failed {
                command,
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_program_is_a_spawn_error() {
        let launcher = SelfLauncher::new("/nonexistent/pgwarden");
        let err = launcher.launch(&["backup", "new"]).await.unwrap_err();
        assert!(matches!(err, LaunchError::Spawn { .. }));
        assert!(err.to_string().contains("backup new"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn nonzero_exit_is_a_failure_with_stderr() {
        let launcher = SelfLauncher::new("sh");
        let err = launcher
            .launch(&["-c", "echo boom >&2; exit 3"])
            .await
            .unwrap_err();
        match err {
            LaunchError::Failed { stderr, .. } => assert_eq!(stderr, "boom"),
            other => panic!("unexpected {other:?}"),
        }
    }
}
