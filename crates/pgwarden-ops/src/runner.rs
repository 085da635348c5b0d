// ABOUTME: Process runner capability for external tools (pg_basebackup, pg_dump, tar, openssl, ...).
// ABOUTME: Results carry an explicit success flag, exit code and captured output instead of text matching.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::debug;

use crate::error::LifecycleError;

/// A single external command to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    /// Extra environment variables. Never logged, so secrets belong here.
    pub env: BTreeMap<String, String>,
    pub cwd: Option<PathBuf>,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            cwd: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn path_arg(self, path: &Path) -> Self {
        self.arg(path.to_string_lossy().into_owned())
    }

    pub fn args<I, A>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Value following `flag`, e.g. the path after `-D`.
    pub fn flag_value(&self, flag: &str) -> Option<&str> {
        self.args
            .iter()
            .position(|a| a == flag)
            .and_then(|i| self.args.get(i + 1))
            .map(String::as_str)
    }

    pub fn has_arg(&self, arg: &str) -> bool {
        self.args.iter().any(|a| a == arg)
    }

    /// Command line for logs. Environment values are left out.
    pub fn display(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    pub success: bool,
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn ok() -> Self {
        Self {
            success: true,
            exit_code: Some(0),
            stdout: String::new(),
            stderr: String::new(),
        }
    }

    pub fn failed(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            success: false,
            exit_code: Some(exit_code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }
}

/// Runs external commands. Blocking, no timeout, no retries.
pub trait ProcessRunner {
    /// Run to completion. `Err` means the process could not be started at all.
    fn run(&self, invocation: &Invocation) -> std::io::Result<ToolOutput>;
}

/// Runs commands with `std::process`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl ProcessRunner for SystemRunner {
    fn run(&self, invocation: &Invocation) -> std::io::Result<ToolOutput> {
        let mut command = Command::new(&invocation.program);
        command.args(&invocation.args).envs(&invocation.env);
        if let Some(cwd) = &invocation.cwd {
            command.current_dir(cwd);
        }

        let output = command.output()?;
        Ok(ToolOutput {
            success: output.status.success(),
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Run an invocation and turn a non-success outcome into `ToolFailure`.
pub fn run_checked(
    runner: &dyn ProcessRunner,
    invocation: &Invocation,
) -> Result<ToolOutput, LifecycleError> {
    debug!(command = %invocation.display(), "running");
    let output = runner
        .run(invocation)
        .map_err(|e| LifecycleError::ToolFailure {
            tool: invocation.program.clone(),
            exit_code: None,
            stderr: e.to_string(),
        })?;

    if output.success {
        Ok(output)
    } else {
        Err(LifecycleError::ToolFailure {
            tool: invocation.program.clone(),
            exit_code: output.exit_code,
            stderr: output.stderr.trim().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Canned(ToolOutput);

    impl ProcessRunner for Canned {
        fn run(&self, _invocation: &Invocation) -> std::io::Result<ToolOutput> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn display_omits_environment() {
        let invocation = Invocation::new("pg_dump")
            .args(["-h", "db.internal"])
            .env("PGPASSWORD", "hunter22");
        assert_eq!(invocation.display(), "pg_dump -h db.internal");
        assert_eq!(invocation.flag_value("-h"), Some("db.internal"));
        assert_eq!(invocation.flag_value("-p"), None);
    }

    #[test]
    fn failure_carries_exit_code_and_stderr() {
        let runner = Canned(ToolOutput::failed(3, "no space left\n"));
        let err = run_checked(&runner, &Invocation::new("tar")).unwrap_err();
        match err {
            LifecycleError::ToolFailure {
                tool,
                exit_code,
                stderr,
            } => {
                assert_eq!(tool, "tar");
                assert_eq!(exit_code, Some(3));
                assert_eq!(stderr, "no space left");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn missing_program_is_a_tool_failure() {
        let err = run_checked(
            &SystemRunner,
            &Invocation::new("pgwarden-definitely-not-installed"),
        )
        .unwrap_err();
        assert!(matches!(err, LifecycleError::ToolFailure { exit_code: None, .. }));
    }

    #[cfg(unix)]
    #[test]
    fn system_runner_captures_output() {
        let output = SystemRunner
            .run(&Invocation::new("sh").args(["-c", "echo out; echo err >&2; exit 4"]))
            .unwrap();
        assert!(!output.success);
        assert_eq!(output.exit_code, Some(4));
        assert_eq!(output.stdout.trim(), "out");
        assert_eq!(output.stderr.trim(), "err");
    }
}
