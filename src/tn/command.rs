//! Allowlisted external command execution: a hard contract, not a
//! best-effort filter. Every command run through this type is checked
//! against a fixed allowlist and every argument against the strict
//! character grammar in [`crate::security`] before the process is ever
//! spawned — commands are never built by shelling out through a
//! formatted string.

use crate::error::{Result, TnError};
use crate::security;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

const ALLOWLIST: &[&str] = &["ip", "tc", "bridge", "ping", "iperf3"];

#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub status_success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl std::fmt::Display for CommandOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.stdout)
    }
}

/// Bounds concurrent process spawns with a global semaphore (default
/// N=32) and enforces the allowlist/grammar/timeout contract.
pub struct CommandRunner {
    permits: Arc<Semaphore>,
    timeout: Duration,
}

impl CommandRunner {
    pub fn new(max_concurrent: usize, timeout_secs: u64) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_concurrent)),
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    /// Run an allowlisted command. `argv[0]` is the command name; every
    /// element (including argv[0]) is validated before anything is
    /// spawned. Fails closed on an unknown command or a disallowed
    /// character in any argument.
    pub async fn run(&self, argv: &[String]) -> Result<CommandOutput> {
        let (command, args) = argv
            .split_first()
            .ok_or_else(|| TnError::CommandNotAllowed {
                command: String::new(),
            })?;

        if !ALLOWLIST.contains(&command.as_str()) {
            return Err(TnError::CommandNotAllowed {
                command: security::sanitize_log(command),
            }
            .into());
        }

        for arg in args {
            security::sanitize_for_command(arg).map_err(|_| TnError::ArgumentRejected {
                argument: security::sanitize_log(arg),
            })?;
        }

        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| TnError::CommandFailed {
                command: command.clone(),
                reason: "semaphore closed".to_string(),
            })?;

        let mut cmd = tokio::process::Command::new(command);
        cmd.args(args);
        cmd.stdin(std::process::Stdio::null());
        cmd.stdout(std::process::Stdio::piped());
        cmd.stderr(std::process::Stdio::piped());

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| TnError::CommandTimeout {
                timeout_secs: self.timeout.as_secs(),
            })?
            .map_err(|e| TnError::CommandFailed {
                command: command.clone(),
                reason: e.to_string(),
            })?;

        crate::monitoring::TracingConfig::default().log_command_execution(
            command,
            args,
            output.status.success(),
        );

        Ok(CommandOutput {
            status_success: output.status.success(),
            stdout: security::sanitize_log(&String::from_utf8_lossy(&output.stdout)),
            stderr: security::sanitize_log(&String::from_utf8_lossy(&output.stderr)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disallowed_command_fails_closed() {
        let runner = CommandRunner::new(4, 5);
        let err = runner.run(&["rm".to_string(), "-rf".to_string(), "/".to_string()]).await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn shell_metacharacter_argument_fails_closed() {
        let runner = CommandRunner::new(4, 5);
        let err = runner
            .run(&["ip".to_string(), "link; rm -rf /".to_string()])
            .await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn empty_argv_fails_closed() {
        let runner = CommandRunner::new(4, 5);
        assert!(runner.run(&[]).await.is_err());
    }
}
