//! Time-boxed host command execution. Arguments are passed as a vector;
//! nothing is interpolated into a shell.

use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::error::ProvisionError;

#[derive(Debug)]
pub(crate) struct CommandOutput {
    pub status_code: Option<i32>,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status_code == Some(0)
    }
}

/// Run `program args...`, optionally feeding `stdin`, bounded by `timeout`.
///
/// Spawn failures and timeouts are errors; a non-zero exit is returned to
/// the caller so it can decide what that exit code means.
pub(crate) async fn run(
    operation: &'static str,
    username: &str,
    program: &str,
    args: &[&str],
    stdin: Option<&str>,
    timeout: Duration,
) -> Result<CommandOutput, ProvisionError> {
    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let run = async {
        let mut child = command
            .spawn()
            .map_err(|e| ProvisionError::HostOperationFailed {
                operation,
                username: username.to_string(),
                reason: format!("failed to execute {program}: {e}"),
            })?;

        if let Some(input) = stdin
            && let Some(mut pipe) = child.stdin.take()
        {
            pipe.write_all(input.as_bytes())
                .await
                .map_err(|e| ProvisionError::HostOperationFailed {
                    operation,
                    username: username.to_string(),
                    reason: format!("failed to write stdin: {e}"),
                })?;
            // Close stdin so the child sees EOF.
            drop(pipe);
        }

        child
            .wait_with_output()
            .await
            .map_err(|e| ProvisionError::HostOperationFailed {
                operation,
                username: username.to_string(),
                reason: format!("failed waiting for {program}: {e}"),
            })
    };

    let output = tokio::time::timeout(timeout, run)
        .await
        .map_err(|_| ProvisionError::HostOperationTimeout { operation, timeout })??;

    Ok(CommandOutput {
        status_code: output.status.code(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    })
}

/// Run and treat any non-zero exit as a failure.
pub(crate) async fn run_checked(
    operation: &'static str,
    username: &str,
    program: &str,
    args: &[&str],
    stdin: Option<&str>,
    timeout: Duration,
) -> Result<(), ProvisionError> {
    let output = run(operation, username, program, args, stdin, timeout).await?;
    if output.success() {
        Ok(())
    } else {
        Err(ProvisionError::HostOperationFailed {
            operation,
            username: username.to_string(),
            reason: format!(
                "{program} exited with {:?}: {}",
                output.status_code, output.stderr
            ),
        })
    }
}
