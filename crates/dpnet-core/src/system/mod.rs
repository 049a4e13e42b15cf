// ── System command seam ──
//
// Everything dpnet does to the host goes through `CommandRunner`: the
// real implementation spawns processes with tokio, tests script the
// responses with `MockRunner`.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::error::CoreError;

#[cfg(test)]
pub(crate) mod mock;

/// Captured result of one process invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }

    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            status: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(status: i32, stderr: impl Into<String>) -> Self {
        Self {
            status,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }
}

/// Abstraction over process execution.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `program` with `args`. A non-zero exit is *not* an error here;
    /// only spawn failures and timeouts are.
    async fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput, CoreError>;

    /// Run and fold a non-zero exit into `CoreError::CommandFailed`.
    async fn run_checked(&self, program: &str, args: &[&str]) -> Result<String, CoreError> {
        let output = self.run(program, args).await?;
        if output.success() {
            Ok(output.stdout)
        } else {
            Err(CoreError::CommandFailed {
                program: program.into(),
                args: redact_args(args).join(" "),
                status: output.status,
                stderr: output.stderr.trim().to_owned(),
            })
        }
    }
}

/// Spawns real processes under a per-command timeout.
#[derive(Debug, Clone)]
pub struct SystemRunner {
    timeout: Duration,
}

impl SystemRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput, CoreError> {
        debug!(program, args = %redact_args(args).join(" "), "exec");

        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    CoreError::ToolMissing {
                        program: program.into(),
                    }
                } else {
                    CoreError::Io(e)
                }
            })?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| CoreError::CommandTimeout {
                program: program.into(),
                timeout_secs: self.timeout.as_secs(),
            })??;

        let result = CommandOutput {
            // Killed by a signal: no exit code.
            status: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        debug!(program, status = result.status, "exit");
        Ok(result)
    }
}

/// Mask values that follow secret-bearing keywords.
pub fn redact_args<'a>(args: &[&'a str]) -> Vec<&'a str> {
    const SECRET_KEYS: &[&str] = &["password", "wifi-sec.psk", "psk"];

    let mut out = Vec::with_capacity(args.len());
    let mut mask_next = false;
    for arg in args {
        if mask_next {
            out.push("********");
            mask_next = false;
        } else {
            out.push(*arg);
            mask_next = SECRET_KEYS.contains(arg);
        }
    }
    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn secrets_are_redacted() {
        let args = [
            "device", "wifi", "connect", "Home", "password", "hunter22", "ifname", "wlan1",
        ];
        assert_eq!(
            redact_args(&args).join(" "),
            "device wifi connect Home password ******** ifname wlan1"
        );

        let modify = ["connection", "modify", "x", "wifi-sec.psk", "s3cretpass"];
        assert!(!redact_args(&modify).contains(&"s3cretpass"));
    }

    #[tokio::test]
    async fn missing_tool_is_reported() {
        let runner = SystemRunner::new(Duration::from_secs(5));
        let err = runner
            .run("dpnet-definitely-not-installed", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::ToolMissing { .. }));
    }
}
