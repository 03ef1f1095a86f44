use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, warn};

use crate::platform::{NativePlatform, Platform};

/// Captured result of an external command. `ok` is false on spawn failure,
/// timeout, non-zero exit or oversized output; `stdout` still holds whatever
/// was read before the failure.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub ok: bool,
}

impl CommandOutput {
    pub fn failed(stderr: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.into(),
            ok: false,
        }
    }

    /// Stdout worth parsing: the command succeeded and printed something.
    pub fn usable_stdout(&self) -> Option<&str> {
        let trimmed = self.stdout.trim();
        (self.ok && !trimmed.is_empty()).then_some(trimmed)
    }
}

/// Every shell interaction of the dashboard funnels through this seam.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, command: &str, timeout: Duration) -> CommandOutput;
}

/// Runs commands through the platform shell.
pub struct ShellRunner {
    max_output_bytes: usize,
}

impl ShellRunner {
    pub fn new(max_output_bytes: usize) -> Self {
        Self { max_output_bytes }
    }
}

/// Read until EOF or until `cap` bytes are buffered. Returns true on overflow.
async fn read_capped<R: AsyncRead + Unpin>(reader: Option<R>, buf: &mut Vec<u8>, cap: usize) -> bool {
    let Some(mut reader) = reader else {
        return false;
    };
    let mut chunk = [0u8; 8192];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => return false,
            Ok(n) => {
                let room = cap.saturating_sub(buf.len());
                if n > room {
                    buf.extend_from_slice(&chunk[..room]);
                    return true;
                }
                buf.extend_from_slice(&chunk[..n]);
            }
        }
    }
}

#[async_trait]
impl CommandRunner for ShellRunner {
    async fn run(&self, command: &str, timeout: Duration) -> CommandOutput {
        debug!(cmd = %command, "Running collaborator command");

        let mut cmd = NativePlatform::shell_inline(command);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!(cmd = %command, "Failed to spawn command: {}", e);
                return CommandOutput::failed(e.to_string());
            }
        };

        let cap = self.max_output_bytes;
        let stdout_pipe = child.stdout.take();
        let stderr_pipe = child.stderr.take();
        let mut out = Vec::new();
        let mut err = Vec::new();

        let collect = async {
            let (out_overflow, err_overflow) = tokio::join!(
                read_capped(stdout_pipe, &mut out, cap),
                read_capped(stderr_pipe, &mut err, cap)
            );
            let overflow = out_overflow || err_overflow;
            if overflow {
                let _ = child.start_kill();
            }
            (overflow, child.wait().await)
        };

        let outcome = tokio::time::timeout(timeout, collect).await;
        let stdout = String::from_utf8_lossy(&out).to_string();
        let mut stderr = String::from_utf8_lossy(&err).to_string();

        let ok = match outcome {
            Ok((false, Ok(status))) => status.success(),
            Ok((true, _)) => {
                warn!(cmd = %command, "Command output exceeded {} bytes", cap);
                false
            }
            Ok((false, Err(e))) => {
                warn!(cmd = %command, "Failed waiting for command: {}", e);
                false
            }
            Err(_) => {
                warn!(cmd = %command, "Command timed out after {:?}", timeout);
                if stderr.is_empty() {
                    stderr = format!("timed out after {:?}", timeout);
                }
                false
            }
        };

        CommandOutput { stdout, stderr, ok }
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use std::sync::Mutex;

    /// Maps command prefixes to canned output; unmatched commands fail.
    #[derive(Default)]
    pub struct MockRunner {
        responses: Vec<(String, CommandOutput)>,
        pub calls: Mutex<Vec<String>>,
    }

    impl MockRunner {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with(mut self, prefix: &str, stdout: &str, ok: bool) -> Self {
            self.responses.push((
                prefix.to_string(),
                CommandOutput {
                    stdout: stdout.to_string(),
                    stderr: String::new(),
                    ok,
                },
            ));
            self
        }
    }

    #[async_trait]
    impl CommandRunner for MockRunner {
        async fn run(&self, command: &str, _timeout: Duration) -> CommandOutput {
            self.calls.lock().unwrap().push(command.to_string());
            self.responses
                .iter()
                .find(|(prefix, _)| command.starts_with(prefix.as_str()))
                .map(|(_, out)| out.clone())
                .unwrap_or_else(|| CommandOutput::failed("command not found"))
        }
    }
}
