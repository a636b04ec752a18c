//! Builder for executing external tool commands with timeout and
//! cancellation support.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use lf_core::Error;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

/// Default command timeout: 5 minutes.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Number of trailing stderr lines kept for error reports when streaming.
const STDERR_TAIL_LINES: usize = 20;

/// Output captured from a tool execution.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    /// Process exit status.
    pub status: ExitStatus,
    /// Captured standard output (lossy UTF-8).
    pub stdout: String,
    /// Captured standard error (lossy UTF-8). When streamed through
    /// [`ToolCommand::execute_with_stderr_callback`] only the tail is kept.
    pub stderr: String,
}

/// A builder for constructing and executing external tool invocations.
///
/// # Example
///
/// ```no_run
/// use lf_av::ToolCommand;
/// use std::path::PathBuf;
///
/// # async fn example() -> lf_core::Result<()> {
/// let output = ToolCommand::new(PathBuf::from("ffprobe"))
///     .arg("-v").arg("error")
///     .arg("-print_format").arg("json")
///     .arg("-show_format")
///     .arg("/path/to/video.mp4")
///     .execute()
///     .await?;
/// println!("{}", output.stdout);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ToolCommand {
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
}

impl ToolCommand {
    /// Create a new command for the given program path.
    pub fn new(program: PathBuf) -> Self {
        Self {
            program,
            args: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Append a single argument.
    pub fn arg(&mut self, s: impl Into<String>) -> &mut Self {
        self.args.push(s.into());
        self
    }

    /// Append multiple arguments.
    pub fn args(&mut self, iter: impl IntoIterator<Item = impl Into<String>>) -> &mut Self {
        self.args.extend(iter.into_iter().map(Into::into));
        self
    }

    /// Set the maximum execution time.
    pub fn timeout(&mut self, d: Duration) -> &mut Self {
        self.timeout = d;
        self
    }

    /// The configured maximum execution time.
    pub fn get_timeout(&self) -> Duration {
        self.timeout
    }

    /// The full argv, program first, for error reports and logging.
    pub fn argv(&self) -> Vec<String> {
        std::iter::once(self.program.to_string_lossy().to_string())
            .chain(self.args.iter().cloned())
            .collect()
    }

    fn program_name(&self) -> String {
        self.program
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.program.to_string_lossy().to_string())
    }

    fn spawn(&self) -> lf_core::Result<tokio::process::Child> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        cmd.spawn()
            .map_err(|e| Error::tool(self.program_name(), format!("failed to spawn: {e}")))
    }

    /// Execute the command, capturing stdout and stderr.
    ///
    /// # Errors
    ///
    /// - [`Error::Tool`] if spawning fails or the process times out (the
    ///   child is killed on timeout).
    /// - [`Error::ToolExit`] if the process exits with a non-zero status.
    pub async fn execute(&self) -> lf_core::Result<ToolOutput> {
        let program_name = self.program_name();
        let child = self.spawn()?;

        // Dropping the future on timeout drops the child, which kills it.
        let result = tokio::time::timeout(self.timeout, child.wait_with_output()).await;

        match result {
            Ok(Ok(output)) => {
                let tool_output = ToolOutput {
                    status: output.status,
                    stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                    stderr: String::from_utf8_lossy(&output.stderr).to_string(),
                };

                if !output.status.success() {
                    return Err(Error::ToolExit {
                        tool: program_name,
                        code: output.status.code(),
                        stderr: tool_output.stderr.trim().to_string(),
                    });
                }

                Ok(tool_output)
            }
            Ok(Err(e)) => Err(Error::tool(
                program_name,
                format!("I/O error waiting for process: {e}"),
            )),
            Err(_elapsed) => Err(Error::tool(
                program_name,
                format!("timed out after {:?}", self.timeout),
            )),
        }
    }

    /// Execute the command, handing every stderr line to `on_line` as it is
    /// produced.
    ///
    /// Lines are split on both `\n` and `\r`, so ffmpeg's carriage-return
    /// stats lines arrive one at a time. The cancellation token is checked
    /// between reads; when it fires the child is killed and
    /// [`Error::Cancelled`] is returned.
    pub async fn execute_with_stderr_callback(
        &self,
        mut on_line: impl FnMut(&str),
        cancel: Option<CancellationToken>,
    ) -> lf_core::Result<ToolOutput> {
        let program_name = self.program_name();
        let cancel = cancel.unwrap_or_default();
        let mut child = self.spawn()?;

        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::tool(&program_name, "stderr was not captured"))?;
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::tool(&program_name, "stdout was not captured"))?;

        // Drain stdout concurrently so a chatty child never blocks on a full pipe.
        let stdout_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            let _ = stdout.read_to_end(&mut buf).await;
            buf
        });

        let deadline = tokio::time::sleep(self.timeout);
        tokio::pin!(deadline);

        let mut splitter = LineSplitter::default();
        let mut tail: VecDeque<String> = VecDeque::with_capacity(STDERR_TAIL_LINES);
        let mut chunk = [0u8; 4096];

        let mut handle_line = |line: String, tail: &mut VecDeque<String>| {
            on_line(&line);
            if tail.len() == STDERR_TAIL_LINES {
                tail.pop_front();
            }
            tail.push_back(line);
        };

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    let _ = child.kill().await;
                    tracing::debug!("{program_name} cancelled; child killed");
                    return Err(Error::Cancelled);
                }
                _ = &mut deadline => {
                    let _ = child.kill().await;
                    return Err(Error::tool(
                        program_name,
                        format!("timed out after {:?}", self.timeout),
                    ));
                }
                read = stderr.read(&mut chunk) => {
                    match read {
                        Ok(0) => break,
                        Ok(n) => {
                            for line in splitter.feed(&chunk[..n]) {
                                handle_line(line, &mut tail);
                            }
                        }
                        Err(e) => {
                            let _ = child.kill().await;
                            return Err(Error::tool(
                                program_name,
                                format!("failed to read stderr: {e}"),
                            ));
                        }
                    }
                }
            }
        }
        if let Some(line) = splitter.finish() {
            handle_line(line, &mut tail);
        }

        let status = tokio::select! {
            _ = cancel.cancelled() => {
                let _ = child.kill().await;
                return Err(Error::Cancelled);
            }
            _ = &mut deadline => {
                let _ = child.kill().await;
                return Err(Error::tool(
                    program_name,
                    format!("timed out after {:?}", self.timeout),
                ));
            }
            status = child.wait() => status.map_err(|e| {
                Error::tool(&program_name, format!("I/O error waiting for process: {e}"))
            })?,
        };

        let stdout = stdout_task.await.unwrap_or_default();
        let stderr_tail = Vec::from(tail).join("\n");

        if !status.success() {
            return Err(Error::ToolExit {
                tool: program_name,
                code: status.code(),
                stderr: stderr_tail,
            });
        }

        Ok(ToolOutput {
            status,
            stdout: String::from_utf8_lossy(&stdout).to_string(),
            stderr: stderr_tail,
        })
    }
}

/// Incremental splitter for byte streams terminated by `\n` or `\r`.
#[derive(Debug, Default)]
struct LineSplitter {
    pending: Vec<u8>,
}

impl LineSplitter {
    /// Feed a chunk, returning every complete non-empty line it finishes.
    fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &b in chunk {
            if b == b'\n' || b == b'\r' {
                if !self.pending.is_empty() {
                    lines.push(String::from_utf8_lossy(&self.pending).to_string());
                    self.pending.clear();
                }
            } else {
                self.pending.push(b);
            }
        }
        lines
    }

    /// Flush a trailing unterminated line.
    fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            None
        } else {
            let line = String::from_utf8_lossy(&self.pending).to_string();
            self.pending.clear();
            Some(line)
        }
    }
}
