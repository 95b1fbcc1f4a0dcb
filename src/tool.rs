use crossbeam_channel::{select, Receiver};
use std::fmt::{Display, Formatter};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(60);
const POLL_INTERVAL: Duration = Duration::from_millis(50);
// Output readers get this long to finish once the child has exited.
const DRAIN_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum InvokeError {
    #[error("failed to launch {}", .tool.display())]
    Spawn {
        tool: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed waiting for {}", .tool.display())]
    Wait {
        tool: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{} did not exit within {deadline:?}", .tool.display())]
    Timeout { tool: PathBuf, deadline: Duration },
    #[error("{} {}: {}", .tool.display(), describe_exit(.code), .stdout.trim())]
    ToolFailure {
        tool: PathBuf,
        code: Option<i32>,
        stdout: String,
        stderr: String,
    },
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exited with status {code}"),
        None => "was terminated by a signal".to_string(),
    }
}

/// Captured output of a successful tool run. Only ever logged.
#[derive(Debug, Clone, Default)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
    pub elapsed: Duration,
}

/// Something that can turn a payload file into a directory tree.
pub trait PayloadExtractor {
    fn extract(&self, source: &Path, destination: &Path) -> Result<ToolOutput, InvokeError>;
}

/// An external extraction binary, run as `<tool> <source> -extract <destination>`.
#[derive(Debug, Clone)]
pub struct ExternalTool {
    path: PathBuf,
    deadline: Duration,
}

impl Display for ExternalTool {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "ExternalTool(path={}, deadline={:?})",
            self.path.display(),
            self.deadline
        )
    }
}

impl ExternalTool {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            deadline: DEFAULT_DEADLINE,
        }
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Run the tool once. Blocks until it exits or the deadline passes, in which
    /// case the child is killed and reaped before returning [`InvokeError::Timeout`].
    #[tracing::instrument(skip_all, fields(tool = %self.path.display(), source = %source.display()))]
    pub fn invoke(&self, source: &Path, destination: &Path) -> Result<ToolOutput, InvokeError> {
        let mut command = Command::new(&self.path);
        command
            .arg(source)
            .arg("-extract")
            .arg(destination)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        info!("Running the external program: {command:?}");

        let start = Instant::now();
        let mut child = command.spawn().map_err(|source| InvokeError::Spawn {
            tool: self.path.clone(),
            source,
        })?;
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let Some(status) = self.wait(&mut child)? else {
            return Err(InvokeError::Timeout {
                tool: self.path.clone(),
                deadline: self.deadline,
            });
        };

        let stdout = stdout.recv_timeout(DRAIN_GRACE).unwrap_or_default();
        let stderr = stderr.recv_timeout(DRAIN_GRACE).unwrap_or_default();
        let elapsed = start.elapsed();
        debug!(?status, ?elapsed, "tool exited");

        if !status.success() {
            return Err(InvokeError::ToolFailure {
                tool: self.path.clone(),
                code: status.code(),
                stdout,
                stderr,
            });
        }
        Ok(ToolOutput {
            stdout,
            stderr,
            elapsed,
        })
    }

    /// Returns `None` when the deadline expired and the child had to be killed.
    fn wait(&self, child: &mut Child) -> Result<Option<ExitStatus>, InvokeError> {
        let wait_error = |source| InvokeError::Wait {
            tool: self.path.clone(),
            source,
        };
        let ticker = crossbeam_channel::tick(POLL_INTERVAL);
        let deadline = crossbeam_channel::after(self.deadline);

        loop {
            if let Some(status) = child.try_wait().map_err(wait_error)? {
                return Ok(Some(status));
            }
            select! {
                recv(ticker) -> _ => {}
                recv(deadline) -> _ => {
                    if let Some(status) = child.try_wait().map_err(wait_error)? {
                        return Ok(Some(status));
                    }
                    warn!(deadline = ?self.deadline, pid = child.id(), "deadline exceeded, killing tool");
                    if let Err(e) = child.kill() {
                        warn!("Failed to kill tool: {e}");
                    }
                    child.wait().map_err(wait_error)?;
                    return Ok(None);
                }
            }
        }
    }
}

impl PayloadExtractor for ExternalTool {
    fn extract(&self, source: &Path, destination: &Path) -> Result<ToolOutput, InvokeError> {
        self.invoke(source, destination)
    }
}

fn drain(pipe: Option<impl Read + Send + 'static>) -> Receiver<String> {
    let (tx, rx) = crossbeam_channel::bounded(1);
    if let Some(mut pipe) = pipe {
        thread::spawn(move || {
            let mut buf = Vec::new();
            if let Err(e) = pipe.read_to_end(&mut buf) {
                debug!("Error reading tool output: {e}");
            }
            // The receiver is gone when the caller gave up on a timed out tool.
            let _ = tx.send(String::from_utf8_lossy(&buf).into_owned());
        });
    }
    rx
}
