use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use super::{Isolation, IsolationError};
use crate::protocol::{ResultMessage, StartMessage};

/// Longest stderr excerpt quoted in a failure message.
const STDERR_EXCERPT: usize = 2000;

/// File stem of the standalone worker binary.
pub const WORKER_BIN: &str = "weft-sandbox-worker";

/// Environment variable naming the worker binary explicitly.
pub const WORKER_ENV: &str = "WEFT_SANDBOX_WORKER";

/// Runs each snippet in a fresh worker process.
///
/// The worker gets a cleared environment, the temp dir as cwd, one JSON start
/// line on stdin, and must answer with one JSON result line on stdout. On
/// timeout the process is killed and reaped before `run` returns.
#[derive(Debug, Clone)]
pub struct ProcessIsolation {
    program: PathBuf,
    args: Vec<String>,
}

impl ProcessIsolation {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// The standalone `weft-sandbox-worker` binary, if one can be found.
    ///
    /// Looks at `$WEFT_SANDBOX_WORKER`, then next to the current executable
    /// and one directory up (where test binaries sit relative to cargo's
    /// build output).
    pub fn locate() -> Option<Self> {
        if let Some(path) = std::env::var_os(WORKER_ENV) {
            let path = PathBuf::from(path);
            return path.is_file().then(|| Self::new(path, Vec::new()));
        }

        let exe = std::env::current_exe().ok()?;
        let file_name = format!("{}{}", WORKER_BIN, std::env::consts::EXE_SUFFIX);
        exe.ancestors()
            .skip(1)
            .take(2)
            .map(|dir| dir.join(&file_name))
            .find(|candidate| candidate.is_file())
            .map(|path| Self::new(path, Vec::new()))
    }

    pub fn program(&self) -> &std::path::Path {
        &self.program
    }

    fn spawn(&self) -> Result<Child, IsolationError> {
        Command::new(&self.program)
            .args(&self.args)
            .env_clear()
            .current_dir(std::env::temp_dir())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                IsolationError::Unavailable(format!(
                    "failed to spawn {}: {}",
                    self.program.display(),
                    e
                ))
            })
    }
}

/// Send the start line, then read the single result line.
async fn exchange(child: &mut Child, line: String) -> Result<ResultMessage, IsolationError> {
    if let Some(mut stdin) = child.stdin.take() {
        // A worker that exits early closes the pipe; its stderr explains why
        if let Err(e) = stdin.write_all(line.as_bytes()).await {
            debug!(error = %e, "Worker closed stdin early");
        }
        drop(stdin);
    }

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| IsolationError::Failed("worker stdout not captured".into()))?;
    let mut reader = BufReader::new(stdout);
    let mut response = String::new();
    let read = reader
        .read_line(&mut response)
        .await
        .map_err(|e| IsolationError::Failed(format!("failed to read worker output: {}", e)))?;

    if read == 0 {
        let status = child.wait().await.ok();
        let stderr = read_stderr(child).await;
        return Err(IsolationError::Failed(format!(
            "worker exited without a result ({}){}",
            status.map(|s| s.to_string()).unwrap_or_else(|| "unknown status".into()),
            if stderr.is_empty() {
                String::new()
            } else {
                format!(": {}", stderr)
            }
        )));
    }

    serde_json::from_str(response.trim())
        .map_err(|e| IsolationError::Failed(format!("malformed worker response: {}", e)))
}

async fn read_stderr(child: &mut Child) -> String {
    let Some(mut stderr) = child.stderr.take() else {
        return String::new();
    };
    let mut buf = String::new();
    let _ = stderr.read_to_string(&mut buf).await;
    let trimmed = buf.trim();
    trimmed.chars().take(STDERR_EXCERPT).collect()
}

impl Isolation for ProcessIsolation {
    fn name(&self) -> &'static str {
        "process"
    }

    fn run(
        &self,
        msg: StartMessage,
        timeout: Duration,
    ) -> BoxFuture<'_, Result<ResultMessage, IsolationError>> {
        Box::pin(async move {
            let mut line = serde_json::to_string(&msg)
                .map_err(|e| IsolationError::Failed(format!("failed to encode start message: {}", e)))?;
            line.push('\n');

            let mut child = self.spawn()?;
            debug!(package = %msg.package_name, pid = ?child.id(), "Spawned sandbox worker");

            match tokio::time::timeout(timeout, exchange(&mut child, line)).await {
                Ok(result) => {
                    // The worker exits right after answering
                    if tokio::time::timeout(Duration::from_millis(500), child.wait())
                        .await
                        .is_err()
                    {
                        let _ = child.kill().await;
                    }
                    result
                }
                Err(_) => {
                    warn!(
                        package = %msg.package_name,
                        timeout_ms = timeout.as_millis() as u64,
                        "Sandbox worker timed out, killing"
                    );
                    // kill() also waits for the process to exit
                    if let Err(e) = child.kill().await {
                        warn!(error = %e, "Failed to kill sandbox worker");
                    }
                    Err(IsolationError::Timeout(timeout))
                }
            }
        })
    }
}
