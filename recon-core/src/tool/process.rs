//! Process-backed tool runner built on `tokio::process`.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

use recon_model::ScanTool;

use crate::error::ToolError;
use crate::tool::{
    OUTPUT_CHANNEL_CAPACITY, SpawnedTool, ToolExit, ToolInvocation, ToolProcess,
    ToolRunner,
};

/// How many trailing stderr lines are kept for the scan log.
const STDERR_TAIL_LINES: usize = 20;

/// Runs scanning tools as child processes, streaming stdout line by line.
///
/// Binaries installed via `go install` land in `$GOPATH/bin`; that
/// directory is preferred over `$PATH` so a same-named binary elsewhere
/// (e.g. the Python httpx) is never picked up by accident.
#[derive(Debug, Default)]
pub struct ProcessToolRunner;

impl ProcessToolRunner {
    pub fn new() -> Self {
        Self
    }

    fn go_bin_dir() -> Option<PathBuf> {
        let gopath = std::env::var_os("GOPATH")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join("go")))?;
        Some(gopath.join("bin"))
    }

    fn resolve_binary(tool: ScanTool) -> PathBuf {
        if let Some(bin_dir) = Self::go_bin_dir() {
            let candidate = bin_dir.join(tool.as_str());
            if candidate.is_file() {
                return candidate;
            }
        }
        PathBuf::from(tool.as_str())
    }

    fn command(invocation: &ToolInvocation) -> Command {
        let mut cmd = Command::new(Self::resolve_binary(invocation.tool));
        let target = invocation.target.as_str();
        match invocation.tool {
            ScanTool::Subfinder => {
                cmd.args(["-d", target, "-silent"]);
            }
            ScanTool::Httpx => {
                cmd.args(["-silent", "-json", "-title", "-tech-detect", "-status-code"]);
            }
            ScanTool::Waybackurls => {
                cmd.arg(target);
            }
            ScanTool::Gau => {
                cmd.args([target, "--threads", "5"]);
            }
            ScanTool::Katana => {
                let url = format!("https://{target}");
                cmd.args(["-u", url.as_str(), "-silent", "-depth", "2"]);
            }
            ScanTool::Nuclei => {
                cmd.args(["-jsonl", "-silent", "-severity", "low,medium,high,critical"]);
            }
        }
        cmd
    }
}

#[async_trait]
impl ToolRunner for ProcessToolRunner {
    async fn spawn(&self, invocation: ToolInvocation) -> Result<SpawnedTool, ToolError> {
        let tool = invocation.tool;
        let mut cmd = Self::command(&invocation);
        cmd.stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(if invocation.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                ToolError::NotInstalled { tool }
            } else {
                ToolError::Spawn { tool, source }
            }
        })?;

        if let Some(data) = invocation.stdin {
            let mut stdin = child.stdin.take().ok_or_else(|| {
                ToolError::Signal(format!("{tool} stdin pipe unavailable"))
            })?;
            tokio::spawn(async move {
                if let Err(err) = stdin.write_all(data.as_bytes()).await {
                    warn!("failed to write tool stdin: {err}");
                }
                let _ = stdin.shutdown().await;
            });
        }

        let stdout = child.stdout.take().ok_or_else(|| {
            ToolError::Signal(format!("{tool} stdout pipe unavailable"))
        })?;
        let (tx, rx) = mpsc::channel(OUTPUT_CHANNEL_CAPACITY);
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                if tx.send(trimmed.to_string()).await.is_err() {
                    break;
                }
            }
        });

        let stderr = child.stderr.take().ok_or_else(|| {
            ToolError::Signal(format!("{tool} stderr pipe unavailable"))
        })?;
        let stderr_task = tokio::spawn(async move {
            let mut tail = Vec::new();
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                if tail.len() == STDERR_TAIL_LINES {
                    tail.remove(0);
                }
                tail.push(trimmed.to_string());
            }
            tail
        });

        Ok(SpawnedTool {
            output: rx,
            process: Box::new(ProcessHandle {
                tool,
                child,
                stderr_task: Some(stderr_task),
            }),
        })
    }
}

#[derive(Debug)]
struct ProcessHandle {
    tool: ScanTool,
    child: Child,
    stderr_task: Option<JoinHandle<Vec<String>>>,
}

impl ProcessHandle {
    #[cfg(unix)]
    fn signal(&self, signal: nix::sys::signal::Signal) -> Result<(), ToolError> {
        use nix::unistd::Pid;

        let Some(pid) = self.child.id() else {
            // Process already exited; nothing to signal.
            return Ok(());
        };
        nix::sys::signal::kill(Pid::from_raw(pid as i32), signal)
            .map_err(|err| ToolError::Signal(format!("{}: {err}", self.tool)))
    }
}

#[async_trait]
impl ToolProcess for ProcessHandle {
    async fn suspend(&mut self) -> Result<(), ToolError> {
        #[cfg(unix)]
        {
            self.signal(nix::sys::signal::Signal::SIGSTOP)
        }
        #[cfg(not(unix))]
        {
            Ok(())
        }
    }

    async fn resume(&mut self) -> Result<(), ToolError> {
        #[cfg(unix)]
        {
            self.signal(nix::sys::signal::Signal::SIGCONT)
        }
        #[cfg(not(unix))]
        {
            Ok(())
        }
    }

    async fn terminate(&mut self) -> Result<(), ToolError> {
        // SIGKILL reaps suspended processes as well; no SIGCONT needed.
        self.child.kill().await.map_err(ToolError::Io)
    }

    async fn wait(&mut self) -> Result<ToolExit, ToolError> {
        let status = self.child.wait().await?;
        let stderr_tail = match self.stderr_task.take() {
            Some(task) => task.await.unwrap_or_default(),
            None => Vec::new(),
        };
        Ok(ToolExit {
            success: status.success(),
            code: status.code(),
            stderr_tail,
        })
    }
}
