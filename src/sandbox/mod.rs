//! Script execution sandbox: one child process per attempt, rooted at the
//! scenario directory, with a hard wall-clock timeout.

use std::{
    collections::BTreeSet,
    fmt, fs,
    path::{Path, PathBuf},
    process::Stdio,
    sync::{Arc, Mutex},
    time::Duration,
};

use anyhow::{Context, Result};
use serde::Serialize;
use tokio::{
    io::{AsyncRead, AsyncReadExt},
    process::Command,
    task::JoinHandle,
    time::timeout,
};
use tracing::{debug, warn};

/// How long to wait for the output pipes to close after the child is gone.
/// Whatever was read before the grace runs out is kept.
const PIPE_DRAIN_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "code", rename_all = "snake_case")]
pub enum ExitStatus {
    Exited(i32),
    /// Terminated by a signal the sandbox did not send.
    Killed,
    TimedOut,
}

impl ExitStatus {
    pub fn success(self) -> bool {
        matches!(self, Self::Exited(0))
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "killed" => Some(Self::Killed),
            "timeout" => Some(Self::TimedOut),
            other => other.parse::<i32>().ok().map(Self::Exited),
        }
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exited(code) => write!(f, "{code}"),
            Self::Killed => f.write_str("killed"),
            Self::TimedOut => f.write_str("timeout"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub exit_status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    /// Files that appeared in the working directory during this invocation,
    /// relative to it, sorted.
    pub new_files: Vec<PathBuf>,
    pub elapsed: Duration,
}

#[derive(Debug, Clone)]
pub struct Sandbox {
    interpreter: String,
    interpreter_args: Vec<String>,
}

impl Sandbox {
    pub fn new(interpreter: impl Into<String>) -> Self {
        Self { interpreter: interpreter.into(), interpreter_args: Vec::new() }
    }

    /// Python gets unbuffered output so a timed-out run still leaves its
    /// partial stdout/stderr behind.
    pub fn python(interpreter: impl Into<String>) -> Self {
        Self { interpreter: interpreter.into(), interpreter_args: vec!["-u".into()] }
    }

    pub fn from_config(cfg: &crate::config::Config) -> Self {
        let interpreter = cfg.interpreter();
        let is_python = Path::new(&interpreter)
            .file_name()
            .map(|n| n.to_string_lossy().starts_with("python"))
            .unwrap_or(false);
        if is_python {
            Self::python(interpreter)
        } else {
            Self::new(interpreter)
        }
    }

    pub async fn execute(
        &self,
        script_path: &Path,
        working_dir: &Path,
        limit: Duration,
    ) -> Result<ExecutionOutcome> {
        let before = list_files(working_dir)?;
        let started = std::time::Instant::now();

        let mut cmd = Command::new(&self.interpreter);
        cmd.args(&self.interpreter_args)
            .arg(script_path)
            .current_dir(working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // The script leads its own group so descendants die with it.
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().with_context(|| {
            format!(
                "failed to spawn interpreter {} for {}",
                self.interpreter,
                script_path.display()
            )
        })?;
        let pid = child.id();
        debug!(script = %script_path.display(), cwd = %working_dir.display(), ?pid, "spawned script");

        let stdout = child.stdout.take().map(PipeReader::spawn);
        let stderr = child.stderr.take().map(PipeReader::spawn);

        let exit_status = match timeout(limit, child.wait()).await {
            Ok(status) => {
                let status = status.context("waiting for script process")?;
                // Background jobs the script left behind.
                kill_group(pid);
                match status.code() {
                    Some(code) => ExitStatus::Exited(code),
                    None => ExitStatus::Killed,
                }
            }
            Err(_) => {
                warn!(script = %script_path.display(), ?limit, "script exceeded timeout; killing");
                kill_group(pid);
                if let Err(err) = child.kill().await {
                    warn!(%err, "failed to kill timed-out script");
                }
                ExitStatus::TimedOut
            }
        };

        let stdout = PipeReader::drain(stdout).await;
        let stderr = PipeReader::drain(stderr).await;
        let after = list_files(working_dir)?;
        let new_files = after.difference(&before).cloned().collect();

        Ok(ExecutionOutcome {
            exit_status,
            stdout,
            stderr,
            new_files,
            elapsed: started.elapsed(),
        })
    }
}

/// SIGKILL to every process in the group led by `pid`.
#[cfg(unix)]
fn kill_group(pid: Option<u32>) {
    let Some(pgid) = pid.and_then(|p| libc::pid_t::try_from(p).ok()) else {
        return;
    };
    let result = unsafe { libc::kill(-pgid, libc::SIGKILL) };
    if result != 0 {
        let err = std::io::Error::last_os_error();
        // ESRCH: the group is already empty.
        if err.raw_os_error() != Some(libc::ESRCH) {
            warn!(%err, pgid, "failed to kill script process group");
        }
    }
}

#[cfg(not(unix))]
fn kill_group(_pid: Option<u32>) {}

/// Copies a pipe into a shared buffer until EOF.
struct PipeReader {
    captured: Arc<Mutex<Vec<u8>>>,
    task: JoinHandle<()>,
}

impl PipeReader {
    fn spawn<R>(mut pipe: R) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let captured = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&captured);
        let task = tokio::spawn(async move {
            let mut chunk = [0u8; 8192];
            loop {
                match pipe.read(&mut chunk).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if let Ok(mut buf) = sink.lock() {
                            buf.extend_from_slice(&chunk[..n]);
                        }
                    }
                }
            }
        });
        Self { captured, task }
    }

    async fn drain(reader: Option<Self>) -> String {
        let Some(Self { captured, mut task }) = reader else {
            return String::new();
        };
        if timeout(PIPE_DRAIN_GRACE, &mut task).await.is_err() {
            debug!("output pipe still open after grace period; keeping partial output");
            task.abort();
        }
        let bytes = captured.lock().map(|mut buf| std::mem::take(&mut *buf)).unwrap_or_default();
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

/// Every regular file under `dir`, relative to it.
pub fn list_files(dir: &Path) -> Result<BTreeSet<PathBuf>> {
    let mut out = BTreeSet::new();
    let mut stack = vec![dir.to_path_buf()];
    while let Some(current) = stack.pop() {
        let entries = fs::read_dir(&current)
            .with_context(|| format!("listing {}", current.display()))?;
        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                stack.push(path);
            } else if file_type.is_file() {
                if let Ok(rel) = path.strip_prefix(dir) {
                    out.insert(rel.to_path_buf());
                }
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_status_text_round_trips() {
        for status in [ExitStatus::Exited(0), ExitStatus::Exited(-2), ExitStatus::Killed, ExitStatus::TimedOut] {
            assert_eq!(ExitStatus::parse(&status.to_string()), Some(status));
        }
        assert_eq!(ExitStatus::parse("garbage"), None);
    }

    #[test]
    fn list_files_is_recursive_and_relative() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("a.txt"), "a").expect("write");
        fs::create_dir(dir.path().join("out")).expect("mkdir");
        fs::write(dir.path().join("out").join("b.csv"), "b").expect("write");
        let files = list_files(dir.path()).expect("list");
        let expected: BTreeSet<PathBuf> = [PathBuf::from("a.txt"), PathBuf::from("out/b.csv")].into();
        assert_eq!(files, expected);
    }
}
