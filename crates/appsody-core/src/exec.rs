//! External process execution.
//!
//! Long-running engine commands are *streamed*: stdout and stderr are pumped
//! line by line by two reader tasks into a bounded channel and forwarded to
//! the log under a per-tool tracing target. The child is only waited on after
//! both pipes reach EOF, so no output is lost. Short queries are *captured*
//! with a plain blocking `std::process::Command`.

use crate::error::{AppsodyError, Result};
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;

const PUMP_CAPACITY: usize = 256;

/// Where pumped lines are logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogTarget {
    Container,
    Docker,
    Buildah,
    InitScript,
    Kubectl,
    Plain,
}

impl LogTarget {
    fn emit(self, stream: Pipe, line: &str) {
        match self {
            LogTarget::Container => tracing::info!(target: "container", "[Container] {line}"),
            LogTarget::Docker => tracing::info!(target: "docker", "[Docker] {line}"),
            LogTarget::Buildah => tracing::info!(target: "buildah", "[Buildah] {line}"),
            LogTarget::InitScript => tracing::info!(target: "init_script", "[InitScript] {line}"),
            LogTarget::Kubectl | LogTarget::Plain => match stream {
                Pipe::Stdout => tracing::debug!("{line}"),
                Pipe::Stderr => tracing::warn!("{line}"),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pipe {
    Stdout,
    Stderr,
}

/// Outcome of a streamed command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamResult {
    /// `None` when the process was terminated by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl StreamResult {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    fn skipped() -> Self {
        Self {
            code: Some(0),
            ..Self::default()
        }
    }
}

/// Options for a streamed invocation.
#[derive(Debug, Clone)]
pub struct StreamOptions {
    pub target: LogTarget,
    pub dry_run: bool,
    pub interactive: bool,
    pub workdir: Option<PathBuf>,
}

impl StreamOptions {
    pub fn new(target: LogTarget, dry_run: bool) -> Self {
        Self {
            target,
            dry_run,
            interactive: false,
            workdir: None,
        }
    }

    pub fn interactive(mut self, interactive: bool) -> Self {
        self.interactive = interactive;
        self
    }

    pub fn workdir(mut self, dir: &Path) -> Self {
        self.workdir = Some(dir.to_path_buf());
        self
    }
}

pub fn command_line(program: &str, args: &[String]) -> String {
    if args.is_empty() {
        program.to_string()
    } else {
        format!("{program} {}", args.join(" "))
    }
}

/// Resolve a tool on the PATH or fail with `NotInstalled`.
pub fn require(program: &str) -> Result<PathBuf> {
    which::which(program).map_err(|_| AppsodyError::NotInstalled(program.to_string()))
}

// ---------------------------------------------------------------------------
// Streaming
// ---------------------------------------------------------------------------

/// Blocking entry point for streamed commands. Must not be called from inside
/// a tokio runtime; async callers use [`stream_async`].
pub fn stream(program: &str, args: &[String], opts: &StreamOptions) -> Result<StreamResult> {
    if opts.dry_run {
        tracing::info!("Dry Run - Skipping command: {}", command_line(program, args));
        return Ok(StreamResult::skipped());
    }
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(stream_async(program, args, opts))
}

pub async fn stream_async(
    program: &str,
    args: &[String],
    opts: &StreamOptions,
) -> Result<StreamResult> {
    if opts.dry_run {
        tracing::info!("Dry Run - Skipping command: {}", command_line(program, args));
        return Ok(StreamResult::skipped());
    }
    tracing::info!("Running command: {}", command_line(program, args));

    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .stdin(if opts.interactive {
            Stdio::inherit()
        } else {
            Stdio::null()
        });
    if let Some(dir) = &opts.workdir {
        cmd.current_dir(dir);
    }

    let mut child = cmd.spawn().map_err(|e| spawn_error(program, e))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| AppsodyError::Internal("stdout not captured".into()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| AppsodyError::Internal("stderr not captured".into()))?;

    let (tx, mut rx) = mpsc::channel::<(Pipe, String)>(PUMP_CAPACITY);
    let out_tx = tx.clone();
    let out_pump = tokio::spawn(async move {
        let mut lines = BufReader::new(stdout).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if out_tx.send((Pipe::Stdout, line)).await.is_err() {
                break;
            }
        }
    });
    let err_pump = tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if tx.send((Pipe::Stderr, line)).await.is_err() {
                break;
            }
        }
    });

    let mut result = StreamResult::default();
    // The channel closes once both pumps have hit EOF and dropped their senders.
    while let Some((pipe, line)) = rx.recv().await {
        opts.target.emit(pipe, &line);
        let buf = match pipe {
            Pipe::Stdout => &mut result.stdout,
            Pipe::Stderr => &mut result.stderr,
        };
        buf.push_str(&line);
        buf.push('\n');
    }
    let _ = out_pump.await;
    let _ = err_pump.await;

    let status = child.wait().await?;
    result.code = status.code();
    Ok(result)
}

// ---------------------------------------------------------------------------
// Capturing
// ---------------------------------------------------------------------------

/// Run a query command to completion and return its raw output.
/// Queries run even in dry-run mode; they have no side effects.
pub fn capture(program: &str, args: &[String]) -> Result<Output> {
    tracing::debug!("Running command: {}", command_line(program, args));
    std::process::Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .map_err(|e| spawn_error(program, e))
}

/// Like [`capture`] but returns trimmed stdout, failing on a non-zero exit.
pub fn capture_stdout(program: &str, args: &[String], op: &str) -> Result<String> {
    let out = capture(program, args)?;
    if !out.status.success() {
        return Err(AppsodyError::ContainerEngine {
            op: op.to_string(),
            message: String::from_utf8_lossy(&out.stderr).trim().to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&out.stdout).trim().to_string())
}

fn spawn_error(program: &str, e: std::io::Error) -> AppsodyError {
    if e.kind() == std::io::ErrorKind::NotFound {
        AppsodyError::NotInstalled(program.to_string())
    } else {
        AppsodyError::Io(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> Vec<String> {
        vec!["-c".to_string(), script.to_string()]
    }

    #[test]
    fn command_line_joins_args() {
        assert_eq!(
            command_line("docker", &["ps".into(), "-a".into()]),
            "docker ps -a"
        );
        assert_eq!(command_line("docker", &[]), "docker");
    }

    #[test]
    fn dry_run_skips_execution() {
        let opts = StreamOptions::new(LogTarget::Docker, true);
        let res = stream("definitely-not-a-binary", &[], &opts).unwrap();
        assert!(res.success());
        assert!(res.stdout.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn stream_drains_both_pipes_before_exit() {
        let opts = StreamOptions::new(LogTarget::Plain, false);
        let res = stream("sh", &sh("echo out1; echo err1 >&2; echo out2; exit 3"), &opts).unwrap();
        assert_eq!(res.code, Some(3));
        assert_eq!(res.stdout, "out1\nout2\n");
        assert_eq!(res.stderr, "err1\n");
    }

    #[cfg(unix)]
    #[test]
    fn stream_honours_workdir() {
        let dir = tempfile::TempDir::new().unwrap();
        let opts = StreamOptions::new(LogTarget::InitScript, false).workdir(dir.path());
        let res = stream("sh", &sh("pwd"), &opts).unwrap();
        let reported = std::path::PathBuf::from(res.stdout.trim());
        assert_eq!(
            reported.canonicalize().unwrap(),
            dir.path().canonicalize().unwrap()
        );
    }

    #[test]
    fn missing_binary_is_not_installed() {
        let err = capture("definitely-not-a-binary-xyz", &[]).unwrap_err();
        assert!(matches!(err, AppsodyError::NotInstalled(_)));
    }

    #[cfg(unix)]
    #[test]
    fn capture_stdout_fails_on_nonzero() {
        let err = capture_stdout("sh", &sh("echo boom >&2; exit 1"), "query").unwrap_err();
        assert!(err.to_string().contains("query failed: boom"));
    }
}
