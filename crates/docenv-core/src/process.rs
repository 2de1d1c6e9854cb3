//! External process spawning.
//!
//! A [`ProcessRunner`] launches commands either asynchronously, returning a
//! [`SpawnedProcess`] whose events stream stdout/stderr lines and finally the
//! exit code, or synchronously via [`ProcessRunner::run_blocking`], which
//! stalls the caller until the command exits.
//!
//! The [`ProcessHandle`] half is cheap to clone and is what the state record
//! stores for a running server: it answers liveness queries and requests
//! termination. The [`ProcessControl`] half belongs to whoever drives the
//! process (the tokio driver task, or a scripted runner in tests).

use crate::error::{DocenvError, Result};
use crate::notify::{Notifier, Stream};
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, watch};

// ---------------------------------------------------------------------------
// CommandSpec
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: OsString,
    pub args: Vec<OsString>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(OsString, OsString)>,
    pub env_remove: Vec<OsString>,
}

impl CommandSpec {
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: Vec::new(),
            env_remove: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn env_remove(mut self, key: impl Into<OsString>) -> Self {
        self.env_remove.push(key.into());
        self
    }

    /// Short name used to tag output lines and messages.
    pub fn display_name(&self) -> String {
        std::path::Path::new(&self.program)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.program.to_string_lossy().into_owned())
    }

    /// Whether any argument equals `needle`.
    pub fn has_arg(&self, needle: &str) -> bool {
        self.args.iter().any(|a| a == needle)
    }

    fn apply_std(&self, cmd: &mut std::process::Command) {
        cmd.args(&self.args);
        if let Some(cwd) = &self.cwd {
            cmd.current_dir(cwd);
        }
        for key in &self.env_remove {
            cmd.env_remove(key);
        }
        for (k, v) in &self.env {
            cmd.env(k, v);
        }
    }

    fn spawn_error(&self, e: impl std::fmt::Display) -> DocenvError {
        DocenvError::ProcessSpawnFailed {
            program: self.display_name(),
            reason: e.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Events and handles
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent {
    Line { stream: Stream, line: String },
    /// Always the last event. `code` is None when killed by a signal.
    Exited { code: Option<i32> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Liveness {
    Running,
    Exited(Option<i32>),
}

/// Clonable reference to a spawned process.
#[derive(Debug, Clone)]
pub struct ProcessHandle {
    pid: Option<u32>,
    kill_tx: mpsc::UnboundedSender<()>,
    exit_rx: watch::Receiver<Liveness>,
}

impl ProcessHandle {
    /// Create a handle and the control half that drives it.
    pub fn channel(pid: Option<u32>) -> (ProcessHandle, ProcessControl) {
        let (kill_tx, kill_rx) = mpsc::unbounded_channel();
        let (exit_tx, exit_rx) = watch::channel(Liveness::Running);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        (
            ProcessHandle {
                pid,
                kill_tx,
                exit_rx,
            },
            ProcessControl {
                kill_rx,
                exit_tx,
                events_tx,
                events_rx: Some(events_rx),
            },
        )
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn is_alive(&self) -> bool {
        matches!(*self.exit_rx.borrow(), Liveness::Running)
    }

    /// Exit code once the process has exited; `Some(None)` means a signal.
    pub fn exit_code(&self) -> Option<Option<i32>> {
        match *self.exit_rx.borrow() {
            Liveness::Running => None,
            Liveness::Exited(code) => Some(code),
        }
    }

    /// Wait until the process has exited.
    pub async fn wait(&self) -> Option<i32> {
        let mut rx = self.exit_rx.clone();
        let result = rx
            .wait_for(|l| matches!(l, Liveness::Exited(_)))
            .await
            .map(|l| *l);
        match result {
            Ok(Liveness::Exited(code)) => code,
            // Driver gone without reporting: treat as killed.
            _ => None,
        }
    }

    /// Request termination and wait for the exit acknowledgement.
    pub async fn terminate(&self) -> Option<i32> {
        if self.is_alive() {
            let _ = self.kill_tx.send(());
        }
        self.wait().await
    }
}

/// Driver side of a [`ProcessHandle`].
pub struct ProcessControl {
    kill_rx: mpsc::UnboundedReceiver<()>,
    exit_tx: watch::Sender<Liveness>,
    events_tx: mpsc::UnboundedSender<ProcessEvent>,
    events_rx: Option<mpsc::UnboundedReceiver<ProcessEvent>>,
}

impl ProcessControl {
    /// The event receiver handed to the consumer. Only available once.
    pub fn take_events(&mut self) -> Option<mpsc::UnboundedReceiver<ProcessEvent>> {
        self.events_rx.take()
    }

    pub fn line(&self, stream: Stream, line: impl Into<String>) {
        let _ = self.events_tx.send(ProcessEvent::Line {
            stream,
            line: line.into(),
        });
    }

    fn line_sender(&self) -> mpsc::UnboundedSender<ProcessEvent> {
        self.events_tx.clone()
    }

    /// Resolves when termination has been requested. Never resolves if every
    /// handle has been dropped.
    pub async fn killed(&mut self) {
        if self.kill_rx.recv().await.is_none() {
            std::future::pending::<()>().await;
        }
    }

    /// Report the exit. Must come after every line.
    pub fn exit(self, code: Option<i32>) {
        let _ = self.events_tx.send(ProcessEvent::Exited { code });
        let _ = self.exit_tx.send(Liveness::Exited(code));
    }
}

pub struct SpawnedProcess {
    pub handle: ProcessHandle,
    pub events: mpsc::UnboundedReceiver<ProcessEvent>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

// ---------------------------------------------------------------------------
// ProcessRunner
// ---------------------------------------------------------------------------

pub trait ProcessRunner: Send + Sync {
    /// Launch `spec` and return immediately. Must be called from within a
    /// tokio runtime.
    fn spawn(&self, spec: &CommandSpec) -> Result<SpawnedProcess>;

    /// Run `spec` to completion, blocking the calling thread.
    fn run_blocking(&self, spec: &CommandSpec) -> Result<ProcessOutput>;
}

/// Runs real OS processes on the tokio runtime.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioRunner;

impl ProcessRunner for TokioRunner {
    fn spawn(&self, spec: &CommandSpec) -> Result<SpawnedProcess> {
        let mut std_cmd = std::process::Command::new(&spec.program);
        spec.apply_std(&mut std_cmd);
        let mut cmd = tokio::process::Command::from(std_cmd);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        tracing::debug!(program = %spec.display_name(), args = ?spec.args, "spawn");
        let mut child = cmd.spawn().map_err(|e| spec.spawn_error(e))?;

        let stdout = child.stdout.take().ok_or_else(|| spec.spawn_error("stdout not captured"))?;
        let stderr = child.stderr.take().ok_or_else(|| spec.spawn_error("stderr not captured"))?;

        let (handle, mut control) = ProcessHandle::channel(child.id());
        let events = control
            .take_events()
            .ok_or_else(|| spec.spawn_error("event channel already taken"))?;

        let out_task = tokio::spawn(pump_lines(stdout, Stream::Stdout, control.line_sender()));
        let err_task = tokio::spawn(pump_lines(stderr, Stream::Stderr, control.line_sender()));

        tokio::spawn(async move {
            let status = tokio::select! {
                status = child.wait() => status,
                _ = control.killed() => {
                    let _ = child.kill().await;
                    child.wait().await
                }
            };
            let _ = tokio::join!(out_task, err_task);
            let code = match status {
                Ok(s) => s.code(),
                Err(e) => {
                    tracing::warn!("wait failed: {e}");
                    None
                }
            };
            control.exit(code);
        });

        Ok(SpawnedProcess { handle, events })
    }

    fn run_blocking(&self, spec: &CommandSpec) -> Result<ProcessOutput> {
        let mut cmd = std::process::Command::new(&spec.program);
        spec.apply_std(&mut cmd);
        cmd.stdin(Stdio::null());
        tracing::debug!(program = %spec.display_name(), args = ?spec.args, "run blocking");
        let output = cmd.output().map_err(|e| spec.spawn_error(e))?;
        Ok(ProcessOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// Forward lines until EOF. Bytes that are not UTF-8 are replaced rather
/// than ending the read, so the child never sees a closed pipe.
async fn pump_lines<R>(reader: R, stream: Stream, tx: mpsc::UnboundedSender<ProcessEvent>)
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(trim_newline(&buf)).into_owned();
                let _ = tx.send(ProcessEvent::Line { stream, line });
            }
            Err(e) => {
                tracing::warn!(?stream, "output read failed: {e}");
                break;
            }
        }
    }
}

fn trim_newline(mut line: &[u8]) -> &[u8] {
    if let Some(rest) = line.strip_suffix(b"\n") {
        line = rest;
    }
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// Forward every line to the notifier under `job` and return the exit code.
pub async fn forward_output(
    mut events: mpsc::UnboundedReceiver<ProcessEvent>,
    notifier: &dyn Notifier,
    job: &str,
) -> Option<i32> {
    while let Some(event) = events.recv().await {
        match event {
            ProcessEvent::Line { stream, line } => notifier.output(job, stream, &line),
            ProcessEvent::Exited { code } => return code,
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Scripted runner (tests)
// ---------------------------------------------------------------------------


#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::recording::RecordingNotifier;

    #[cfg(unix)]
    #[tokio::test]
    async fn spawn_streams_lines_then_exit() {
        let spec = CommandSpec::new("sh").args(["-c", "echo one; echo two 1>&2; exit 3"]);
        let spawned = TokioRunner.spawn(&spec).unwrap();
        let notifier = RecordingNotifier::default();

        let code = forward_output(spawned.events, &notifier, "sh").await;

        assert_eq!(code, Some(3));
        let lines = notifier.lines.lock().unwrap().clone();
        assert!(lines.contains(&("sh".to_string(), "one".to_string())));
        assert!(lines.contains(&("sh".to_string(), "two".to_string())));
        assert!(!spawned.handle.is_alive());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn invalid_utf8_does_not_stop_the_stream() {
        let spec = CommandSpec::new("sh").args([
            "-c",
            "printf 'ok\\n\\377\\nafter\\n' >&2; sleep 0.2; echo tail >&2; exit 0",
        ]);
        let spawned = TokioRunner.spawn(&spec).unwrap();
        let notifier = RecordingNotifier::default();

        let code = forward_output(spawned.events, &notifier, "sh").await;

        assert_eq!(code, Some(0));
        let lines: Vec<String> = notifier
            .lines
            .lock()
            .unwrap()
            .iter()
            .map(|(_, l)| l.clone())
            .collect();
        assert_eq!(lines, vec!["ok", "\u{FFFD}", "after", "tail"]);
    }

    #[test]
    fn trim_newline_strips_lf_and_crlf() {
        assert_eq!(trim_newline(b"abc\r\n"), b"abc");
        assert_eq!(trim_newline(b"abc\n"), b"abc");
        assert_eq!(trim_newline(b"abc"), b"abc");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn terminate_kills_long_running_process() {
        let spec = CommandSpec::new("sleep").arg("30");
        let spawned = TokioRunner.spawn(&spec).unwrap();
        assert!(spawned.handle.is_alive());
        assert!(spawned.handle.pid().is_some());

        let code = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            spawned.handle.terminate(),
        )
        .await
        .expect("terminate timed out");

        assert_eq!(code, None);
        assert!(!spawned.handle.is_alive());
        assert_eq!(spawned.handle.exit_code(), Some(None));
    }

    #[tokio::test]
    async fn spawn_missing_program_fails() {
        let spec = CommandSpec::new("__docenv_no_such_program__");
        let err = TokioRunner.spawn(&spec).err().unwrap();
        assert!(matches!(err, DocenvError::ProcessSpawnFailed { .. }));
        assert!(err.to_string().contains("__docenv_no_such_program__"));
    }

    #[cfg(unix)]
    #[test]
    fn run_blocking_captures_output() {
        let spec = CommandSpec::new("sh")
            .args(["-c", "echo \"$GREETING\""])
            .env("GREETING", "hello");
        let out = TokioRunner.run_blocking(&spec).unwrap();
        assert!(out.success());
        assert_eq!(out.stdout.trim(), "hello");
    }

    #[test]
    fn display_name_strips_directories() {
        let spec = CommandSpec::new("/opt/venv/bin/mkdocs").arg("serve");
        assert_eq!(spec.display_name(), "mkdocs");
        assert!(spec.has_arg("serve"));
    }
}
