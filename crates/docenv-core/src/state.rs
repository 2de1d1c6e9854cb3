//! The in-memory environment record shared by the venv and server managers.
//!
//! Invariants:
//! - no active venv implies no server slot and phase [`ServerPhase::Stopped`];
//! - at most one venv is active and at most one server slot exists;
//! - `original_path` never changes, and every deactivation restores `path`
//!   to exactly what it was before the matching activation.

use crate::error::{DocenvError, Result};
use crate::process::ProcessHandle;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

pub const VENV_ROOT_VAR: &str = "VIRTUAL_ENV";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveVenv {
    pub name: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerPhase {
    Stopped,
    Starting,
    Running,
}

#[derive(Debug, Clone)]
pub struct ServerSlot {
    pub handle: ProcessHandle,
    pub port: u16,
    /// Distinguishes this server from any later one started in the same slot.
    pub generation: u64,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct EnvironmentState {
    original_path: OsString,
    original_interpreter_path: Option<PathBuf>,
    path: OsString,
    preserved: Vec<PathBuf>,
    active: Option<ActiveVenv>,
    /// PATH and preserved list in effect before the current activation.
    saved: Option<(OsString, Vec<PathBuf>)>,
    phase: ServerPhase,
    server: Option<ServerSlot>,
    generations: u64,
}

pub type SharedState = Arc<Mutex<EnvironmentState>>;

impl EnvironmentState {
    /// Build the record from the captured original PATH. The working PATH
    /// starts as `{preserved} : {original}`.
    pub fn new(
        original_path: OsString,
        original_interpreter_path: Option<PathBuf>,
        preserved: Vec<PathBuf>,
    ) -> Result<Self> {
        let path = compose_path(&preserved, &original_path)?;
        Ok(Self {
            original_path,
            original_interpreter_path,
            path,
            preserved,
            active: None,
            saved: None,
            phase: ServerPhase::Stopped,
            server: None,
            generations: 0,
        })
    }

    /// Capture PATH and the python interpreter from the process environment.
    pub fn capture(preserved: Vec<PathBuf>) -> Result<Self> {
        let original_path = std::env::var_os("PATH").unwrap_or_default();
        let interpreter = find_interpreter(&original_path);
        Self::new(original_path, interpreter, preserved)
    }

    pub fn into_shared(self) -> SharedState {
        Arc::new(Mutex::new(self))
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn original_path(&self) -> &OsStr {
        &self.original_path
    }

    pub fn original_interpreter_path(&self) -> Option<&Path> {
        self.original_interpreter_path.as_deref()
    }

    pub fn path(&self) -> &OsStr {
        &self.path
    }

    pub fn preserved(&self) -> &[PathBuf] {
        &self.preserved
    }

    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    pub fn active(&self) -> Option<&ActiveVenv> {
        self.active.as_ref()
    }

    pub fn phase(&self) -> ServerPhase {
        self.phase
    }

    pub fn server(&self) -> Option<&ServerSlot> {
        self.server.as_ref()
    }

    pub fn port(&self) -> Option<u16> {
        self.server.as_ref().map(|s| s.port)
    }

    /// Environment changes every spawned command receives.
    pub fn env_overlay(&self) -> (Vec<(OsString, OsString)>, Vec<OsString>) {
        let mut set = vec![(OsString::from("PATH"), self.path.clone())];
        let mut remove = Vec::new();
        match &self.active {
            Some(venv) => {
                set.push((OsString::from(VENV_ROOT_VAR), venv.path.clone().into_os_string()));
                remove.push(OsString::from("PYTHONHOME"));
            }
            None => remove.push(OsString::from(VENV_ROOT_VAR)),
        }
        (set, remove)
    }

    // -----------------------------------------------------------------------
    // Transitions
    // -----------------------------------------------------------------------

    /// Prepend `{venv}/bin` and the preserved paths to the original PATH.
    pub fn activate(&mut self, venv: ActiveVenv, bin_dir: &Path, preserved: Vec<PathBuf>) -> Result<()> {
        let mut front = Vec::with_capacity(preserved.len() + 1);
        front.push(bin_dir.to_path_buf());
        front.extend(preserved.iter().cloned());
        let path = compose_path(&front, &self.original_path)?;
        tracing::debug!(venv = %venv.name, "activate");
        let previous = std::mem::replace(&mut self.path, path);
        let previous_preserved = std::mem::replace(&mut self.preserved, preserved);
        if self.saved.is_none() {
            self.saved = Some((previous, previous_preserved));
        }
        self.active = Some(venv);
        Ok(())
    }

    /// Restore the PATH that was in effect before activation. Refused while a
    /// server is running.
    pub fn deactivate(&mut self) -> Result<ActiveVenv> {
        if let Some(slot) = &self.server {
            return Err(DocenvError::ServerRunning { port: slot.port });
        }
        let venv = self.active.take().ok_or(DocenvError::NotActive)?;
        match self.saved.take() {
            Some((path, preserved)) => {
                self.path = path;
                self.preserved = preserved;
            }
            None => self.path = compose_path(&self.preserved, &self.original_path)?,
        }
        tracing::debug!(venv = %venv.name, "deactivate");
        Ok(venv)
    }

    pub fn begin_start(&mut self) {
        self.phase = ServerPhase::Starting;
    }

    pub fn abort_start(&mut self) {
        if self.server.is_none() {
            self.phase = ServerPhase::Stopped;
        }
    }

    /// Store a freshly spawned server. Returns its generation.
    pub fn set_server(&mut self, handle: ProcessHandle, port: u16) -> u64 {
        debug_assert!(self.server.is_none(), "server slot already occupied");
        debug_assert!(self.active.is_some(), "server without active venv");
        self.generations += 1;
        self.server = Some(ServerSlot {
            handle,
            port,
            generation: self.generations,
            started_at: Utc::now(),
        });
        self.phase = ServerPhase::Running;
        self.generations
    }

    pub fn take_server(&mut self) -> Option<ServerSlot> {
        let slot = self.server.take();
        self.phase = ServerPhase::Stopped;
        slot
    }

    /// Clear the slot only if it still belongs to `generation`.
    pub fn take_server_if(&mut self, generation: u64) -> Option<ServerSlot> {
        match &self.server {
            Some(slot) if slot.generation == generation => self.take_server(),
            _ => None,
        }
    }
}

/// Lock the shared record, recovering from a poisoned lock.
pub fn lock(state: &SharedState) -> MutexGuard<'_, EnvironmentState> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

/// `{front[0]} : {front[1]} : ... : {tail}` using the platform separator.
/// `tail` is appended verbatim so it is restored byte for byte.
pub fn compose_path(front: &[PathBuf], tail: &OsStr) -> Result<OsString> {
    for p in front {
        if std::env::join_paths(std::iter::once(p)).is_err() {
            return Err(DocenvError::InvalidPathEntry(p.clone()));
        }
    }
    if front.is_empty() {
        return Ok(tail.to_os_string());
    }
    let mut path = std::env::join_paths(front)
        .map_err(|_| DocenvError::InvalidPathEntry(front[0].clone()))?;
    if !tail.is_empty() {
        path.push(if cfg!(windows) { ";" } else { ":" });
        path.push(tail);
    }
    Ok(path)
}

/// `python3`, then `python`, on the given search path.
pub fn find_interpreter(search_path: &OsStr) -> Option<PathBuf> {
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    ["python3", "python"]
        .into_iter()
        .find_map(|name| which::which_in(name, Some(search_path), &cwd).ok())
}
