//! Per-project virtual environment: create, activate, deactivate, remove.

use crate::error::{DocenvError, Result};
use crate::notify::Level;
use crate::paths;
use crate::process::{self, CommandSpec};
use crate::session::Session;
use crate::state::{self, ActiveVenv};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;

// ---------------------------------------------------------------------------
// ProjectVenv
// ---------------------------------------------------------------------------

/// The venv belonging to a project, derived from its directory name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectVenv {
    pub name: String,
    pub path: PathBuf,
}

impl ProjectVenv {
    pub fn for_session(session: &Session) -> Self {
        let name = paths::project_name(session.root());
        let path = session.config().venvs_dir.join(&name);
        Self { name, path }
    }

    pub fn exists(&self) -> bool {
        self.path.is_dir()
    }

    pub fn bin_dir(&self) -> PathBuf {
        paths::venv_bin_dir(&self.path)
    }
}

// ---------------------------------------------------------------------------
// Completion
// ---------------------------------------------------------------------------

/// Resolves once a background job has finished. The job has already reported
/// its outcome through the notifier; awaiting is optional.
pub struct Completion {
    task: JoinHandle<Result<()>>,
}

impl Completion {
    pub async fn wait(self) -> Result<()> {
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(DocenvError::Io(std::io::Error::other(e.to_string()))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    Activated,
    AlreadyActive,
}

#[derive(Debug, Clone, Serialize)]
pub struct VenvStatus {
    pub name: String,
    pub path: PathBuf,
    pub exists: bool,
    pub active: bool,
    /// Name of the active venv, which may belong to another project.
    pub active_venv: Option<String>,
    pub interpreter: Option<PathBuf>,
    pub python_version: Option<String>,
}

// ---------------------------------------------------------------------------
// VenvManager
// ---------------------------------------------------------------------------

pub struct VenvManager {
    session: Arc<Session>,
}

impl VenvManager {
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }

    pub fn project_venv(&self) -> ProjectVenv {
        ProjectVenv::for_session(&self.session)
    }

    pub fn exists(&self) -> bool {
        self.project_venv().exists()
    }

    pub fn is_active(&self) -> bool {
        self.session.state().is_active()
    }

    /// The interpreter reachable on the session's current PATH.
    pub fn interpreter_path(&self) -> Option<PathBuf> {
        let path = self.session.state().path().to_os_string();
        state::find_interpreter(&path)
    }

    /// Launch `python -m venv` for this project. Returns once the process is
    /// spawned; the outcome is notified when it exits.
    pub fn create(&self) -> Result<Completion> {
        let venv = self.project_venv();
        if venv.exists() {
            return Err(DocenvError::AlreadyExists(venv.path));
        }
        let python = self
            .interpreter_path()
            .ok_or(DocenvError::InterpreterNotFound)?;
        std::fs::create_dir_all(&self.session.config().venvs_dir)?;

        let spec = self.session.prepare(
            CommandSpec::new(python)
                .args(["-m", "venv"])
                .arg(venv.path.clone()),
        );
        let spawned = self.session.runner().spawn(&spec)?;
        self.session.notify(
            Level::Info,
            format!("Creating virtual environment {}...", venv.path.display()),
        );

        let session = Arc::clone(&self.session);
        let task = tokio::spawn(async move {
            let code = process::forward_output(spawned.events, session.notifier(), "venv").await;
            if code == Some(0) {
                session.notify(
                    Level::Info,
                    format!("Virtual environment created at {}", venv.path.display()),
                );
                Ok(())
            } else {
                let err = DocenvError::ProcessExitedNonZero {
                    program: "python -m venv".into(),
                    code,
                };
                session.notify(Level::Error, format!("Failed to create virtual environment: {err}"));
                Err(err)
            }
        });
        Ok(Completion { task })
    }

    /// Activate this project's venv, creating it first (and waiting for the
    /// creation to finish) when it does not exist yet.
    pub async fn activate(&self) -> Result<Activation> {
        let venv = self.project_venv();
        self.check_not_other(&venv)?;

        if !venv.exists() {
            self.create()?.wait().await?;
            if !venv.exists() {
                return Err(DocenvError::NotFound(venv.path));
            }
        }

        // Re-check: another command may have activated something meanwhile.
        let mut st = self.session.state();
        match st.active().cloned() {
            Some(active) if active.path == venv.path => {
                drop(st);
                self.session.notify(
                    Level::Info,
                    format!("Virtual environment '{}' is already active", venv.name),
                );
                return Ok(Activation::AlreadyActive);
            }
            Some(active) => return Err(DocenvError::AlreadyActive(active.name)),
            None => {}
        }

        let preserved = self.session.config().existing_preserved_paths();
        st.activate(
            ActiveVenv {
                name: venv.name.clone(),
                path: venv.path.clone(),
            },
            &venv.bin_dir(),
            preserved,
        )?;
        drop(st);

        tracing::info!(venv = %venv.name, "virtual environment activated");
        self.session.notify(
            Level::Info,
            format!("Activated virtual environment '{}'", venv.name),
        );
        Ok(Activation::Activated)
    }

    pub fn deactivate(&self) -> Result<()> {
        let venv = self.session.state().deactivate()?;
        tracing::info!(venv = %venv.name, "virtual environment deactivated");
        self.session.notify(
            Level::Info,
            format!("Deactivated virtual environment '{}'", venv.name),
        );
        Ok(())
    }

    /// Delete this project's venv directory. An active venv is deactivated
    /// first.
    pub fn remove(&self) -> Result<()> {
        let venv = self.project_venv();
        if !venv.exists() {
            return Err(DocenvError::NotFound(venv.path));
        }
        let is_ours = self
            .session
            .state()
            .active()
            .is_some_and(|a| a.path == venv.path);
        if is_ours {
            self.deactivate()?;
        }
        std::fs::remove_dir_all(&venv.path)?;
        tracing::info!(venv = %venv.name, "virtual environment removed");
        self.session.notify(
            Level::Info,
            format!("Removed virtual environment {}", venv.path.display()),
        );
        Ok(())
    }

    pub fn status(&self) -> VenvStatus {
        let venv = self.project_venv();
        let current = self.session.state().active().cloned();
        let interpreter = self.interpreter_path();
        let python_version = interpreter.as_ref().and_then(|py| {
            let spec = self.session.prepare(CommandSpec::new(py).arg("--version"));
            let out = self.session.runner().run_blocking(&spec).ok()?;
            if !out.success() {
                return None;
            }
            // Older pythons print the version on stderr.
            let text = if out.stdout.trim().is_empty() {
                out.stderr
            } else {
                out.stdout
            };
            Some(text.trim().to_string()).filter(|s| !s.is_empty())
        });
        VenvStatus {
            exists: venv.exists(),
            active: current.as_ref().is_some_and(|a| a.path == venv.path),
            active_venv: current.map(|a| a.name),
            interpreter,
            python_version,
            name: venv.name,
            path: venv.path,
        }
    }

    fn check_not_other(&self, venv: &ProjectVenv) -> Result<()> {
        match self.session.state().active() {
            Some(active) if active.path != venv.path => {
                Err(DocenvError::AlreadyActive(active.name.clone()))
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::scripted::Script;
    use crate::session::fixture::{default_script, fixture, fixture_with};
    use std::ffi::OsString;

    #[tokio::test]
    async fn create_then_completion_leaves_directory() {
        let fx = fixture();
        let venv = fx.session.venv();
        assert!(!venv.exists());

        venv.create().unwrap().wait().await.unwrap();

        assert!(fx.venv_path().is_dir());
        assert!(fx.notifier.has(Level::Info, "created"));
        assert!(!fx.session.state().is_active());
    }

    #[tokio::test]
    async fn create_existing_fails() {
        let fx = fixture();
        std::fs::create_dir_all(fx.venv_path()).unwrap();
        let err = fx.session.venv().create().err().unwrap();
        assert!(matches!(err, DocenvError::AlreadyExists(_)));
        assert!(fx.runner.spawned_names().is_empty());
    }

    #[tokio::test]
    async fn create_failure_is_notified() {
        let fx = fixture_with(|spec| {
            if spec.has_arg("venv") {
                Script::Exit {
                    lines: vec!["Error: ensurepip failed".into()],
                    code: 1,
                }
            } else {
                default_script(spec)
            }
        });
        let err = fx.session.venv().create().unwrap().wait().await.unwrap_err();
        assert!(matches!(
            err,
            DocenvError::ProcessExitedNonZero { code: Some(1), .. }
        ));
        assert!(fx.notifier.has(Level::Error, "Failed to create"));
    }

    #[tokio::test]
    async fn activate_deactivate_restores_path() {
        let fx = fixture();
        let venv = fx.session.venv();
        let before = fx.session.state().path().to_os_string();

        venv.activate().await.unwrap();
        {
            let st = fx.session.state();
            let first = std::env::split_paths(st.path()).next().unwrap();
            assert_eq!(first, fx.venv_path().join(paths::VENV_BIN_DIR));
            let second = std::env::split_paths(st.path()).nth(1).unwrap();
            assert_eq!(second, fx.preserved_dir());
        }

        venv.deactivate().unwrap();
        assert_eq!(fx.session.state().path(), before.as_os_str());
        assert!(!venv.is_active());
    }

    #[tokio::test]
    async fn path_round_trip_survives_new_preserved_dir() {
        let fx = fixture();
        let before = fx.session.state().path().to_os_string();
        // Configured but absent at session start; shows up later.
        std::fs::create_dir_all(fx.tmp.path().join("missing")).unwrap();

        fx.session.venv().activate().await.unwrap();
        let during = fx.session.state().path().to_os_string();
        assert!(std::env::split_paths(&during).any(|p| p == fx.tmp.path().join("missing")));
        fx.session.venv().deactivate().unwrap();

        assert_eq!(fx.session.state().path(), before.as_os_str());
    }

    #[tokio::test]
    async fn activate_creates_missing_venv_and_waits() {
        let fx = fixture();
        let outcome = fx.session.venv().activate().await.unwrap();
        assert_eq!(outcome, Activation::Activated);
        assert!(fx.venv_path().is_dir());
        assert_eq!(fx.runner.spawned_names(), vec!["python3".to_string()]);
    }

    #[tokio::test]
    async fn activate_aborts_when_creation_fails() {
        let fx = fixture_with(|spec| {
            if spec.has_arg("venv") {
                Script::Exit {
                    lines: vec![],
                    code: 1,
                }
            } else {
                default_script(spec)
            }
        });
        let err = fx.session.venv().activate().await.unwrap_err();
        assert!(matches!(err, DocenvError::ProcessExitedNonZero { .. }));
        let st = fx.session.state();
        assert!(!st.is_active());
        let baseline = crate::state::compose_path(st.preserved(), st.original_path()).unwrap();
        assert_eq!(st.path(), baseline.as_os_str());
    }

    #[tokio::test]
    async fn activate_twice_same_project_is_noop() {
        let fx = fixture();
        let venv = fx.session.venv();
        venv.activate().await.unwrap();
        let path = fx.session.state().path().to_os_string();

        let outcome = venv.activate().await.unwrap();

        assert_eq!(outcome, Activation::AlreadyActive);
        assert_eq!(fx.session.state().path(), path.as_os_str());
        assert!(fx.notifier.has(Level::Info, "already active"));
    }

    #[tokio::test]
    async fn activate_other_project_refused_without_touching_path() {
        let fx = fixture();
        let other = fx.venvs_dir().join("other");
        std::fs::create_dir_all(&other).unwrap();
        fx.session
            .state()
            .activate(
                ActiveVenv {
                    name: "other".into(),
                    path: other.clone(),
                },
                &paths::venv_bin_dir(&other),
                vec![],
            )
            .unwrap();
        let path: OsString = fx.session.state().path().to_os_string();

        let err = fx.session.venv().activate().await.unwrap_err();

        assert!(matches!(err, DocenvError::AlreadyActive(ref n) if n == "other"));
        assert_eq!(fx.session.state().path(), path.as_os_str());
        assert!(fx.runner.spawned_names().is_empty());
    }

    #[tokio::test]
    async fn deactivate_when_inactive_reports_not_active() {
        let fx = fixture();
        let venv = fx.session.venv();
        assert!(matches!(venv.deactivate(), Err(DocenvError::NotActive)));
        venv.activate().await.unwrap();
        venv.deactivate().unwrap();
        assert!(matches!(venv.deactivate(), Err(DocenvError::NotActive)));
    }

    #[tokio::test]
    async fn remove_missing_fails() {
        let fx = fixture();
        let err = fx.session.venv().remove().unwrap_err();
        assert!(matches!(err, DocenvError::NotFound(_)));
    }

    #[tokio::test]
    async fn remove_active_venv_deactivates_first() {
        let fx = fixture();
        let venv = fx.session.venv();
        venv.activate().await.unwrap();

        venv.remove().unwrap();

        assert!(!fx.venv_path().exists());
        assert!(!venv.is_active());
        assert!(fx.notifier.has(Level::Info, "Deactivated"));
    }

    #[tokio::test]
    async fn remove_inactive_venv_keeps_state() {
        let fx = fixture();
        std::fs::create_dir_all(fx.venv_path()).unwrap();
        fx.session.venv().remove().unwrap();
        assert!(!fx.venv_path().exists());
        assert!(!fx.session.state().is_active());
    }

    #[tokio::test]
    async fn interpreter_prefers_venv_once_active() {
        let fx = fixture();
        let venv = fx.session.venv();
        venv.activate().await.unwrap();
        crate::session::fixture::make_executable(&venv.project_venv().bin_dir().join("python3"));

        let py = venv.interpreter_path().unwrap();
        assert!(py.starts_with(fx.venv_path()));
    }

    #[tokio::test]
    async fn status_reports_version() {
        let fx = fixture_with(|spec| {
            if spec.has_arg("--version") {
                Script::Exit {
                    lines: vec!["Python 3.12.1".into()],
                    code: 0,
                }
            } else {
                default_script(spec)
            }
        });
        let status = fx.session.venv().status();
        assert_eq!(status.name, "handbook");
        assert!(!status.exists);
        assert!(!status.active);
        assert_eq!(status.python_version.as_deref(), Some("Python 3.12.1"));
    }
}
