//! The single `mkdocs serve` process of a session.
//!
//! The server borrows the active venv: when it exits, for whatever reason,
//! its slot is cleared and the venv is deactivated.

use crate::error::{DocenvError, Result};
use crate::notify::Level;
use crate::paths;
use crate::process::{self, CommandSpec};
use crate::session::Session;
use crate::state::ServerPhase;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

pub const TOOL: &str = "mkdocs";

#[derive(Debug, Clone, Serialize)]
pub struct ServerStatus {
    pub venv_active: bool,
    pub venv_name: Option<String>,
    pub tool_installed: bool,
    pub manifest_present: bool,
    pub server_running: bool,
    pub phase: ServerPhase,
    pub port: Option<u16>,
    pub pid: Option<u32>,
    pub started_at: Option<DateTime<Utc>>,
}

pub struct ServerManager {
    session: Arc<Session>,
}

impl ServerManager {
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }

    /// `mkdocs` inside the active venv, if installed there.
    pub fn tool_path(&self) -> Option<PathBuf> {
        let venv = self.session.state().active()?.path.clone();
        let bin = paths::venv_bin_dir(&venv);
        which::which_in(TOOL, Some(&bin), self.session.root()).ok()
    }

    pub fn manifest_present(&self) -> bool {
        paths::manifest_path(self.session.root()).is_file()
    }

    /// Preconditions shared by serve and build: active venv (activated on
    /// demand), tool installed, manifest present.
    pub(crate) async fn ensure_ready(&self) -> Result<PathBuf> {
        if !self.session.state().is_active() {
            self.session.venv().activate().await?;
        }
        let active = self
            .session
            .state()
            .active()
            .map(|a| a.path.clone())
            .ok_or(DocenvError::NotActive)?;
        let tool = self
            .tool_path()
            .ok_or_else(|| DocenvError::ToolNotInstalled(active))?;
        if !self.manifest_present() {
            return Err(DocenvError::ManifestMissing(self.session.root().to_path_buf()));
        }
        Ok(tool)
    }

    /// Pick the port to bind, warning when the request is unusable.
    pub fn resolve_port(&self, requested: Option<&str>) -> u16 {
        let cfg = &self.session.config().mkdocs_server;
        let Some(raw) = requested.map(str::trim).filter(|s| !s.is_empty()) else {
            return cfg.default_port;
        };
        match raw.parse::<u16>() {
            Ok(port) if cfg.in_range(port) => port,
            _ => {
                let warning = DocenvError::PortOutOfRange {
                    requested: raw.to_string(),
                    start: cfg.port_range_start,
                    end: cfg.port_range_end,
                    fallback: cfg.default_port,
                };
                tracing::warn!("{warning}");
                self.session.notify(Level::Warn, warning.to_string());
                cfg.default_port
            }
        }
    }

    /// Start the server, replacing any running one. Returns the bound port.
    pub async fn start(&self, requested_port: Option<u16>) -> Result<u16> {
        let requested = requested_port.map(|p| p.to_string());
        self.start_with(requested.as_deref()).await
    }

    /// As [`start`](Self::start), with the port as typed by the user.
    pub async fn start_with(&self, requested_port: Option<&str>) -> Result<u16> {
        let tool = self.ensure_ready().await?;

        let previous = self.session.state().take_server();
        if let Some(slot) = previous {
            tracing::info!(port = slot.port, "stopping previous server");
            slot.handle.terminate().await;
            self.session.notify(
                Level::Info,
                format!("Stopped previous server on port {}", slot.port),
            );
        }

        let port = self.resolve_port(requested_port);

        // The venv may have been deactivated while the old server shut down.
        if !self.session.state().is_active() {
            return Err(DocenvError::NotActive);
        }

        self.session.state().begin_start();
        let spec = self.session.prepare(
            CommandSpec::new(tool)
                .arg("serve")
                .arg("-a")
                .arg(format!("localhost:{port}")),
        );
        let spawned = match self.session.runner().spawn(&spec) {
            Ok(s) => s,
            Err(e) => {
                self.session.state().abort_start();
                return Err(e);
            }
        };

        let generation = {
            let mut st = self.session.state();
            // A racing start may have filled the slot meanwhile.
            if let Some(stale) = st.take_server() {
                tokio::spawn(async move {
                    stale.handle.terminate().await;
                });
            }
            st.set_server(spawned.handle.clone(), port)
        };
        tracing::info!(port, pid = ?spawned.handle.pid(), "mkdocs server started");
        self.session.notify(
            Level::Info,
            format!("Serving documentation at http://localhost:{port}"),
        );

        let session = Arc::clone(&self.session);
        tokio::spawn(async move {
            let code = process::forward_output(spawned.events, session.notifier(), "mkdocs").await;
            on_exit(&session, generation, code);
        });

        Ok(port)
    }

    /// Terminate the running server and deactivate its venv.
    pub async fn stop(&self) -> Result<()> {
        let slot = self
            .session
            .state()
            .take_server()
            .ok_or(DocenvError::NotRunning)?;

        if !slot.handle.is_alive() {
            tracing::warn!(port = slot.port, "cleared stale server handle");
            // The exit monitor no longer owns the slot, so release the venv here.
            match self.session.venv().deactivate() {
                Ok(()) | Err(DocenvError::NotActive) => {}
                Err(e) => tracing::warn!("deactivate after stale handle failed: {e}"),
            }
            return Err(DocenvError::NotRunning);
        }

        slot.handle.terminate().await;
        tracing::info!(port = slot.port, "mkdocs server stopped");
        self.session.notify(
            Level::Info,
            format!("Stopped server on port {}", slot.port),
        );
        match self.session.venv().deactivate() {
            Ok(()) | Err(DocenvError::NotActive) => Ok(()),
            Err(e) => Err(e),
        }
    }

    pub fn is_running(&self) -> bool {
        self.session
            .state()
            .server()
            .is_some_and(|s| s.handle.is_alive())
    }

    pub fn status(&self) -> ServerStatus {
        let (venv_active, venv_name, phase, slot) = {
            let st = self.session.state();
            (
                st.is_active(),
                st.active().map(|a| a.name.clone()),
                st.phase(),
                st.server().cloned(),
            )
        };
        let server_running = slot.as_ref().is_some_and(|s| s.handle.is_alive());
        ServerStatus {
            venv_active,
            venv_name,
            tool_installed: self.tool_path().is_some(),
            manifest_present: self.manifest_present(),
            server_running,
            phase,
            port: slot.as_ref().map(|s| s.port),
            pid: slot.as_ref().and_then(|s| s.handle.pid()),
            started_at: slot.as_ref().map(|s| s.started_at),
        }
    }

    /// URL of the running server, or of the default port.
    pub fn url(&self) -> String {
        let port = self
            .session
            .state()
            .port()
            .unwrap_or(self.session.config().mkdocs_server.default_port);
        format!("http://localhost:{port}")
    }
}

/// Exit transition: clear the slot if it is still ours, then deactivate.
fn on_exit(session: &Arc<Session>, generation: u64, code: Option<i32>) {
    let cleared = session.state().take_server_if(generation);
    let Some(slot) = cleared else {
        // Stopped explicitly or replaced by a newer server.
        return;
    };
    tracing::info!(port = slot.port, ?code, "mkdocs server exited");
    let level = if code == Some(0) { Level::Info } else { Level::Warn };
    let reason = match code {
        Some(c) => format!("exit code {c}"),
        None => "terminated".to_string(),
    };
    session.notify(
        level,
        format!("Server on port {} exited ({reason})", slot.port),
    );
    if let Err(e) = session.venv().deactivate() {
        session.notify(e.level(), e.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::scripted::Script;
    use crate::session::fixture::{default_script, fixture, fixture_with, Fixture};
    use std::time::Duration;

    async fn ready() -> Fixture {
        let fx = fixture();
        fx.install_venv_with_tool();
        fx.write_manifest();
        fx
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn start_without_manifest_fails_and_stays_stopped() {
        let fx = fixture();
        let venv = fx.session.venv();
        venv.create().unwrap().wait().await.unwrap();
        assert!(fx.venv_path().is_dir());
        venv.activate().await.unwrap();
        crate::session::fixture::make_executable(&venv.project_venv().bin_dir().join("mkdocs"));

        let err = fx.session.server().start(None).await.unwrap_err();

        assert!(matches!(err, DocenvError::ManifestMissing(_)));
        let st = fx.session.state();
        assert_eq!(st.phase(), ServerPhase::Stopped);
        assert!(st.server().is_none());
        assert!(st.is_active());
    }

    #[tokio::test]
    async fn start_without_tool_fails() {
        let fx = fixture();
        fx.write_manifest();
        let err = fx.session.server().start(None).await.unwrap_err();
        assert!(matches!(err, DocenvError::ToolNotInstalled(_)));
        assert!(fx.session.state().server().is_none());
    }

    #[tokio::test]
    async fn start_activates_on_demand() {
        let fx = ready().await;
        let port = fx.session.server().start(None).await.unwrap();
        assert_eq!(port, 8000);
        let st = fx.session.state();
        assert!(st.is_active());
        assert_eq!(st.phase(), ServerPhase::Running);
        assert_eq!(st.port(), Some(8000));
    }

    #[tokio::test]
    async fn serve_then_restart_out_of_range() {
        let fx = ready().await;
        fx.session.venv().activate().await.unwrap();
        let server = fx.session.server();

        assert_eq!(server.start(Some(8050)).await.unwrap(), 8050);
        assert_eq!(fx.session.state().port(), Some(8050));

        assert_eq!(server.start(Some(9999)).await.unwrap(), 8000);
        settle().await;

        assert_eq!(fx.session.state().port(), Some(8000));
        assert_eq!(fx.runner.live_count(), 1);
        assert!(fx.session.state().is_active());
        assert!(fx.notifier.has(Level::Warn, "9999"));

        let spec = fx.runner.spawned.lock().unwrap().last().cloned().unwrap();
        assert!(spec.has_arg("localhost:8000"));
    }

    #[tokio::test]
    async fn second_start_observes_single_handle() {
        let fx = ready().await;
        let server = fx.session.server();
        server.start(None).await.unwrap();
        let first_pid = fx.session.state().server().unwrap().handle.pid();

        server.start(None).await.unwrap();

        let handles = fx.runner.handles.lock().unwrap().clone();
        assert_eq!(handles.len(), 2);
        assert!(!handles[0].is_alive());
        let st = fx.session.state();
        let slot = st.server().unwrap();
        assert_ne!(slot.handle.pid(), first_pid);
        assert_eq!(slot.handle.pid(), handles[1].pid());
    }

    #[tokio::test]
    async fn stop_restores_path_and_deactivates() {
        let fx = ready().await;
        let before = fx.session.state().path().to_os_string();
        let server = fx.session.server();
        server.start(Some(8010)).await.unwrap();

        server.stop().await.unwrap();
        settle().await;

        let st = fx.session.state();
        assert!(st.server().is_none());
        assert_eq!(st.port(), None);
        assert!(!st.is_active());
        assert_eq!(st.path(), before.as_os_str());
        assert_eq!(fx.runner.live_count(), 0);
    }

    #[tokio::test]
    async fn stop_without_server_leaves_state_untouched() {
        let fx = ready().await;
        fx.session.venv().activate().await.unwrap();
        let path = fx.session.state().path().to_os_string();

        let err = fx.session.server().stop().await.unwrap_err();

        assert!(matches!(err, DocenvError::NotRunning));
        let st = fx.session.state();
        assert!(st.is_active());
        assert!(st.server().is_none());
        assert_eq!(st.path(), path.as_os_str());
    }

    #[tokio::test]
    async fn server_exit_deactivates_venv() {
        let fx = fixture_with(|spec| {
            if spec.has_arg("serve") {
                Script::Exit {
                    lines: vec!["Error: Config value 'nav'".into()],
                    code: 1,
                }
            } else {
                default_script(spec)
            }
        });
        fx.install_venv_with_tool();
        fx.write_manifest();

        fx.session.server().start(None).await.unwrap();
        tokio::time::timeout(Duration::from_secs(5), async {
            while fx.session.state().is_active() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("venv was not deactivated after server exit");

        let st = fx.session.state();
        assert!(st.server().is_none());
        assert_eq!(st.phase(), ServerPhase::Stopped);
        drop(st);
        assert!(fx.notifier.has(Level::Warn, "exit code 1"));
    }

    #[tokio::test]
    async fn stop_with_stale_handle_clears_slot() {
        let fx = ready().await;
        fx.session.venv().activate().await.unwrap();
        // A slot whose process died with no exit monitor watching it.
        let (handle, control) = crate::process::ProcessHandle::channel(Some(4242));
        fx.session.state().set_server(handle.clone(), 8040);
        control.exit(Some(0));
        assert!(!handle.is_alive());

        let err = fx.session.server().stop().await.unwrap_err();

        assert!(matches!(err, DocenvError::NotRunning));
        let st = fx.session.state();
        assert!(st.server().is_none());
        assert_eq!(st.phase(), ServerPhase::Stopped);
        assert!(!st.is_active());
        drop(st);
        assert!(!fx.notifier.has(Level::Info, "Stopped server"));
    }

    #[tokio::test]
    async fn status_is_a_pure_read() {
        let fx = ready().await;
        let server = fx.session.server();
        let status = server.status();
        assert!(!status.venv_active);
        assert!(!status.server_running);
        assert!(!status.tool_installed);
        assert!(status.manifest_present);

        server.start(Some(8020)).await.unwrap();
        let status = server.status();
        assert!(status.venv_active);
        assert!(status.tool_installed);
        assert!(status.server_running);
        assert_eq!(status.port, Some(8020));
        assert_eq!(status.venv_name.as_deref(), Some("handbook"));
        assert_eq!(server.url(), "http://localhost:8020");
    }

    #[tokio::test]
    async fn resolve_port_rejects_garbage() {
        let fx = fixture();
        let server = fx.session.server();
        assert_eq!(server.resolve_port(None), 8000);
        assert_eq!(server.resolve_port(Some("8042")), 8042);
        assert_eq!(server.resolve_port(Some("abc")), 8000);
        assert!(fx.notifier.has(Level::Warn, "abc"));
    }
}
