//! Command-invocation interface.
//!
//! Each [`Action`] maps to one operation. Whatever the outcome, the user hears
//! about it through the session's notifier; the caller only learns whether the
//! operation succeeded.

use crate::bootstrap;
use crate::error::{DocenvError, Result};
use crate::notify::Level;
use crate::session::Session;
use crate::venv::Activation;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Setup,
    Serve { port: Option<String> },
    Stop,
    Build,
    Status,
    Open,
    VenvCreate,
    VenvActivate,
    VenvDeactivate,
    VenvStatus,
    VenvRemove,
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Action::Setup => "setup",
            Action::Serve { .. } => "serve",
            Action::Stop => "stop",
            Action::Build => "build",
            Action::Status => "status",
            Action::Open => "open",
            Action::VenvCreate => "venv-create",
            Action::VenvActivate => "venv-activate",
            Action::VenvDeactivate => "venv-deactivate",
            Action::VenvStatus => "venv-status",
            Action::VenvRemove => "venv-remove",
        }
    }
}

/// Opens URLs for the Open command.
pub type UrlOpener<'a> = dyn Fn(&str) -> std::io::Result<()> + Send + Sync + 'a;

/// Run `action`, reporting any failure as a single notification.
pub async fn run(session: &Arc<Session>, action: Action, opener: &UrlOpener<'_>) -> bool {
    let name = action.name();
    tracing::debug!(command = name, "dispatch");
    match execute(session, action, opener).await {
        Ok(()) => true,
        Err(e) => {
            tracing::debug!(command = name, error = %e, "command failed");
            session.notify(e.level(), e.to_string());
            false
        }
    }
}

async fn execute(session: &Arc<Session>, action: Action, opener: &UrlOpener<'_>) -> Result<()> {
    match action {
        Action::Setup => {
            if bootstrap::is_scaffolded(session.root()) {
                session.notify(
                    Level::Info,
                    "mkdocs.yml already present; existing files will be kept",
                );
            }
            session.bootstrapper().run().await
        }
        Action::Serve { port } => session
            .server()
            .start_with(port.as_deref())
            .await
            .map(|_| ()),
        Action::Stop => session.server().stop().await,
        Action::Build => session.builder().build().await,
        Action::Status => {
            let status = session.server().status();
            let venv = session.venv().project_venv();
            let mut lines = vec![
                format!(
                    "venv:     {} ({})",
                    venv.name,
                    if status.venv_active { "active" } else { "inactive" }
                ),
                format!("mkdocs:   {}", yes_no(status.tool_installed, "installed", "not installed")),
                format!("manifest: {}", yes_no(status.manifest_present, "present", "missing")),
            ];
            match (status.server_running, status.port) {
                (true, Some(port)) => lines.push(format!("server:   running on port {port}")),
                _ => lines.push("server:   stopped".to_string()),
            }
            session.notify(Level::Info, lines.join("\n"));
            Ok(())
        }
        Action::Open => {
            let url = session.server().url();
            if !session.server().is_running() {
                session.notify(Level::Warn, format!("No server running; opening {url} anyway"));
            }
            opener(&url)?;
            session.notify(Level::Info, format!("Opened {url}"));
            Ok(())
        }
        Action::VenvCreate => {
            // Completion is reported by the background job itself.
            session.venv().create().map(|_| ())
        }
        Action::VenvActivate => session.venv().activate().await.map(|_: Activation| ()),
        Action::VenvDeactivate => {
            if session.state().server().is_some() {
                // The server borrows the venv; stopping it releases the venv too.
                return match session.server().stop().await {
                    Ok(()) | Err(DocenvError::NotRunning) => Ok(()),
                    Err(e) => Err(e),
                };
            }
            session.venv().deactivate()
        }
        Action::VenvStatus => {
            let s = session.venv().status();
            let mut lines = vec![
                format!("name:        {}", s.name),
                format!("path:        {}", s.path.display()),
                format!("exists:      {}", s.exists),
                format!("active:      {}", s.active),
            ];
            if let Some(other) = s.active_venv.filter(|_| !s.active) {
                lines.push(format!("active venv: {other}"));
            }
            if let Some(py) = &s.interpreter {
                lines.push(format!("interpreter: {}", py.display()));
            }
            if let Some(v) = &s.python_version {
                lines.push(format!("version:     {v}"));
            }
            session.notify(Level::Info, lines.join("\n"));
            Ok(())
        }
        Action::VenvRemove => {
            if session.state().server().is_some() {
                match session.server().stop().await {
                    Ok(()) | Err(DocenvError::NotRunning) => {}
                    Err(e) => return Err(e),
                }
            }
            session.venv().remove()
        }
    }
}

fn yes_no(value: bool, yes: &'static str, no: &'static str) -> &'static str {
    if value {
        yes
    } else {
        no
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::fixture::fixture;
    use std::sync::Mutex;

    fn no_browser(_: &str) -> std::io::Result<()> {
        Ok(())
    }

    #[tokio::test]
    async fn failures_become_one_notification() {
        let fx = fixture();
        let ok = run(&fx.session, Action::Stop, &no_browser).await;
        assert!(!ok);
        let notices = fx.notifier.take();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].level, Level::Warn);
        assert!(notices[0].message.contains("no mkdocs server"));
    }

    #[tokio::test]
    async fn scenario_create_activate_serve_without_manifest() {
        let fx = fixture();
        assert!(run(&fx.session, Action::VenvCreate, &no_browser).await);
        // Wait for the background creation job.
        tokio::time::timeout(std::time::Duration::from_secs(5), async {
            while !fx.notifier.has(Level::Info, "created at") {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        assert!(fx.venv_path().is_dir());

        assert!(run(&fx.session, Action::VenvActivate, &no_browser).await);
        assert!(fx.session.state().is_active());
        fx.install_venv_with_tool();

        let ok = run(&fx.session, Action::Serve { port: None }, &no_browser).await;
        assert!(!ok);
        assert!(fx.notifier.has(Level::Error, "mkdocs.yml not found"));
        assert!(fx.session.state().server().is_none());
    }

    #[tokio::test]
    async fn deactivate_while_serving_stops_server() {
        let fx = fixture();
        fx.install_venv_with_tool();
        fx.write_manifest();
        assert!(
            run(
                &fx.session,
                Action::Serve {
                    port: Some("8030".into())
                },
                &no_browser
            )
            .await
        );

        assert!(run(&fx.session, Action::VenvDeactivate, &no_browser).await);

        let st = fx.session.state();
        assert!(!st.is_active());
        assert!(st.server().is_none());
    }

    #[tokio::test]
    async fn remove_while_serving_stops_and_deletes() {
        let fx = fixture();
        fx.install_venv_with_tool();
        fx.write_manifest();
        assert!(run(&fx.session, Action::Serve { port: None }, &no_browser).await);

        assert!(run(&fx.session, Action::VenvRemove, &no_browser).await);

        assert!(!fx.venv_path().exists());
        assert!(!fx.session.state().is_active());
        assert_eq!(fx.runner.live_count(), 0);
    }

    #[tokio::test]
    async fn open_uses_running_port() {
        let fx = fixture();
        fx.install_venv_with_tool();
        fx.write_manifest();
        run(
            &fx.session,
            Action::Serve {
                port: Some("8077".into()),
            },
            &no_browser,
        )
        .await;

        let opened = Mutex::new(Vec::new());
        let opener = |url: &str| -> std::io::Result<()> {
            opened.lock().unwrap().push(url.to_string());
            Ok(())
        };
        assert!(run(&fx.session, Action::Open, &opener).await);
        assert_eq!(opened.lock().unwrap().as_slice(), ["http://localhost:8077"]);
    }

    #[tokio::test]
    async fn status_summarises_state() {
        let fx = fixture();
        fx.write_manifest();
        assert!(run(&fx.session, Action::Status, &no_browser).await);
        assert!(fx.notifier.has(Level::Info, "manifest: present"));
        assert!(fx.notifier.has(Level::Info, "server:   stopped"));
    }
}
