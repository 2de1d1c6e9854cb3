use crate::output::print_json;
use clap::Subcommand;
use docenv_core::dispatch::{self, Action};
use docenv_core::session::Session;
use std::sync::Arc;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Subcommand definition
// ---------------------------------------------------------------------------

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum ActionCommand {
    /// Scaffold the documentation project from the configured template
    Setup,
    /// Start the mkdocs development server
    Serve {
        /// Port to bind; values outside the configured range use the default
        port: Option<String>,
    },
    /// Stop the running mkdocs server
    Stop,
    /// Build the static site
    Build,
    /// Show venv and server status
    Status,
    /// Open the served documentation in a browser
    Open,
    /// Create the project's virtual environment
    VenvCreate,
    /// Activate the project's virtual environment, creating it if needed
    VenvActivate,
    /// Deactivate the active virtual environment
    VenvDeactivate,
    /// Show the project's virtual environment
    VenvStatus,
    /// Delete the project's virtual environment
    VenvRemove,
}

impl From<ActionCommand> for Action {
    fn from(cmd: ActionCommand) -> Self {
        match cmd {
            ActionCommand::Setup => Action::Setup,
            ActionCommand::Serve { port } => Action::Serve { port },
            ActionCommand::Stop => Action::Stop,
            ActionCommand::Build => Action::Build,
            ActionCommand::Status => Action::Status,
            ActionCommand::Open => Action::Open,
            ActionCommand::VenvCreate => Action::VenvCreate,
            ActionCommand::VenvActivate => Action::VenvActivate,
            ActionCommand::VenvDeactivate => Action::VenvDeactivate,
            ActionCommand::VenvStatus => Action::VenvStatus,
            ActionCommand::VenvRemove => Action::VenvRemove,
        }
    }
}

pub fn open_url(url: &str) -> std::io::Result<()> {
    open::that(url)
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

/// Run one action inside a session. Status queries print JSON when asked.
pub async fn perform(session: &Arc<Session>, action: Action, json: bool) -> anyhow::Result<bool> {
    match action {
        Action::Status if json => {
            let value = serde_json::json!({
                "server": session.server().status(),
                "venv": session.venv().status(),
            });
            print_json(&value)?;
            Ok(true)
        }
        Action::VenvStatus if json => {
            print_json(&session.venv().status())?;
            Ok(true)
        }
        other => Ok(dispatch::run(session, other, &open_url).await),
    }
}

/// Run one action as a whole CLI invocation. Background jobs are awaited
/// so the process does not exit (and kill them) early.
pub async fn run_once(session: &Arc<Session>, action: Action, json: bool) -> anyhow::Result<bool> {
    match action {
        Action::VenvCreate => Ok(create_and_wait(session).await),
        Action::Serve { .. } => {
            if !perform(session, action, json).await? {
                return Ok(false);
            }
            Ok(hold_server(session).await)
        }
        other => perform(session, other, json).await,
    }
}

async fn create_and_wait(session: &Arc<Session>) -> bool {
    match session.venv().create() {
        // The job reports its own outcome.
        Ok(done) => done.wait().await.is_ok(),
        Err(e) => {
            session.notify(e.level(), e.to_string());
            false
        }
    }
}

/// Keep the server in the foreground until it exits or the user hits Ctrl-C.
async fn hold_server(session: &Arc<Session>) -> bool {
    let Some(handle) = session.state().server().map(|s| s.handle.clone()) else {
        return true;
    };
    tokio::select! {
        code = handle.wait() => {
            // Let the exit monitor report and release the venv.
            let _ = tokio::time::timeout(Duration::from_secs(1), async {
                while session.state().server().is_some() {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            })
            .await;
            code == Some(0)
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupted, stopping server");
            dispatch::run(session, Action::Stop, &open_url).await
        }
    }
}
