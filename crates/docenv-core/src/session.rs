use crate::build::DocsBuilder;
use crate::bootstrap::Bootstrapper;
use crate::config::Config;
use crate::error::Result;
use crate::notify::{Level, Notifier};
use crate::process::{CommandSpec, ProcessRunner};
use crate::server::ServerManager;
use crate::state::{self, EnvironmentState, SharedState};
use crate::venv::VenvManager;
use std::path::{Path, PathBuf};
use std::sync::{Arc, MutexGuard};

/// Everything one editing session needs: the project, its config, the
/// environment record and the collaborators used to reach the outside world.
pub struct Session {
    root: PathBuf,
    config: Config,
    state: SharedState,
    runner: Arc<dyn ProcessRunner>,
    notifier: Arc<dyn Notifier>,
}

impl Session {
    pub fn new(
        root: PathBuf,
        config: Config,
        state: EnvironmentState,
        runner: Arc<dyn ProcessRunner>,
        notifier: Arc<dyn Notifier>,
    ) -> Arc<Self> {
        Arc::new(Self {
            root,
            config,
            state: state.into_shared(),
            runner,
            notifier,
        })
    }

    /// Session over the real process environment.
    pub fn open(
        root: PathBuf,
        config: Config,
        runner: Arc<dyn ProcessRunner>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Arc<Self>> {
        let state = EnvironmentState::capture(config.existing_preserved_paths())?;
        Ok(Self::new(root, config, state, runner, notifier))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn state(&self) -> MutexGuard<'_, EnvironmentState> {
        state::lock(&self.state)
    }

    pub fn runner(&self) -> &dyn ProcessRunner {
        self.runner.as_ref()
    }

    pub fn notifier(&self) -> &dyn Notifier {
        self.notifier.as_ref()
    }

    pub fn notify(&self, level: Level, message: impl AsRef<str>) {
        self.notifier.notify(level, message.as_ref());
    }

    /// Apply the current PATH / venv variables and the project root to `spec`.
    pub fn prepare(&self, mut spec: CommandSpec) -> CommandSpec {
        let (set, remove) = self.state().env_overlay();
        for key in remove {
            spec = spec.env_remove(key);
        }
        for (k, v) in set {
            spec = spec.env(k, v);
        }
        if spec.cwd.is_none() {
            spec = spec.current_dir(&self.root);
        }
        spec
    }

    pub fn venv(self: &Arc<Self>) -> VenvManager {
        VenvManager::new(Arc::clone(self))
    }

    pub fn server(self: &Arc<Self>) -> ServerManager {
        ServerManager::new(Arc::clone(self))
    }

    pub fn bootstrapper(self: &Arc<Self>) -> Bootstrapper {
        Bootstrapper::new(Arc::clone(self))
    }

    pub fn builder(self: &Arc<Self>) -> DocsBuilder {
        DocsBuilder::new(Arc::clone(self))
    }
}
