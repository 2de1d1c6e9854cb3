//! Scaffold a documentation project from a template repository.
//!
//! Stages run in order and the first failure stops the pipeline. Whatever
//! the earlier stages put on disk stays there.

use crate::error::{DocenvError, Result};
use crate::io;
use crate::notify::Level;
use crate::process::{self, CommandSpec};
use crate::session::Session;
use std::path::Path;
use std::sync::Arc;

pub struct Bootstrapper {
    session: Arc<Session>,
}

impl Bootstrapper {
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }

    pub async fn run(&self) -> Result<()> {
        if !self.session.state().is_active() {
            return Err(DocenvError::NotActive);
        }
        let cfg = &self.session.config().bootstrap;
        let repo = cfg
            .template_repo
            .clone()
            .ok_or(DocenvError::TemplateNotConfigured)?;

        let tmp = tempfile::Builder::new().prefix("docenv-template").tempdir()?;
        let clone_dir = tmp.path().join("template");

        // 1. clone
        let mut git = CommandSpec::new("git").args(["clone", "--depth", "1"]);
        if let Some(branch) = &cfg.template_branch {
            git = git.arg("--branch").arg(branch);
        }
        let git = git.arg(&repo).arg(clone_dir.clone());
        self.session
            .notify(Level::Info, format!("Cloning template {repo}..."));
        self.run_stage(git, "git clone").await?;

        // 2. copy
        let root = self.session.root();
        for rel in &cfg.copy_paths {
            let src = clone_dir.join(rel);
            let dst = root.join(rel);
            if !src.exists() {
                self.session
                    .notify(Level::Warn, format!("Template has no '{rel}', skipped"));
                continue;
            }
            if dst.exists() {
                self.session
                    .notify(Level::Warn, format!("'{rel}' already exists, kept as is"));
                continue;
            }
            io::copy_tree(&src, &dst)?;
            tracing::debug!(path = %rel, "copied from template");
        }

        // 3. install
        let requirements = root.join(&cfg.requirements_file);
        if requirements.is_file() {
            let python = self
                .session
                .venv()
                .interpreter_path()
                .ok_or(DocenvError::InterpreterNotFound)?;
            let pip = CommandSpec::new(python)
                .args(["-m", "pip", "install", "-r"])
                .arg(requirements.clone());
            self.session
                .notify(Level::Info, "Installing documentation dependencies...");
            self.run_stage(pip, "pip install").await?;
        }

        // 4. cleanup
        for rel in &cfg.cleanup_paths {
            if io::remove_path(&root.join(rel))? {
                tracing::debug!(path = %rel, "removed template scaffolding");
            }
        }
        drop(tmp);

        self.session
            .notify(Level::Info, "Documentation project is ready");
        Ok(())
    }

    async fn run_stage(&self, spec: CommandSpec, label: &str) -> Result<()> {
        let spec = self.session.prepare(spec);
        let spawned = self.session.runner().spawn(&spec)?;
        let code = process::forward_output(spawned.events, self.session.notifier(), label).await;
        if code == Some(0) {
            Ok(())
        } else {
            Err(DocenvError::ProcessExitedNonZero {
                program: label.to_string(),
                code,
            })
        }
    }
}

/// Whether `root` already looks like a documentation project.
pub fn is_scaffolded(root: &Path) -> bool {
    crate::paths::manifest_path(root).is_file()
}
