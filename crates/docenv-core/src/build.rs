use crate::error::{DocenvError, Result};
use crate::notify::{Level, Stream};
use crate::process::CommandSpec;
use crate::session::Session;
use std::sync::Arc;

/// Runs `mkdocs build` to completion in the foreground.
pub struct DocsBuilder {
    session: Arc<Session>,
}

impl DocsBuilder {
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }

    pub async fn build(&self) -> Result<()> {
        let tool = self.session.server().ensure_ready().await?;
        let spec = self.session.prepare(CommandSpec::new(tool).arg("build"));

        self.session.notify(Level::Info, "Building documentation...");
        let out = self.session.runner().run_blocking(&spec)?;

        let notifier = self.session.notifier();
        for line in out.stdout.lines() {
            notifier.output("build", Stream::Stdout, line);
        }
        for line in out.stderr.lines() {
            notifier.output("build", Stream::Stderr, line);
        }

        if !out.success() {
            return Err(DocenvError::ProcessExitedNonZero {
                program: "mkdocs build".into(),
                code: out.code,
            });
        }
        let site = self.session.root().join("site");
        self.session.notify(
            Level::Info,
            format!("Documentation built into {}", site.display()),
        );
        Ok(())
    }
}
