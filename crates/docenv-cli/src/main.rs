mod cmd;
mod console;
mod output;
mod root;

use anyhow::Context;
use clap::{Parser, Subcommand};
use cmd::{action::ActionCommand, config::ConfigSubcommand};
use console::ConsoleNotifier;
use docenv_core::config::Config;
use docenv_core::process::TokioRunner;
use docenv_core::session::Session;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(
    name = "docenv",
    about = "Manage a documentation project's virtualenv and mkdocs server",
    version,
    propagate_version = true
)]
struct Cli {
    /// Project root (default: auto-detect from .docenv.yaml or mkdocs.yml)
    #[arg(long, global = true, env = "DOCENV_ROOT")]
    root: Option<PathBuf>,

    /// Output status as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(flatten)]
    Action(ActionCommand),

    /// Read commands interactively; state persists until exit
    Session,

    /// Inspect and scaffold configuration
    Config {
        #[command(subcommand)]
        subcommand: ConfigSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Action(ActionCommand::Serve { .. }) | Commands::Session => tracing::Level::INFO,
        _ => tracing::Level::WARN,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .init();

    let root = root::resolve_root(cli.root.as_deref());

    match run(&root, cli.command, cli.json) {
        Ok(true) => {}
        // The failure has already been reported as a notification.
        Ok(false) => std::process::exit(1),
        Err(e) => {
            // Print the full error chain (anyhow's alternate Display)
            eprintln!("error: {e:#}");
            std::process::exit(1);
        }
    }
}

fn run(root: &Path, command: Commands, json: bool) -> anyhow::Result<bool> {
    match command {
        Commands::Config { subcommand } => cmd::config::run(root, subcommand, json).map(|()| true),
        Commands::Session => {
            let (runtime, session) = start(root)?;
            let result = runtime.block_on(cmd::session::run(&session, json));
            // A stdin read may still be pending after Ctrl-C.
            runtime.shutdown_timeout(Duration::from_millis(100));
            result.map(|()| true)
        }
        Commands::Action(action) => {
            let (runtime, session) = start(root)?;
            runtime.block_on(cmd::action::run_once(&session, action.into(), json))
        }
    }
}

/// Single-threaded event loop plus a session over the real environment.
fn start(root: &Path) -> anyhow::Result<(tokio::runtime::Runtime, Arc<Session>)> {
    let config = Config::load(root).context("failed to load config")?;
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let session = Session::open(
        root.to_path_buf(),
        config,
        Arc::new(TokioRunner),
        Arc::new(ConsoleNotifier),
    )
    .context("failed to capture the process environment")?;
    Ok((runtime, session))
}
