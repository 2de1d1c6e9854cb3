use crate::notify::Level;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DocenvError {
    #[error("virtual environment already exists: {}", .0.display())]
    AlreadyExists(PathBuf),

    #[error("no virtual environment found at {}", .0.display())]
    NotFound(PathBuf),

    #[error("no virtual environment is active")]
    NotActive,

    #[error("virtual environment '{0}' is already active; deactivate it first")]
    AlreadyActive(String),

    #[error("mkdocs is not installed in the active virtual environment ({})", .0.display())]
    ToolNotInstalled(PathBuf),

    #[error("mkdocs.yml not found in {}", .0.display())]
    ManifestMissing(PathBuf),

    #[error("port {requested} is outside {start}-{end}, using default port {fallback}")]
    PortOutOfRange {
        requested: String,
        start: u16,
        end: u16,
        fallback: u16,
    },

    #[error("no mkdocs server is running")]
    NotRunning,

    #[error("mkdocs server is running on port {port}; stop it first")]
    ServerRunning { port: u16 },

    #[error("no python interpreter found on PATH")]
    InterpreterNotFound,

    #[error("no template repository configured (set bootstrap.template_repo)")]
    TemplateNotConfigured,

    #[error("failed to spawn '{program}': {reason}")]
    ProcessSpawnFailed { program: String, reason: String },

    #[error("'{program}' {}", describe_exit(.code))]
    ProcessExitedNonZero { program: String, code: Option<i32> },

    #[error("path entry contains a separator: {}", .0.display())]
    InvalidPathEntry(PathBuf),

    #[error("home directory not found: set HOME environment variable")]
    HomeNotFound,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

impl DocenvError {
    /// Severity used when the error is surfaced as a notification.
    pub fn level(&self) -> Level {
        match self {
            DocenvError::AlreadyExists(_)
            | DocenvError::NotActive
            | DocenvError::AlreadyActive(_)
            | DocenvError::PortOutOfRange { .. }
            | DocenvError::NotRunning
            | DocenvError::ServerRunning { .. } => Level::Warn,
            _ => Level::Error,
        }
    }
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(c) => format!("exited with code {c}"),
        None => "was terminated by a signal".to_string(),
    }
}

pub type Result<T> = std::result::Result<T, DocenvError>;
