use crate::error::{DocenvError, Result};
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// File and directory names
// ---------------------------------------------------------------------------

pub const MANIFEST_FILE: &str = "mkdocs.yml";
pub const PROJECT_CONFIG_FILE: &str = ".docenv.yaml";

pub const USER_DIR: &str = ".docenv";
pub const USER_CONFIG_FILE: &str = "config.yaml";
pub const DEFAULT_VENVS_DIR: &str = "~/.docenv/venvs";

#[cfg(windows)]
pub const VENV_BIN_DIR: &str = "Scripts";
#[cfg(not(windows))]
pub const VENV_BIN_DIR: &str = "bin";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn manifest_path(root: &Path) -> PathBuf {
    root.join(MANIFEST_FILE)
}

pub fn project_config_path(root: &Path) -> PathBuf {
    root.join(PROJECT_CONFIG_FILE)
}

pub fn user_dir() -> Result<PathBuf> {
    home::home_dir()
        .map(|h| h.join(USER_DIR))
        .ok_or(DocenvError::HomeNotFound)
}

pub fn user_config_path() -> Result<PathBuf> {
    Ok(user_dir()?.join(USER_CONFIG_FILE))
}

pub fn venv_bin_dir(venv: &Path) -> PathBuf {
    venv.join(VENV_BIN_DIR)
}

/// Base name of the project root, used as the venv name.
pub fn project_name(root: &Path) -> String {
    root.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "default".to_string())
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_home(path: &str) -> PathBuf {
    if path == "~" {
        if let Some(home) = home::home_dir() {
            return home;
        }
    } else if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = home::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
