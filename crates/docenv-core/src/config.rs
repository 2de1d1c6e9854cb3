use crate::error::Result;
use crate::paths;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// ServerConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub default_port: u16,
    pub port_range_start: u16,
    pub port_range_end: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            default_port: 8000,
            port_range_start: 8000,
            port_range_end: 8100,
        }
    }
}

impl ServerConfig {
    pub fn in_range(&self, port: u16) -> bool {
        (self.port_range_start..=self.port_range_end).contains(&port)
    }
}

// ---------------------------------------------------------------------------
// BootstrapConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BootstrapConfig {
    pub template_repo: Option<String>,
    pub template_branch: Option<String>,
    /// Paths copied from the template clone into the project root.
    pub copy_paths: Vec<String>,
    pub requirements_file: String,
    /// Paths deleted from the project root once dependencies are installed.
    pub cleanup_paths: Vec<String>,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            template_repo: None,
            template_branch: None,
            copy_paths: vec![
                "docs".to_string(),
                paths::MANIFEST_FILE.to_string(),
                "requirements.txt".to_string(),
            ],
            requirements_file: "requirements.txt".to_string(),
            cleanup_paths: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config (top-level, fully resolved)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub venvs_dir: PathBuf,
    pub preserved_paths: Vec<PathBuf>,
    pub mkdocs_server: ServerConfig,
    pub bootstrap: BootstrapConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            venvs_dir: paths::expand_home(paths::DEFAULT_VENVS_DIR),
            preserved_paths: vec![paths::expand_home("~/.local/bin")],
            mkdocs_server: ServerConfig::default(),
            bootstrap: BootstrapConfig::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// ConfigFile (one layer on disk; every field optional)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub venvs_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preserved_paths: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mkdocs_server: Option<ServerFile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bootstrap: Option<BootstrapFile>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port_range_start: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port_range_end: Option<u16>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BootstrapFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_repo: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub copy_paths: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requirements_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cleanup_paths: Option<Vec<String>>,
}

impl ConfigFile {
    pub fn read(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let data = std::fs::read_to_string(path)?;
        if data.trim().is_empty() {
            return Ok(Some(Self::default()));
        }
        Ok(Some(serde_yaml::from_str(&data)?))
    }
}

impl Config {
    /// Overlay one config layer onto this config, field by field.
    pub fn merge(&mut self, file: ConfigFile) {
        if let Some(dir) = file.venvs_dir {
            self.venvs_dir = paths::expand_home(&dir);
        }
        if let Some(list) = file.preserved_paths {
            self.preserved_paths = list.iter().map(|p| paths::expand_home(p)).collect();
        }
        if let Some(server) = file.mkdocs_server {
            if let Some(v) = server.default_port {
                self.mkdocs_server.default_port = v;
            }
            if let Some(v) = server.port_range_start {
                self.mkdocs_server.port_range_start = v;
            }
            if let Some(v) = server.port_range_end {
                self.mkdocs_server.port_range_end = v;
            }
        }
        if let Some(b) = file.bootstrap {
            if b.template_repo.is_some() {
                self.bootstrap.template_repo = b.template_repo;
            }
            if b.template_branch.is_some() {
                self.bootstrap.template_branch = b.template_branch;
            }
            if let Some(v) = b.copy_paths {
                self.bootstrap.copy_paths = v;
            }
            if let Some(v) = b.requirements_file {
                self.bootstrap.requirements_file = v;
            }
            if let Some(v) = b.cleanup_paths {
                self.bootstrap.cleanup_paths = v;
            }
        }
    }

    /// Resolve the effective config for a project:
    /// defaults, then `~/.docenv/config.yaml`, then `{root}/.docenv.yaml`,
    /// then `DOCENV_VENVS_DIR`.
    pub fn load(root: &Path) -> Result<Self> {
        let mut cfg = Config::default();
        if let Ok(user) = paths::user_config_path() {
            if let Some(layer) = ConfigFile::read(&user)? {
                cfg.merge(layer);
            }
        }
        if let Some(layer) = ConfigFile::read(&paths::project_config_path(root))? {
            cfg.merge(layer);
        }
        if let Ok(dir) = std::env::var("DOCENV_VENVS_DIR") {
            if !dir.is_empty() {
                cfg.venvs_dir = paths::expand_home(&dir);
            }
        }
        Ok(cfg)
    }

    /// Preserved paths that currently exist on disk, in configured order.
    pub fn existing_preserved_paths(&self) -> Vec<PathBuf> {
        self.preserved_paths
            .iter()
            .filter(|p| p.is_dir())
            .cloned()
            .collect()
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();
        let server = &self.mkdocs_server;

        if server.port_range_start > server.port_range_end {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: format!(
                    "mkdocs_server.port_range_start ({}) is greater than port_range_end ({})",
                    server.port_range_start, server.port_range_end
                ),
            });
        }

        if !server.in_range(server.default_port) {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: format!(
                    "mkdocs_server.default_port {} is outside {}-{}",
                    server.default_port, server.port_range_start, server.port_range_end
                ),
            });
        }

        for p in &self.preserved_paths {
            if !p.is_dir() {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Warning,
                    message: format!("preserved path {} does not exist", p.display()),
                });
            }
        }

        if self.bootstrap.template_repo.is_none() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "bootstrap.template_repo is not set; setup will fail".to_string(),
            });
        }

        warnings
    }

    /// Starter `.docenv.yaml` contents listing every option with its default.
    pub fn starter_yaml() -> String {
        let file = ConfigFile {
            venvs_dir: Some(paths::DEFAULT_VENVS_DIR.to_string()),
            preserved_paths: Some(vec!["~/.local/bin".to_string()]),
            mkdocs_server: Some(ServerFile {
                default_port: Some(8000),
                port_range_start: Some(8000),
                port_range_end: Some(8100),
            }),
            bootstrap: Some(BootstrapFile {
                template_repo: None,
                template_branch: None,
                copy_paths: Some(BootstrapConfig::default().copy_paths),
                requirements_file: Some("requirements.txt".to_string()),
                cleanup_paths: Some(Vec::new()),
            }),
        };
        serde_yaml::to_string(&file).unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
