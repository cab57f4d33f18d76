//! Project configuration for gitsynq.
//!
//! Configuration lives next to the project in `.gitsynq.toml`:
//!
//! ```toml
//! [server]
//! host = "build.example.com"
//! port = 22
//! user = "deploy"
//! ssh_key_path = "~/.ssh/id_ed25519"
//! remote_path = "~/gitsynq"
//!
//! [project]
//! name = "my-service"
//! branch = "main"
//!
//! [bundle]
//! directory = ".gitsynq/bundles"
//! ```
//!
//! The core never writes this file; only `gitsynq init` does.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default config file name, resolved relative to the working directory.
pub const CONFIG_FILE_NAME: &str = ".gitsynq.toml";

/// Errors from loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config file not found at {0} (run `gitsynq init` first)")]
    NotFound(PathBuf),

    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("failed to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config file already exists at {0} (use --force to overwrite)")]
    AlreadyExists(PathBuf),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Remote host the project is synced to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub user: String,
    /// Explicit private key; tried before the conventional defaults.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_key_path: Option<PathBuf>,
    /// Root directory on the remote host. Bundles and the working copy live here.
    #[serde(default = "default_remote_path")]
    pub remote_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectConfig {
    pub name: String,
    #[serde(default = "default_branch")]
    pub branch: String,
    /// Canonical upstream remote; `<upstream>/<branch>` is the tracking ref.
    #[serde(default = "default_upstream")]
    pub upstream: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleConfig {
    #[serde(default = "default_bundle_dir")]
    pub directory: PathBuf,
    /// Keep local bundles after a successful push.
    #[serde(default = "default_keep")]
    pub keep: bool,
}

impl Default for BundleConfig {
    fn default() -> Self {
        Self {
            directory: default_bundle_dir(),
            keep: default_keep(),
        }
    }
}

/// Complete gitsynq configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub project: ProjectConfig,
    #[serde(default)]
    pub bundle: BundleConfig,
}

fn default_port() -> u16 {
    22
}

fn default_remote_path() -> String {
    "~/gitsynq".to_string()
}

fn default_branch() -> String {
    "main".to_string()
}

fn default_upstream() -> String {
    "origin".to_string()
}

fn default_bundle_dir() -> PathBuf {
    PathBuf::from(".gitsynq/bundles")
}

fn default_keep() -> bool {
    true
}

impl Config {
    /// Build a config with defaults for everything but the required fields.
    pub fn new(
        host: impl Into<String>,
        user: impl Into<String>,
        project: impl Into<String>,
    ) -> Self {
        Self {
            server: ServerConfig {
                host: host.into(),
                port: default_port(),
                user: user.into(),
                ssh_key_path: None,
                remote_path: default_remote_path(),
            },
            project: ProjectConfig {
                name: project.into(),
                branch: default_branch(),
                upstream: default_upstream(),
            },
            bundle: BundleConfig::default(),
        }
    }

    /// Resolve the config path: explicit path wins, else `.gitsynq.toml` in `dir`.
    pub fn resolve_path(explicit: Option<&Path>, dir: &Path) -> PathBuf {
        match explicit {
            Some(p) => p.to_path_buf(),
            None => dir.join(CONFIG_FILE_NAME),
        }
    }

    /// Load and validate a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: Config = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.expand_local_paths();
        config.validate()?;
        tracing::debug!(path = %path.display(), host = %config.server.host, "loaded config");
        Ok(config)
    }

    /// Write the config to `path`, refusing to clobber an existing file unless `force`.
    pub fn save(&self, path: &Path, force: bool) -> Result<(), ConfigError> {
        if path.exists() && !force {
            return Err(ConfigError::AlreadyExists(path.to_path_buf()));
        }
        self.validate()?;
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
                path: path.to_path_buf(),
                source,
            })?;
        }
        std::fs::write(path, content).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            ("server.host", &self.server.host),
            ("server.user", &self.server.user),
            ("server.remote_path", &self.server.remote_path),
            ("project.name", &self.project.name),
            ("project.branch", &self.project.branch),
            ("project.upstream", &self.project.upstream),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("{field} must not be empty")));
            }
        }
        if self.server.port == 0 {
            return Err(ConfigError::Invalid("server.port must be non-zero".into()));
        }
        if self.project.name.contains('/') {
            return Err(ConfigError::Invalid(
                "project.name must not contain '/'".into(),
            ));
        }
        Ok(())
    }

    fn expand_local_paths(&mut self) {
        if let Some(key) = self.server.ssh_key_path.take() {
            self.server.ssh_key_path = Some(expand_home(&key));
        }
        self.bundle.directory = expand_home(&self.bundle.directory);
    }

    /// Endpoint descriptor handed to the transport layer.
    pub fn endpoint(&self) -> crate::transport::Endpoint {
        crate::transport::Endpoint {
            host: self.server.host.clone(),
            port: self.server.port,
            user: self.server.user.clone(),
            key_path: self.server.ssh_key_path.clone(),
            remote_root: self.server.remote_path.clone(),
        }
    }
}

/// Expand a leading `~` to the local home directory.
pub fn expand_home(path: &Path) -> PathBuf {
    let Some(s) = path.to_str() else {
        return path.to_path_buf();
    };
    let Some(home) = dirs::home_dir() else {
        return path.to_path_buf();
    };
    if s == "~" {
        home
    } else if let Some(rest) = s.strip_prefix("~/") {
        home.join(rest)
    } else {
        path.to_path_buf()
    }
}
