//! YAML configuration file.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use super::DEFAULT_CONFIG_FILE;
use crate::error::ConfigError;

/// Which configuration file, if any, to read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ConfigFileSpec {
    /// `client.yaml` in the working directory; silently skipped if absent.
    #[default]
    Default,
    /// A file the caller asked for. Missing or invalid is fatal.
    Explicit(PathBuf),
    /// Do not read any file.
    Disabled,
}

/// TLS section of the configuration file.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct FileTlsConfig {
    #[serde(alias = "strategy")]
    pub tls_strategy: Option<String>,
    #[serde(alias = "cert_file")]
    pub tls_cert_file: Option<PathBuf>,
    #[serde(alias = "key_file")]
    pub tls_key_file: Option<PathBuf>,
    #[serde(alias = "root_ca_file")]
    pub tls_root_ca_file: Option<PathBuf>,
    #[serde(alias = "server_name")]
    pub tls_server_name: Option<String>,
}

/// Structural mirror of the `HATCHET_CLIENT_*` environment variables.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ConfigFile {
    pub token: Option<String>,
    pub host_port: Option<String>,
    pub api_url: Option<String>,
    pub log_level: Option<String>,
    pub namespace: Option<String>,
    pub tls_config: FileTlsConfig,
}

impl ConfigFile {
    /// Load the file selected by `spec`.
    pub fn load(spec: &ConfigFileSpec) -> Result<Self, ConfigError> {
        match spec {
            ConfigFileSpec::Disabled => Ok(Self::default()),
            ConfigFileSpec::Default => {
                let path = Path::new(DEFAULT_CONFIG_FILE);
                if !path.exists() {
                    tracing::debug!(path = %path.display(), "No default config file, skipping");
                    return Ok(Self::default());
                }
                Self::read(path)
            }
            ConfigFileSpec::Explicit(path) => {
                if !path.exists() {
                    return Err(ConfigError::FileNotFound { path: path.clone() });
                }
                Self::read(path)
            }
        }
    }

    fn read(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(path, &contents)
    }

    /// Parse YAML contents. `path` is only used in error messages.
    pub fn parse(path: &Path, contents: &str) -> Result<Self, ConfigError> {
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        let file: Self = serde_yaml::from_str(contents).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        tracing::debug!(path = %path.display(), "Loaded config file");
        Ok(file)
    }
}
