//! Client configuration.
//!
//! The effective configuration is merged from four sources, highest
//! precedence first:
//! 1. explicit overrides passed by the embedding application
//! 2. an optional YAML configuration file
//! 3. `HATCHET_CLIENT_*` environment variables
//! 4. claims embedded in the auth token (endpoint and API URL only)
//!
//! Only [`ConfigResolver`] reads the environment or the filesystem. Everything
//! downstream receives an immutable [`ClientConfig`].

pub mod file;
pub mod resolver;
pub mod tls;
pub mod token;

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use secrecy::SecretString;

use crate::error::ConfigError;

pub use file::{ConfigFile, ConfigFileSpec};
pub use resolver::{ConfigResolver, EnvSnapshot};
pub use token::TokenClaims;

/// Prefix shared by every configuration environment variable.
pub const ENV_PREFIX: &str = "HATCHET_CLIENT";

/// Configuration file looked up relative to the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "client.yaml";

/// Fallback dispatch endpoint when no source supplies one.
pub const DEFAULT_HOST_PORT: &str = "localhost:7070";

/// Fallback API base URL when no source supplies one.
pub const DEFAULT_API_URL: &str = "http://localhost:8080";

/// Separator appended to a non-empty namespace.
pub const NAMESPACE_SEPARATOR: char = '_';

/// How the transport secures its connection to the dispatch service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TlsStrategy {
    /// Plaintext.
    None,
    /// Server-authenticated TLS.
    #[default]
    Tls,
    /// Mutual TLS with a client certificate.
    Mtls,
}

impl FromStr for TlsStrategy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "tls" => Ok(Self::Tls),
            "mtls" => Ok(Self::Mtls),
            other => Err(ConfigError::InvalidValue {
                key: "tls_strategy".to_string(),
                message: format!("expected one of none, tls, mtls (got '{other}')"),
            }),
        }
    }
}

impl fmt::Display for TlsStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::None => "none",
            Self::Tls => "tls",
            Self::Mtls => "mtls",
        };
        write!(f, "{s}")
    }
}

/// Log verbosity requested by configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    Off,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// The `tracing_subscriber::EnvFilter` directive for this level.
    pub fn as_filter_directive(&self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

impl FromStr for LogLevel {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "OFF" => Ok(Self::Off),
            "DEBUG" => Ok(Self::Debug),
            "INFO" => Ok(Self::Info),
            "WARN" => Ok(Self::Warn),
            "ERROR" => Ok(Self::Error),
            other => Err(ConfigError::InvalidValue {
                key: "log_level".to_string(),
                message: format!("expected one of OFF, DEBUG, INFO, WARN, ERROR (got '{other}')"),
            }),
        }
    }
}

/// Resolved TLS settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsSettings {
    pub strategy: TlsStrategy,
    /// Client certificate (PEM), required for mTLS.
    pub cert_file: Option<PathBuf>,
    /// Client private key (PEM), required for mTLS.
    pub key_file: Option<PathBuf>,
    /// Custom root CA bundle (PEM). Web PKI roots are used when absent.
    pub root_ca_file: Option<PathBuf>,
    /// Server name used for certificate verification.
    pub server_name: String,
}

/// The effective, immutable client configuration.
#[derive(Debug)]
pub struct ClientConfig {
    /// Auth token presented to the dispatch service.
    pub token: SecretString,
    /// Tenant derived from the token's `sub` claim.
    pub tenant_id: String,
    /// Dispatch service endpoint (`host:port`).
    pub host_port: String,
    /// REST API base URL.
    pub api_url: String,
    pub tls: TlsSettings,
    pub log_level: LogLevel,
    /// Lowercased namespace with trailing separator, or empty.
    pub namespace: String,
}

impl ClientConfig {
    /// Resolve configuration from the live process environment.
    pub fn from_env(
        overrides: ClientConfigOverrides,
        file: ConfigFileSpec,
    ) -> Result<Self, ConfigError> {
        ConfigResolver::new(EnvSnapshot::from_process()).resolve(overrides, file)
    }
}

/// Explicit values supplied by the embedding application. Every field wins
/// over all other sources when set.
#[derive(Debug, Clone, Default)]
pub struct ClientConfigOverrides {
    pub token: Option<String>,
    pub host_port: Option<String>,
    pub api_url: Option<String>,
    pub tls_strategy: Option<TlsStrategy>,
    pub tls_cert_file: Option<PathBuf>,
    pub tls_key_file: Option<PathBuf>,
    pub tls_root_ca_file: Option<PathBuf>,
    pub tls_server_name: Option<String>,
    pub log_level: Option<LogLevel>,
    pub namespace: Option<String>,
}

/// Normalize a namespace into a lowercase prefix ending in the separator.
pub fn normalize_namespace(raw: &str) -> String {
    let ns = raw.trim().to_lowercase();
    if ns.is_empty() || ns.ends_with(NAMESPACE_SEPARATOR) {
        ns
    } else {
        format!("{ns}{NAMESPACE_SEPARATOR}")
    }
}
