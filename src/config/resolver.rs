//! Merges overrides, file, environment and token claims into a
//! [`ClientConfig`].

use std::collections::HashMap;
use std::path::PathBuf;

use secrecy::SecretString;

use super::file::{ConfigFile, ConfigFileSpec, FileTlsConfig};
use super::token::decode_claims;
use super::{
    ClientConfig, ClientConfigOverrides, DEFAULT_API_URL, DEFAULT_HOST_PORT, ENV_PREFIX,
    LogLevel, TlsSettings, TlsStrategy, normalize_namespace,
};
use crate::error::ConfigError;

/// A captured set of environment variables.
#[derive(Debug, Clone, Default)]
pub struct EnvSnapshot {
    vars: HashMap<String, String>,
}

impl EnvSnapshot {
    /// Capture the current process environment.
    pub fn from_process() -> Self {
        Self {
            vars: std::env::vars().collect(),
        }
    }

    /// Build a snapshot from explicit pairs.
    pub fn from_pairs<K, V, I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Look up a variable; empty values count as unset.
    pub fn get(&self, key: &str) -> Option<String> {
        self.vars
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    }
}

/// Resolves the effective configuration. Pure apart from reading the
/// optional configuration file.
#[derive(Debug, Clone)]
pub struct ConfigResolver {
    env: EnvSnapshot,
    prefix: String,
}

impl ConfigResolver {
    pub fn new(env: EnvSnapshot) -> Self {
        Self {
            env,
            prefix: ENV_PREFIX.to_string(),
        }
    }

    /// Use a different environment variable prefix.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    fn env(&self, suffix: &str) -> Option<String> {
        self.env.get(&format!("{}_{suffix}", self.prefix))
    }

    fn env_var_name(&self, suffix: &str) -> String {
        format!("{}_{suffix}", self.prefix)
    }

    /// Resolve the effective configuration.
    pub fn resolve(
        &self,
        overrides: ClientConfigOverrides,
        file_spec: ConfigFileSpec,
    ) -> Result<ClientConfig, ConfigError> {
        let file = ConfigFile::load(&file_spec)?;

        let token = first(
            overrides.token.clone(),
            file.token.clone(),
            self.env("TOKEN"),
        )
        .ok_or_else(|| ConfigError::MissingRequired {
            key: "token".to_string(),
            hint: format!(
                "Set {} or provide `token` in the config file.",
                self.env_var_name("TOKEN")
            ),
        })?;

        let claims = decode_claims(&token)?;

        let host_port = first(
            overrides.host_port.clone(),
            file.host_port.clone(),
            self.env("HOST_PORT"),
        )
        .or(claims.grpc_broadcast_address)
        .unwrap_or_else(|| DEFAULT_HOST_PORT.to_string());

        let api_url = first(
            overrides.api_url.clone(),
            file.api_url.clone(),
            self.env("API_URL"),
        )
        .or(claims.server_url)
        .unwrap_or_else(|| DEFAULT_API_URL.to_string());

        let tls = self.resolve_tls(&overrides, &file.tls_config, &host_port)?;

        let log_level = match overrides.log_level {
            Some(level) => level,
            None => match first(None, file.log_level, self.env("LOG_LEVEL")) {
                Some(raw) => raw.parse()?,
                None => LogLevel::default(),
            },
        };

        let namespace = first(overrides.namespace, file.namespace, self.env("NAMESPACE"))
            .map(|ns| normalize_namespace(&ns))
            .unwrap_or_default();

        tracing::debug!(
            tenant_id = %claims.tenant_id,
            host_port = %host_port,
            api_url = %api_url,
            tls_strategy = %tls.strategy,
            namespace = %namespace,
            "Resolved client configuration"
        );

        Ok(ClientConfig {
            token: SecretString::from(token),
            tenant_id: claims.tenant_id,
            host_port,
            api_url,
            tls,
            log_level,
            namespace,
        })
    }

    fn resolve_tls(
        &self,
        overrides: &ClientConfigOverrides,
        file_tls: &FileTlsConfig,
        host_port: &str,
    ) -> Result<TlsSettings, ConfigError> {
        let strategy = match overrides.tls_strategy {
            Some(strategy) => strategy,
            None => match first(
                None,
                file_tls.tls_strategy.clone(),
                self.env("TLS_STRATEGY"),
            ) {
                Some(raw) => raw.parse()?,
                None => TlsStrategy::default(),
            },
        };

        let path = |over: &Option<PathBuf>, from_file: &Option<PathBuf>, suffix: &str| {
            over.clone()
                .or_else(|| from_file.clone())
                .or_else(|| self.env(suffix).map(PathBuf::from))
        };

        let cert_file = path(
            &overrides.tls_cert_file,
            &file_tls.tls_cert_file,
            "TLS_CERT_FILE",
        );
        let key_file = path(&overrides.tls_key_file, &file_tls.tls_key_file, "TLS_KEY_FILE");
        let root_ca_file = path(
            &overrides.tls_root_ca_file,
            &file_tls.tls_root_ca_file,
            "TLS_ROOT_CA_FILE",
        );

        let server_name = first(
            overrides.tls_server_name.clone(),
            file_tls.tls_server_name.clone(),
            self.env("TLS_SERVER_NAME"),
        )
        .unwrap_or_else(|| host_of(host_port).to_string());

        if strategy == TlsStrategy::Mtls {
            if cert_file.is_none() {
                return Err(ConfigError::MissingRequired {
                    key: "tls_cert_file".to_string(),
                    hint: format!(
                        "mTLS requires a client certificate; set {}.",
                        self.env_var_name("TLS_CERT_FILE")
                    ),
                });
            }
            if key_file.is_none() {
                return Err(ConfigError::MissingRequired {
                    key: "tls_key_file".to_string(),
                    hint: format!(
                        "mTLS requires a client key; set {}.",
                        self.env_var_name("TLS_KEY_FILE")
                    ),
                });
            }
        }

        Ok(TlsSettings {
            strategy,
            cert_file,
            key_file,
            root_ca_file,
            server_name,
        })
    }
}

/// First non-empty value in precedence order.
fn first(
    over: Option<String>,
    from_file: Option<String>,
    from_env: Option<String>,
) -> Option<String> {
    [over, from_file, from_env]
        .into_iter()
        .flatten()
        .map(|v| v.trim().to_string())
        .find(|v| !v.is_empty())
}

/// Host part of `host:port`, tolerating bracketed IPv6 literals.
fn host_of(host_port: &str) -> &str {
    if let Some(rest) = host_port.strip_prefix('[')
        && let Some(end) = rest.find(']')
    {
        return &rest[..end];
    }
    match host_port.rsplit_once(':') {
        Some((host, _port)) => host,
        None => host_port,
    }
}
