//! rustls client configuration built from [`TlsSettings`].

use std::path::Path;
use std::sync::Arc;

use rustls::RootCertStore;
use rustls_pki_types::pem::PemObject;
use rustls_pki_types::{CertificateDer, PrivateKeyDer, ServerName};

use super::{TlsSettings, TlsStrategy};
use crate::error::ConfigError;

impl TlsSettings {
    /// Build the rustls client config for the transport.
    ///
    /// Returns `None` for [`TlsStrategy::None`].
    pub fn client_config(&self) -> Result<Option<Arc<rustls::ClientConfig>>, ConfigError> {
        if self.strategy == TlsStrategy::None {
            return Ok(None);
        }

        let mut roots = RootCertStore::empty();
        match &self.root_ca_file {
            Some(path) => {
                for cert in load_certs(path)? {
                    roots.add(cert).map_err(|e| {
                        ConfigError::Tls(format!("invalid root CA in {}: {e}", path.display()))
                    })?;
                }
            }
            None => roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned()),
        }

        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let builder = rustls::ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .map_err(|e| ConfigError::Tls(e.to_string()))?
            .with_root_certificates(roots);

        let config = match (self.strategy, &self.cert_file, &self.key_file) {
            (TlsStrategy::Mtls, Some(cert_file), Some(key_file)) => {
                let certs = load_certs(cert_file)?;
                let key = PrivateKeyDer::from_pem_file(key_file).map_err(|e| {
                    ConfigError::Tls(format!("cannot read key {}: {e}", key_file.display()))
                })?;
                builder
                    .with_client_auth_cert(certs, key)
                    .map_err(|e| ConfigError::Tls(e.to_string()))?
            }
            (TlsStrategy::Mtls, _, _) => {
                return Err(ConfigError::MissingRequired {
                    key: "tls_cert_file/tls_key_file".to_string(),
                    hint: "mTLS requires both a client certificate and key.".to_string(),
                });
            }
            _ => builder.with_no_client_auth(),
        };

        Ok(Some(Arc::new(config)))
    }

    /// The server name presented for certificate verification.
    pub fn server_name(&self) -> Result<ServerName<'static>, ConfigError> {
        ServerName::try_from(self.server_name.clone()).map_err(|e| ConfigError::InvalidValue {
            key: "tls_server_name".to_string(),
            message: e.to_string(),
        })
    }
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, ConfigError> {
    let certs = CertificateDer::pem_file_iter(path)
        .map_err(|e| ConfigError::Tls(format!("cannot read {}: {e}", path.display())))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ConfigError::Tls(format!("invalid PEM in {}: {e}", path.display())))?;
    if certs.is_empty() {
        return Err(ConfigError::Tls(format!(
            "no certificates found in {}",
            path.display()
        )));
    }
    Ok(certs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn settings(strategy: TlsStrategy) -> TlsSettings {
        TlsSettings {
            strategy,
            cert_file: None,
            key_file: None,
            root_ca_file: None,
            server_name: "engine.example.com".to_string(),
        }
    }

    #[test]
    fn none_strategy_has_no_client_config() {
        assert!(settings(TlsStrategy::None).client_config().unwrap().is_none());
    }

    #[test]
    fn tls_strategy_uses_web_pki_roots() {
        let config = settings(TlsStrategy::Tls).client_config().unwrap();
        assert!(config.is_some());
    }

    #[test]
    fn missing_root_ca_file_is_tls_error() {
        let mut s = settings(TlsStrategy::Tls);
        s.root_ca_file = Some(PathBuf::from("/definitely/not/here/ca.pem"));
        assert!(matches!(s.client_config(), Err(ConfigError::Tls(_))));
    }

    #[test]
    fn empty_root_ca_file_is_rejected() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let mut s = settings(TlsStrategy::Tls);
        s.root_ca_file = Some(tmp.path().to_path_buf());
        assert!(matches!(s.client_config(), Err(ConfigError::Tls(_))));
    }

    #[test]
    fn mtls_without_files_is_rejected() {
        assert!(matches!(
            settings(TlsStrategy::Mtls).client_config(),
            Err(ConfigError::MissingRequired { .. })
        ));
    }

    #[test]
    fn server_name_parses() {
        let s = settings(TlsStrategy::Tls);
        assert!(s.server_name().is_ok());
        let mut bad = settings(TlsStrategy::Tls);
        bad.server_name = "not a hostname!".to_string();
        assert!(bad.server_name().is_err());
    }
}
