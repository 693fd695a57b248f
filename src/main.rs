use std::path::PathBuf;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use action_worker::config::{ClientConfig, ClientConfigOverrides, ConfigFileSpec};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let file = match std::env::args_os().nth(1) {
        Some(path) => ConfigFileSpec::Explicit(PathBuf::from(path)),
        None => ConfigFileSpec::Default,
    };

    let config = ClientConfig::from_env(ClientConfigOverrides::default(), file)
        .context("failed to resolve client configuration")?;

    // RUST_LOG wins over the configured level
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_filter_directive())),
        )
        .with_target(false)
        .init();

    log_summary(&config);

    let tls = config
        .tls
        .client_config()
        .context("TLS settings are unusable")?;
    if tls.is_some() {
        config.tls.server_name().context("invalid TLS server name")?;
    }

    tracing::info!("Configuration OK");
    Ok(())
}

fn log_summary(config: &ClientConfig) {
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        tenant_id = %config.tenant_id,
        host_port = %config.host_port,
        api_url = %config.api_url,
        tls = %config.tls.strategy,
        server_name = %config.tls.server_name,
        namespace = %config.namespace,
        "Resolved client configuration"
    );
}
