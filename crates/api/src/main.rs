use std::sync::Arc;

use anyhow::Context;

use pelleterp_infra::{AppConfig, Services};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    pelleterp_observability::init();

    let config = AppConfig::load().context("failed to read configuration")?;
    let services = Services::from_config(&config)
        .await
        .context("failed to open the document store")?;

    let app = pelleterp_api::app::build_app(Arc::new(services), &config.jwt_secret);

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    tracing::info!(addr = %listener.local_addr()?, "listening");

    axum::serve(listener, app).await?;
    Ok(())
}
