use std::sync::Arc;

use botmetrics_gateway::app::{app, AppState};
use botmetrics_gateway::config;
use botmetrics_gateway::database::{PgConnector, PoolManager};
use botmetrics_gateway::registry::TenantRegistry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present so cargo run picks up GRAFANA_URL, tenant DB URLs, etc.
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt::init();

    let config = Arc::new(config::config().clone());
    tracing::info!("Starting botmetrics gateway in {:?} mode", config.environment);

    let registry = Arc::new(TenantRegistry::from_file(&config.tenants_file)?);
    let connector = Arc::new(PgConnector::new(&config.database));
    let pools = Arc::new(PoolManager::new(registry.clone(), connector));

    // Proxied responses must reach the client exactly as Grafana issued
    // them, redirects included. The timeout covers the connect phase only
    // so long-lived dashboard streams are never cut off mid-body.
    let http = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .connect_timeout(std::time::Duration::from_secs(
            config.proxy.connect_timeout_secs,
        ))
        .build()?;

    let state = AppState { config: config.clone(), registry, pools, http };
    let router = app(state.clone());

    let bind_addr = format!("0.0.0.0:{}", config.server.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;

    println!("🚀 Botmetrics gateway listening on http://{}", bind_addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Drain tenant pools once the listener has stopped accepting
    state.pools.release_all().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to install shutdown handler: {}", e);
    }
}
