use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorLayer,
};
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rust_lead_scoring::config::Config;
use rust_lead_scoring::api::handlers::{self, AppState};
use rust_lead_scoring::proxy_pool::ProxyPool;
use rust_lead_scoring::runner::BatchRunner;
use rust_lead_scoring::sink::MemorySink;

/// Loads the proxy file once, then keeps reloading it on the refresh interval.
async fn start_proxy_pool(config: &Config) -> Option<Arc<ProxyPool>> {
    if !config.proxy.enabled {
        tracing::info!("Proxy rotation disabled, registries are queried directly");
        return None;
    }

    let pool = Arc::new(ProxyPool::new(config.proxy.refresh_interval));
    pool.load_file(&config.proxy.file).await;
    tracing::info!(
        "✓ Proxy pool loaded: {} proxies from {}",
        pool.len(),
        config.proxy.file
    );

    let refresher = Arc::clone(&pool);
    let path = config.proxy.file.clone();
    let period = config.proxy.refresh_interval.max(Duration::from_secs(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        // The first tick completes immediately; the initial load already happened.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            refresher.load_file(&path).await;
            tracing::debug!(
                "Proxy pool refreshed: {} active, {} retired",
                refresher.len(),
                refresher.retired_count()
            );
        }
    });

    Some(pool)
}

/// Main entry point for the scoring service.
///
/// Initializes logging and configuration, loads the proxy pool, wires the
/// registry adapters into a batch runner, then serves the HTTP API.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rust_lead_scoring=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;
    tracing::info!("Configuration loaded successfully");

    let proxy_pool = start_proxy_pool(&config).await;

    let sink = Arc::new(MemorySink::new());
    let runner = Arc::new(BatchRunner::from_config(
        &config,
        proxy_pool.clone(),
        sink.clone(),
    ));
    tracing::info!(
        "Batch runner ready: {} worker(s), error ceiling {}",
        config.run.worker_pool_size,
        config.run.max_errors_before_fail
    );

    let app_state = Arc::new(AppState {
        config: config.clone(),
        runner,
        sink,
        proxy_pool,
    });

    // Rate limiting: 10 req/sec per IP, burst of 20
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(10)
            .burst_size(20)
            .key_extractor(SmartIpKeyExtractor)
            .finish()
            .ok_or_else(|| anyhow::anyhow!("Invalid rate limiter configuration"))?,
    );

    let app: Router = handlers::router(app_state)
        .layer(
            ServiceBuilder::new()
                // Lead batches can be large; 20MB max payload
                .layer(RequestBodyLimitLayer::new(20 * 1024 * 1024))
                .layer(GovernorLayer {
                    config: governor_conf,
                }),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
