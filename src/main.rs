use std::{sync::Arc, time::Duration};

use anyhow::Context;
use axum::{error_handling::HandleErrorLayer, http::StatusCode, BoxError};
use metrics_exporter_prometheus::PrometheusBuilder;
use reqwest::Client;
use tower::ServiceBuilder;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use citycast::cache::start_cache_cleanup_task;
use citycast::config::AppConfig;
use citycast::gateway::OpenWeatherClient;
use citycast::location::LocationResolver;
use citycast::routes::build_router;
use citycast::scheduler::RefreshScheduler;
use citycast::store::DurableStore;
use citycast::AppState;

/// Shared HTTP client configuration
const HTTP_TIMEOUT_SECS: u64 = 30;
const HTTP_CONNECT_TIMEOUT_SECS: u64 = 5;
const HTTP_POOL_IDLE_TIMEOUT_SECS: u64 = 90;

/// Upper bound for one API request, bulk refreshes included
const REQUEST_TIMEOUT_SECS: u64 = 120;

/// Create shared HTTP client with connection pooling
fn create_http_client() -> reqwest::Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
        .connect_timeout(Duration::from_secs(HTTP_CONNECT_TIMEOUT_SECS))
        .pool_idle_timeout(Duration::from_secs(HTTP_POOL_IDLE_TIMEOUT_SECS))
        .pool_max_idle_per_host(10)
        .build()
}

async fn handle_timeout_error(err: BoxError) -> (StatusCode, String) {
    if err.is::<tower::timeout::error::Elapsed>() {
        (StatusCode::REQUEST_TIMEOUT, "Request timed out".to_string())
    } else {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Internal error: {}", err),
        )
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for ctrl+c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, starting graceful shutdown");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "citycast=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Arc::new(AppConfig::load().context("Failed to load configuration")?);
    tracing::info!(
        units = %config.units,
        language = %config.language,
        data_dir = %config.data_dir,
        "Configuration loaded successfully"
    );

    let metrics = PrometheusBuilder::new()
        .install_recorder()
        .context("Failed to install Prometheus recorder")?;

    let http_client = create_http_client().context("Failed to create HTTP client")?;

    let gateway = Arc::new(
        OpenWeatherClient::new(http_client.clone(), &config.openweathermap_api_key)
            .with_base_url(&config.api_base_url)
            .with_onecall_url(&config.onecall_url)
            .with_forecast_mode(config.forecast_mode)
            .with_retry(config.retry.policy()),
    );
    let locator = LocationResolver::from_config(&config.geolocation, http_client);
    let store = DurableStore::file(&config.data_dir);

    if let Err(e) = store.check() {
        tracing::warn!(error = %e, "Durable store is not writable, changes will not persist");
    }

    let state = AppState::new(Arc::clone(&config), gateway, locator, store.clone())
        .with_metrics(metrics);

    start_cache_cleanup_task(
        state.cache.clone(),
        Duration::from_secs(config.cache.cleanup_interval_secs),
    );

    let scheduler = match &config.refresh.schedule {
        Some(cron) => {
            let scheduler =
                RefreshScheduler::new(Arc::clone(&state.tracking_service), store, Arc::clone(&config))
                    .await?;
            scheduler.schedule(cron, &config.refresh.timezone).await?;
            scheduler.start().await?;
            Some(scheduler)
        }
        None => {
            tracing::info!("No refresh schedule configured");
            None
        }
    };

    let app = build_router()
        .layer(
            ServiceBuilder::new()
                .layer(HandleErrorLayer::new(handle_timeout_error))
                .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS)),
        )
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(scheduler) = scheduler {
        if let Err(e) = scheduler.shutdown().await {
            tracing::warn!(error = %e, "Scheduler did not shut down cleanly");
        }
    }

    tracing::info!("Server shutdown complete");

    Ok(())
}
