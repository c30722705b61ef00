use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;

use chargebook::config::Settings;
use chargebook::engine::{Engine, SystemClock};
use chargebook::http::{self, AppState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let settings = Settings::from_env()?;
    chargebook::observability::init(settings.metrics_port)?;

    // Ensure data directory exists
    std::fs::create_dir_all(&settings.data_dir)?;

    let clock = Arc::new(SystemClock::new(settings.tz_offset));
    let engine = Arc::new(Engine::new(
        &settings.wal_path(),
        settings.business_hours()?,
        clock,
        settings.lock_timeout,
    )?);
    let seeded = engine.seed_stations(settings.stations).await?;

    let compactor_engine = engine.clone();
    let threshold = settings.compact_threshold;
    tokio::spawn(async move {
        chargebook::compactor::run_compactor(compactor_engine, threshold).await;
    });

    let app = http::app(
        AppState::new(engine.clone(), settings.admin_token.as_str()),
        settings.max_connections,
        &settings.cors_origins,
    );

    let addr = format!("{}:{}", settings.bind, settings.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("chargebook listening on {addr}");
    info!("  data_dir: {}", settings.data_dir.display());
    info!("  stations: {} ({seeded} seeded)", engine.store.station_count());
    let hours = engine.hours();
    info!(
        "  hours: {}~{} every {} min, tz {}",
        hours.open().format("%H:%M"),
        hours.close().format("%H:%M"),
        hours.slot_minutes(),
        settings.tz_offset
    );
    info!("  max_connections: {}", settings.max_connections);
    info!("  metrics: {}", settings.metrics_port.map_or("disabled".to_string(), |p| format!("http://0.0.0.0:{p}/metrics")));

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("chargebook stopped");
    Ok(())
}

/// Resolve on ctrl-c or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for ctrl-c: {e}");
            std::future::pending::<()>().await;
        }
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to register SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutdown signal received, draining connections");
}
