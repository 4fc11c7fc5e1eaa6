use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use tourguard::api::{self, AppState};
use tourguard::config::Config;
use tourguard::monitor::Monitor;
use tourguard::storage::Storage;
use tourguard::zones::ZoneCatalog;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Default level is INFO; profile fields are never logged at any level.
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("tourguard=info".parse()?))
        .init();

    let config = Config::from_env();

    info!(
        port = config.port,
        db_url = %config.database_url,
        zones = %config.zones_path.display(),
        "Starting Tourguard server"
    );

    let storage = Storage::new(&config.database_url).await?;
    info!("Database initialized");

    let zones = ZoneCatalog::load(&config.zones_path)?;
    info!(zones = zones.zones().len(), "Zone catalog loaded");

    let snapshot = storage.load().await?;
    let monitor = Arc::new(
        Monitor::from_snapshot(zones, config.monitor.clone(), Arc::new(storage), snapshot)
            .context("restoring monitor state")?,
    );

    spawn_sweeper(monitor.clone(), config.sweep_interval);

    // Request spans carry method and path only, never bodies.
    let app = api::router(AppState { monitor })
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr).await?;

    info!(%addr, "Tourguard is listening");

    axum::serve(listener, app).await?;

    Ok(())
}

/// Re-evaluate all tourists every `interval` so that inactivity is noticed
/// without new position updates.
fn spawn_sweeper(monitor: Arc<Monitor>, interval: std::time::Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            if let Err(e) = monitor.flush().await {
                warn!(error = %e, "Queued changes are still unsynced");
            }

            let summary = monitor.sweep(Utc::now()).await;
            if summary.alerts_changed > 0 || summary.failed > 0 {
                info!(
                    evaluated = summary.evaluated,
                    alerts_changed = summary.alerts_changed,
                    failed = summary.failed,
                    "Sweep finished"
                );
            }
        }
    });
}
