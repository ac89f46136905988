//! Moderator Service
//!
//! Realtime WebSocket hub and automated moderator for live presentation
//! sessions.
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Initialize Prometheus metrics recorder
//! 3. Connect to PostgreSQL and run migrations, then mark ready
//! 4. Spawn the hub actor and build engine, dispatcher and announcer
//! 5. Serve HTTP + WebSocket until SIGINT/SIGTERM

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use common::secret::ExposeSecret;
use moderator_service::config::Config;
use moderator_service::connection::PumpTimings;
use moderator_service::dispatcher::Dispatcher;
use moderator_service::hub::HubActor;
use moderator_service::moderator::ModeratorEngine;
use moderator_service::observability::{metrics, HealthState};
use moderator_service::routes::{self, AppState};
use moderator_service::scheduler::StartAnnouncer;
use moderator_service::storage::{PgStorage, Storage};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Time the hub gets to close every connection after cancellation.
const HUB_STOP_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "moderator_service=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Moderator Service");

    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;
    let utc_offset = config.utc_offset()?;

    info!(
        bind_address = %config.bind_address,
        db_max_connections = config.db_max_connections,
        questions_per_presenter = config.questions_per_presenter,
        utc_offset = %utc_offset,
        "Configuration loaded successfully"
    );

    // Must happen before any metrics are recorded
    let metrics_handle = metrics::init_metrics_recorder().map_err(|e| {
        error!(error = %e, "Failed to install Prometheus metrics recorder");
        e
    })?;

    let health_state = Arc::new(HealthState::new());

    info!("Connecting to database...");
    let db_pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .acquire_timeout(Duration::from_secs(5))
        .connect(config.database_url.expose_secret())
        .await
        .map_err(|e| {
            error!("Failed to connect to database: {}", e);
            e
        })?;

    sqlx::migrate!("../../migrations")
        .run(&db_pool)
        .await
        .map_err(|e| {
            error!("Failed to run migrations: {}", e);
            e
        })?;
    info!("Database connection established and migrated");
    health_state.mark_migrated();

    let shutdown_token = CancellationToken::new();
    let (hub, hub_task) = HubActor::spawn(shutdown_token.child_token());

    let storage: Arc<dyn Storage> = Arc::new(PgStorage::new(db_pool));
    let engine = Arc::new(ModeratorEngine::new(
        Arc::clone(&storage),
        config.questions_per_presenter,
    ));
    let dispatcher = Arc::new(Dispatcher::new(
        Arc::clone(&storage),
        Arc::clone(&engine),
        utc_offset,
    ));
    let announcer = Arc::new(StartAnnouncer::new(
        engine,
        Arc::clone(&storage),
        hub.clone(),
        shutdown_token.child_token(),
    ));

    let state = Arc::new(AppState {
        storage,
        hub,
        dispatcher,
        announcer,
        utc_offset,
        timings: PumpTimings::default(),
        shutdown: shutdown_token.clone(),
    });

    let app = routes::build_routes(state, Arc::clone(&health_state), metrics_handle);

    let addr: SocketAddr = config.bind_address.parse().map_err(|e| {
        error!("Invalid bind address: {}", e);
        e
    })?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Moderator Service listening on {}", addr);

    let drain_period = config.drain_period();
    let signal_health = Arc::clone(&health_state);
    let signal_token = shutdown_token.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            // Stop receiving traffic before the drain period
            signal_health.start_draining();
            drain(drain_period).await;
            // Closes every open socket with a going-away frame
            signal_token.cancel();
        })
        .await?;

    shutdown_token.cancel();
    if tokio::time::timeout(HUB_STOP_TIMEOUT, hub_task).await.is_err() {
        warn!("Hub did not stop in time");
    }

    info!("Moderator Service shutdown complete");

    Ok(())
}

/// Listens for shutdown signals (SIGTERM, SIGINT).
async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received SIGINT, starting graceful shutdown..."),
            Err(e) => error!("Failed to listen for SIGINT: {}", e),
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received SIGTERM, starting graceful shutdown...");
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}

async fn drain(period: Duration) {
    if period.is_zero() {
        info!("Skipping drain period (MODERATOR_DRAIN_SECONDS=0)");
        return;
    }
    warn!("Draining connections for {} seconds...", period.as_secs());
    tokio::time::sleep(period).await;
    info!("Drain period complete");
}
