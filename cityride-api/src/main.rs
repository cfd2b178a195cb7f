use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use cityride_api::{app, AppState, AuthConfig};
use cityride_core::{InMemoryStore, LifecycleCoordinator, LifecycleStore};
use cityride_store::{Config, DbClient, PgLifecycleStore};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cityride_api=debug,cityride_core=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load().context("Failed to load config")?;
    tracing::info!(
        "Starting CityRide API on port {} ({})",
        config.server.port,
        config.server.environment
    );

    let store: Arc<dyn LifecycleStore> = match &config.database.url {
        Some(url) => {
            let db = DbClient::new(url, &config.database)
                .await
                .context("Failed to connect to Postgres")?;
            if config.database.run_migrations {
                db.migrate().await.context("Failed to run migrations")?;
            }
            Arc::new(PgLifecycleStore::new(db.pool.clone()))
        }
        None => {
            tracing::warn!("No database.url configured, using the in-memory store");
            Arc::new(InMemoryStore::new())
        }
    };

    let (events, _) = broadcast::channel(config.events.channel_capacity);
    let coordinator = Arc::new(LifecycleCoordinator::new(store, events));

    let mut rx = coordinator.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => tracing::debug!(ride_id = %event.ride_id(), "Lifecycle event: {:?}", event),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Lifecycle event log lagged, {} event(s) skipped", skipped)
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    let app_state = AppState::new(
        coordinator,
        AuthConfig {
            secret: config.auth.jwt_secret.clone(),
        },
        config.server.environment.clone(),
    );

    let app = app(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}
