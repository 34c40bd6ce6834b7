use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use crew_dispatch::api;
use crew_dispatch::config::Config;
use crew_dispatch::engine::sweeps::spawn_sweeps;
use crew_dispatch::error::AppError;
use crew_dispatch::mail::LogMailer;
use crew_dispatch::state::AppState;
use crew_dispatch::store::MemoryStore;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let config = Config::from_env()?;

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(config.log_level.clone()))
        .with_target(false);
    if config.log_json {
        subscriber.json().init();
    } else {
        subscriber.compact().init();
    }

    let store = match &config.fixture_path {
        Some(path) => MemoryStore::load_fixture(path).await?,
        None => {
            tracing::warn!("FIXTURE_PATH not set; starting with an empty store");
            MemoryStore::new()
        }
    };

    let state = Arc::new(AppState::new(
        Arc::new(store),
        Arc::new(LogMailer),
        config.policy.clone(),
        config.event_buffer_size,
    ));

    tracing::info!(
        conflict_window_hours = config.policy.conflict_window.num_hours(),
        fair_use_window = %config.policy.fair_use_window,
        "assignment policy loaded"
    );

    let sweeps = spawn_sweeps(state.clone(), &config.sweeps);
    let app = api::rest::router(state);

    let bind_addr = format!("0.0.0.0:{}", config.http_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|err| AppError::Internal(format!("failed to bind {bind_addr}: {err}")))?;

    tracing::info!(http_port = config.http_port, "http server started");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| AppError::Internal(format!("server error: {err}")))?;

    for sweep in sweeps {
        sweep.abort();
    }
    tracing::info!("shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
    }
}
