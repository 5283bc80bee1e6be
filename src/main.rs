use anyhow::Context;
use bank_sessions::{
    router, start_sweep_task, AppConfig, AppState, InMemorySessionStore, SessionManager,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bank_sessions=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting bank session service");

    let config = AppConfig::from_env().context("Invalid configuration")?;
    let token_issuer = config
        .token_issuer()
        .context("Could not load the signing key")?;

    let session_store = Arc::new(InMemorySessionStore::new());
    let session_manager = Arc::new(SessionManager::new(
        session_store,
        token_issuer,
        config.session.clone(),
    ));

    let sweep_task = tokio::spawn(start_sweep_task(
        Arc::clone(&session_manager),
        config.sweep.clone(),
    ));

    let app = router(AppState::new(session_manager)).layer(TraceLayer::new_for_http());

    let address = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("Could not bind {}", address))?;
    info!("Server running on http://{}", address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    sweep_task.abort();
    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Could not listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
