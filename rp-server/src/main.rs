//! RP Server - WebAuthn relying party
//!
//! Serves the registration and authentication ceremonies over HTTP:
//! - POST /attestation/options, /attestation/result
//! - POST /assertion/options, /assertion/result
//! - GET /health, /ready

use std::net::SocketAddr;
use std::sync::Arc;

use rp_core::{CredentialStore, MemoryStore};
use rp_server::{create_router_with_config, AppState, Config, PgCredentialStore, WebauthnEngine};
use tracing_subscriber::EnvFilter;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("rp_server=info,rp_core=info,tower_http=info")),
        )
        .init();

    if let Err(e) = run().await {
        tracing::error!(error = %e, "Server terminated");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), BoxError> {
    let config = Config::from_env();

    let store: Arc<dyn CredentialStore> = match &config.database_url {
        Some(url) => {
            let store = PgCredentialStore::connect(url, config.database_max_connections).await?;
            store.migrate().await?;
            Arc::new(store)
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory store (data is lost on restart)");
            Arc::new(MemoryStore::new())
        }
    };

    let engine = WebauthnEngine::new(&config.rp_id, &config.rp_origin, &config.rp_name)?;
    tracing::info!(
        rp_id = %config.rp_id,
        rp_origin = %config.rp_origin,
        session_scope = ?config.session_scope,
        session_ttl_secs = config.session_ttl_secs,
        purge_consumed_challenges = config.purge_consumed_challenges,
        "Relying party configured"
    );

    let state = AppState::new(&config, store, Arc::new(engine));
    let sweeper = state.spawn_session_sweeper(config.session_sweep_interval());
    let app = create_router_with_config(&config, state);

    let addr = config.socket_addr();
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Listening on http://{}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    sweeper.abort();
    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
