//! doommesh relay node.
//!
//! - Local WebSocket endpoints: `/doom` (gameplay) and `/meta` (control UI)
//! - Peer side: base swarm gossip + one match swarm at a time
//! - Standalone mode: in-process swarm hub and ledger

use std::net::SocketAddr;
use std::sync::Arc;

use tracing_subscriber::{fmt, EnvFilter};

use doommesh_core::error::{RelayError, Result};
use doommesh_core::identity::Identity;
use doommesh_relay::{
    app_state::AppState, config, ledger::MemoryLedger, obs::RelayMetrics, relay, router,
    swarm::MemoryHub,
};

#[tokio::main]
async fn main() {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    if let Err(e) = run().await {
        tracing::error!(error = %e, "doommesh relay failed");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let path = config::config_path();
    let cfg = Arc::new(config::load_from_file(&path)?);
    let listen: SocketAddr = cfg
        .relay
        .listen
        .parse()
        .map_err(|e| RelayError::BadRequest(format!("relay.listen must be a valid SocketAddr: {e}")))?;

    let identity = match cfg.identity.secret_hex.as_deref() {
        Some(secret) => Identity::from_secret_hex(secret)?,
        None => {
            tracing::warn!("identity.secret_hex not set; using an ephemeral key");
            Identity::from_secret_bytes(rand::random())
        }
    };

    let metrics = Arc::new(RelayMetrics::default());
    let ledger = Arc::new(MemoryLedger::new(identity.address().clone()));
    let hub = MemoryHub::new();
    let handle = relay::spawn(cfg.clone(), identity, ledger, metrics.clone(), |sink| {
        hub.transport(sink)
    });

    let state = AppState::new(cfg, handle.clone(), metrics);
    let app = router::build_router(state.clone());

    tracing::info!(%listen, address = %handle.address(), config = %path, "doommesh relay starting");
    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .map_err(|e| RelayError::Transport(format!("bind {listen} failed: {e}")))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            state.begin_draining();
            tracing::info!("shutdown requested; draining");
        })
        .await
        .map_err(|e| RelayError::Transport(format!("server failed: {e}")))
}
