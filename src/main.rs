//! AEEP server HTTP entrypoint.
//!
//! This binary wires the engine built in `aeep-core` to an Axum listener:
//! it loads configuration, constructs the in-memory store, router, batching
//! service, and mock relayer, builds the HTTP router, spawns the five
//! independent background sweeps (§3.5, §9), and serves until SIGINT/SIGTERM.
//!
//! Endpoints are documented on [`aeep_core::routes`]; see also
//! `GET /health` and `GET /.well-known/did.json`.
//!
//! Environment:
//! - `.env` values loaded at startup
//! - `HOST`, `PORT` control binding address
//! - `AEEP_*` variables configure TTLs, batching thresholds, and stream caps
//!   (see [`config::Config`])

mod config;
mod telemetry;

use std::sync::Arc;
use std::time::Duration;

use aeep_core::{AppState, AuthConfig, BatchingService, InMemoryStore, MessageRouter, MockRelayer};
use aeep_core::{negotiation, registry, router};
use aeep_types::Did;
use axum::Router;
use axum::http::Method;
use dotenvy::dotenv;
use tower_http::cors;
use tower_http::trace::TraceLayer;

use crate::config::Config;

/// The server's own DID, used only to answer `/.well-known/did.json` — no
/// message type in this protocol is server-originated yet (§6.1).
const SERVER_DID: &str = "did:aeep:server";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    telemetry::init_tracing();

    let config = Config::load()?;

    let store: Arc<dyn aeep_core::Store> = Arc::new(InMemoryStore::new());
    let relayer: Arc<dyn aeep_core::Relayer> =
        Arc::new(MockRelayer::new(config.relayer_starting_balance().to_string()));
    let message_router = MessageRouter::with_limits(
        store.clone(),
        config.message_ttl_seconds(),
        config.max_streams_per_agent(),
        config.max_streams_global(),
    );
    let batching = BatchingService::new(config.batching_config(), store.clone(), relayer.clone());
    let auth_config = AuthConfig {
        nonce_ttl_seconds: config.nonce_ttl_seconds(),
    };
    let server_did = Did::parse(SERVER_DID).expect("SERVER_DID is a valid DID literal");

    let app_state = AppState::new(
        store.clone(),
        message_router,
        batching.clone(),
        relayer,
        auth_config,
        server_did,
    );

    let sig_down = aeep_core::util::SigDown::try_new()?;
    let cancellation_token = sig_down.cancellation_token();
    spawn_sweeps(store, batching, &config, cancellation_token.clone());

    let http_endpoints = Router::new().merge(aeep_core::routes(app_state)).layer(
        tower::ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(
                cors::CorsLayer::new()
                    .allow_origin(cors::Any)
                    .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
                    .allow_headers(cors::Any),
            ),
    );

    let addr = std::net::SocketAddr::new(config.host(), config.port());
    tracing::info!("Starting AEEP server at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap_or_else(|e| {
        tracing::error!("Failed to bind to {}: {}", addr, e);
        std::process::exit(1);
    });

    let graceful_shutdown = async move { cancellation_token.cancelled().await };
    axum::serve(listener, http_endpoints)
        .with_graceful_shutdown(graceful_shutdown)
        .await?;

    Ok(())
}

/// Spawns the five independent periodic sweeps the design notes call for
/// (§9): TTL expiry, heartbeat expiry, nonce GC, message GC, and the
/// batching time-trigger. Each is individually idempotent and stops
/// cleanly when `token` is cancelled.
fn spawn_sweeps(
    store: Arc<dyn aeep_core::Store>,
    batching: BatchingService,
    config: &Config,
    token: tokio_util::sync::CancellationToken,
) {
    let interval = config.sweep_interval();

    {
        let store = store.clone();
        let token = token.clone();
        tokio::spawn(sweep_loop(interval, token, move || {
            let count = negotiation::sweep_expired(store.as_ref());
            if count > 0 {
                tracing::debug!(count, "TTL sweep expired interactions");
            }
        }));
    }

    {
        let store = store.clone();
        let token = token.clone();
        let timeout = config.heartbeat_timeout_seconds();
        tokio::spawn(sweep_loop(interval, token, move || {
            let count = registry::sweep_stale_heartbeats(store.as_ref(), timeout);
            if count > 0 {
                tracing::debug!(count, "heartbeat sweep marked agents unknown");
            }
        }));
    }

    {
        let store = store.clone();
        let token = token.clone();
        tokio::spawn(sweep_loop(interval, token, move || {
            let count = store.gc_expired_nonces(aeep_types::Timestamp::now());
            if count > 0 {
                tracing::debug!(count, "nonce GC reclaimed expired replay records");
            }
        }));
    }

    {
        let store = store.clone();
        let token = token.clone();
        tokio::spawn(sweep_loop(interval, token, move || {
            let count = router::sweep_expired_messages(store.as_ref());
            if count > 0 {
                tracing::debug!(count, "message GC evicted expired queue entries");
            }
        }));
    }

    {
        let token = token.clone();
        tokio::spawn(sweep_loop(interval, token, move || {
            batching.maybe_flush_on_timer();
        }));
    }
}

async fn sweep_loop(
    interval: Duration,
    token: tokio_util::sync::CancellationToken,
    mut tick: impl FnMut() + Send + 'static,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = token.cancelled() => return,
            _ = ticker.tick() => tick(),
        }
    }
}
