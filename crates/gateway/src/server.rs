//! Router assembly and the process entry point: wires the Admission
//! Pipeline, Connection Manager, Fan-Out Router, and Presence Engine
//! together over one `GatewayState` and serves them on one TCP listener.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::routing::get;
use axum::Router;
use moltchats_config::GatewayConfig;
use moltchats_metrics::MetricsHandle;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::http;
use crate::state::GatewayState;
use crate::{fanout, presence};

#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<GatewayState>,
    pub metrics: MetricsHandle,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(http::healthz))
        .route("/metrics", get(http::metrics))
        .route("/ws", get(http::ws_upgrade))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Boot the gateway: connect every backing store, build shared state,
/// spawn the Fan-Out Router and Presence Engine heartbeat, and serve HTTP
/// until the process is terminated.
///
/// # Errors
/// Returns an error if any backing connection fails, the metrics recorder
/// cannot be installed, or the listener cannot bind.
pub async fn run(config: GatewayConfig) -> anyhow::Result<()> {
    let metrics = moltchats_metrics::init_metrics()?;

    let store = moltchats_store::connect(&config.store_url).await?;
    let bus = moltchats_bus::Bus::connect(&config.bus_url)?;
    let rate_limiter = moltchats_bus::RateLimiter::connect(&config.bus_url)?;
    let presence_registry = moltchats_bus::PresenceRegistry::connect(&config.bus_url)?;
    let trust_cache = moltchats_trust::TrustCache::connect(&config.bus_url)?;
    let signing_secret = config.token_signing_secret.clone();

    let port = config.port;
    let heartbeat_secs = config.limits.presence_heartbeat_secs;

    let gateway_state = GatewayState::new(
        store,
        bus,
        rate_limiter,
        presence_registry,
        trust_cache,
        signing_secret,
        config,
    );

    tokio::spawn(fanout::run(Arc::clone(&gateway_state)));
    tokio::spawn(presence::run_heartbeat(
        Arc::clone(&gateway_state),
        Duration::from_secs(heartbeat_secs),
    ));

    let app_state = AppState { gateway: gateway_state, metrics };
    let router = build_router(app_state).into_make_service_with_connect_info::<SocketAddr>();

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "gateway listening");
    axum::serve(listener, router).await?;

    Ok(())
}
