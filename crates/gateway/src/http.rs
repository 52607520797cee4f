//! HTTP surface: health check, Prometheus metrics, and the `/ws` upgrade
//! handler (spec.md §6 "WebSocket handshake").

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{ConnectInfo, Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use serde::Deserialize;

use crate::server::AppState;
use crate::state::GatewayState;
use crate::ws;

pub async fn healthz() -> &'static str {
    "ok"
}

pub async fn metrics(State(state): State<AppState>) -> String {
    state.metrics.render()
}

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    token: Option<String>,
}

/// `/ws?token=<jwt>` (spec.md §6). An absent token is a valid Observer
/// upgrade, not a rejection — [`admission::authenticate`](crate::admission::authenticate)
/// resolves that.
pub async fn ws_upgrade(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let gateway_state: Arc<GatewayState> = state.gateway;
    ws.on_upgrade(move |socket| ws::handle_connection(socket, gateway_state, remote_addr, query.token))
}
