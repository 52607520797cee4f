//! Connection Manager (spec.md §4.2): the per-socket task. Runs the
//! handshake, then the message loop and its idle/disconnect/session-cap
//! timers, until the socket closes.
//!
//! Registering the read side of the socket only after admission succeeds
//! means nothing is lost while that async setup runs: axum's WebSocket
//! stream is pull-based, so frames a client sends before we start polling
//! simply sit unread rather than firing a callback we'd have to buffer —
//! the buffered-ingress pattern spec.md §9 describes falls out of normal
//! control flow here instead of needing its own queue.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures::{SinkExt, StreamExt};
use moltchats_common::ids::ChannelId;
use moltchats_protocol::constants::{IDLE_HALF_DIVISOR, MAX_SESSION_SECS};
use moltchats_protocol::frame::{ClientOp, ServerOp};
use moltchats_protocol::AppError;
use tokio::sync::mpsc;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::admission;
use crate::dispatcher::{self, DispatchOutcome};
use crate::state::{ConnectedClient, GatewayState};

/// Entry point from the `/ws` upgrade handler.
pub async fn handle_connection(
    socket: WebSocket,
    state: Arc<GatewayState>,
    remote_addr: SocketAddr,
    token: Option<String>,
) {
    let conn_id = Uuid::new_v4();
    let span = info_span!("connection", conn_id = %conn_id);
    run(socket, state, remote_addr, token, conn_id).instrument(span).await;
}

async fn run(
    socket: WebSocket,
    state: Arc<GatewayState>,
    remote_addr: SocketAddr,
    token: Option<String>,
    conn_id: Uuid,
) {
    let opened_at = Instant::now();
    metrics::counter!(moltchats_metrics::websocket::CONNECTIONS_TOTAL).increment(1);
    metrics::gauge!(moltchats_metrics::websocket::CONNECTIONS_ACTIVE).increment(1.0);
    info!(remote_ip = %remote_addr.ip(), "connection opened");

    let (mut ws_tx, mut ws_rx) = socket.split();
    let (client_tx, mut client_rx) = mpsc::unbounded_channel::<String>();

    // The write task owns the sink exclusively, since `ConnectedClient`s
    // elsewhere (fan-out, presence heartbeat) push frames onto the mpsc
    // channel rather than holding their own handle to it. `close_code_slot`
    // lets the read loop below request a specific WS close code once it
    // decides to end the connection, without needing the sink back.
    let close_code_slot = Arc::new(AtomicU16::new(0));
    let write_close_slot = Arc::clone(&close_code_slot);
    let write_task = tokio::spawn(async move {
        while let Some(text) = client_rx.recv().await {
            if ws_tx.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
        let code = write_close_slot.load(Ordering::Relaxed);
        let frame = (code != 0).then(|| CloseFrame { code, reason: "".into() });
        let _ = ws_tx.send(Message::Close(frame)).await;
    });

    metrics::counter!(moltchats_metrics::admission::ATTEMPTS_TOTAL).increment(1);
    let identity = match admission::authenticate(&state, token.as_deref()).await {
        Ok(identity) => identity,
        Err(err) => {
            metrics::counter!(moltchats_metrics::admission::FAILURES_TOTAL, "code" => err.code())
                .increment(1);
            warn!(code = err.code(), "admission failed at connect");
            send_frame(&client_tx, ServerOp::error(err, err.to_string()));
            if let Some(code) = err.close_code() {
                close_code_slot.store(code, Ordering::Relaxed);
            }
            drop(client_tx);
            let _ = write_task.await;
            metrics::gauge!(moltchats_metrics::websocket::CONNECTIONS_ACTIVE).decrement(1.0);
            return;
        },
    };

    let now = Instant::now();
    state
        .register_client(ConnectedClient {
            conn_id,
            agent_id: identity.agent_id,
            username: identity.username,
            role: identity.role,
            tier: identity.tier,
            sender: client_tx.clone(),
            connected_at: now,
            last_activity: now,
            last_seen: now,
        })
        .await;

    if let Some(agent_id) = identity.agent_id {
        let _ = moltchats_store::repo::metrics::record_session(&state.store, agent_id).await;
    }

    let idle_timeout = Duration::from_secs(state.config.limits.idle_timeout_secs);
    let idle_half = idle_timeout / u32::try_from(IDLE_HALF_DIVISOR).unwrap_or(2);
    let session_deadline = opened_at + Duration::from_secs(MAX_SESSION_SECS);
    let mut tick = tokio::time::interval(Duration::from_secs(1));
    let mut went_idle = false;

    let close_code = loop {
        tokio::select! {
            _ = tick.tick() => {
                let Some((last_activity, last_seen)) = activity_snapshot(&state, conn_id).await else {
                    break None;
                };
                let elapsed_since_seen = last_seen.elapsed();
                if elapsed_since_seen >= idle_timeout || Instant::now() >= session_deadline {
                    metrics::counter!(moltchats_metrics::websocket::IDLE_CLOSES_TOTAL).increment(1);
                    send_frame(&client_tx, ServerOp::error(AppError::IdleTimeout, "idle timeout"));
                    break Some(moltchats_protocol::close_code::IDLE_TIMEOUT);
                }
                if !went_idle && last_activity.elapsed() >= idle_half {
                    // Connection-local bookkeeping only: the shared online
                    // set this broadcasts is unchanged, since presence.rs's
                    // wire frame carries only the online-agent-id list, not
                    // a per-agent idle/online distinction (spec.md §4.2
                    // state machine, §8 property 9).
                    went_idle = true;
                    info!("connection idle");
                    presence_touch(&state, conn_id).await;
                }
            }
            incoming = ws_rx.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        metrics::counter!(moltchats_metrics::websocket::FRAMES_RECEIVED_TOTAL).increment(1);
                        went_idle = false;
                        if let Some(code) = handle_text_frame(&state, &client_tx, conn_id, &text).await {
                            break Some(code);
                        }
                    },
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                        touch_seen(&state, conn_id).await;
                    },
                    Some(Ok(Message::Close(_))) | None => break None,
                    Some(Ok(Message::Binary(_))) => {
                        send_frame(&client_tx, ServerOp::error(AppError::InvalidJson, "binary frames are not supported"));
                    },
                    Some(Err(err)) => {
                        warn!(%err, "websocket read error");
                        break None;
                    },
                }
            }
        }
    };

    cleanup(&state, conn_id, close_code).await;
    if let Some(code) = close_code {
        close_code_slot.store(code, Ordering::Relaxed);
    }
    drop(client_tx);
    let _ = write_task.await;
    metrics::gauge!(moltchats_metrics::websocket::CONNECTIONS_ACTIVE).decrement(1.0);
    info!(elapsed_secs = opened_at.elapsed().as_secs(), "connection closed");
}

async fn activity_snapshot(state: &GatewayState, conn_id: Uuid) -> Option<(Instant, Instant)> {
    state
        .clients
        .read()
        .await
        .get(&conn_id)
        .map(|c| (c.last_activity, c.last_seen))
}

/// Re-publish the (unchanged) presence snapshot for every channel this
/// connection is subscribed to. Used when this connection transitions to
/// idle, so subscribers observe a presence event at that moment even
/// though the online set itself does not change (spec.md §8 property 9).
async fn presence_touch(state: &GatewayState, conn_id: Uuid) {
    let channel_ids: Vec<ChannelId> = {
        let subs = state.channel_subscribers.read().await;
        subs.iter()
            .filter(|(_, subscribers)| subscribers.contains_key(&conn_id))
            .map(|(channel_id, _)| *channel_id)
            .collect()
    };
    for channel_id in channel_ids {
        crate::presence::broadcast(state, channel_id).await;
    }
}

async fn touch_seen(state: &GatewayState, conn_id: Uuid) {
    if let Some(client) = state.clients.write().await.get_mut(&conn_id) {
        client.touch_seen();
    }
}

async fn touch_activity(state: &GatewayState, conn_id: Uuid) {
    if let Some(client) = state.clients.write().await.get_mut(&conn_id) {
        client.touch_activity();
    }
}

/// Parse and dispatch one inbound text frame. Returns `Some(close_code)`
/// if the connection must close as a result (spec.md §4.6 quarantine
/// mid-session, §7 auth-failure propagation).
async fn handle_text_frame(
    state: &Arc<GatewayState>,
    client_tx: &mpsc::UnboundedSender<String>,
    conn_id: Uuid,
    text: &str,
) -> Option<u16> {
    if text.len() > moltchats_protocol::MAX_PAYLOAD_BYTES {
        send_frame(client_tx, ServerOp::error(AppError::ValidationError, "frame too large"));
        return None;
    }

    let Ok(value) = serde_json::from_str::<serde_json::Value>(text) else {
        send_frame(client_tx, ServerOp::error(AppError::InvalidJson, "malformed json"));
        return None;
    };

    let op = match serde_json::from_value::<ClientOp>(value) {
        Ok(op) => op,
        Err(_) => {
            send_frame(client_tx, ServerOp::error(AppError::UnknownOp, "unrecognized op"));
            return None;
        },
    };

    match dispatcher::dispatch(state, conn_id, op).await {
        DispatchOutcome::Continue { reset_activity } => {
            metrics::counter!(moltchats_metrics::websocket::FRAMES_SENT_TOTAL).increment(1);
            if reset_activity {
                touch_activity(state, conn_id).await;
            } else {
                touch_seen(state, conn_id).await;
            }
            None
        },
        DispatchOutcome::Close { code } => Some(code),
    }
}

async fn cleanup(state: &GatewayState, conn_id: Uuid, _close_code: Option<u16>) {
    let Some((client, channels)) = state.remove_client(conn_id).await else {
        return;
    };
    let Some(agent_id) = client.agent_id else {
        return;
    };
    for channel_id in channels {
        if !state.agent_still_subscribed_elsewhere(channel_id, agent_id, conn_id).await {
            match state.presence.mark_offline(channel_id, agent_id).await {
                Ok(true) => crate::presence::broadcast(state, channel_id).await,
                Ok(false) => {},
                Err(err) => warn!(%err, "presence mark_offline failed during cleanup"),
            }
        }
    }
}

fn send_frame(client_tx: &mpsc::UnboundedSender<String>, frame: ServerOp) {
    if let Ok(json) = serde_json::to_string(&frame) {
        let _ = client_tx.send(json);
    }
}
