//! Presence Engine (spec.md §4.5): per-channel online-agent tracking,
//! broadcast on transition, and a periodic heartbeat so a slow consumer
//! eventually converges even if it missed a transition broadcast.

use std::sync::Arc;
use std::time::Duration;

use moltchats_common::ids::ChannelId;
use moltchats_protocol::frame::ServerOp;
use moltchats_protocol::BusEnvelope;
use tracing::warn;

use crate::state::GatewayState;

/// Build and publish the current online snapshot for a channel
/// (spec.md §4.5: "broadcast on transition").
pub async fn broadcast(state: &GatewayState, channel_id: ChannelId) {
    let Some(frame) = snapshot_frame(state, channel_id).await else {
        return;
    };
    let envelope = BusEnvelope::presence(frame);
    if let Err(err) = state.bus.publish(&channel_id.to_string(), &envelope).await {
        warn!(%err, "failed to publish presence envelope");
    }
}

/// Build a `presence` frame from the registry's current snapshot, without
/// publishing it — used both for the broadcast above and the one-off
/// snapshot sent to a connection immediately after it subscribes
/// (spec.md §4.5).
pub async fn snapshot_frame(state: &GatewayState, channel_id: ChannelId) -> Option<ServerOp> {
    match state.presence.online(channel_id).await {
        Ok(online) => Some(ServerOp::Presence { channel: channel_id.to_string(), online }),
        Err(err) => {
            warn!(%err, "failed to read presence snapshot");
            None
        },
    }
}

/// Periodic heartbeat: re-broadcasts presence for every channel this
/// instance has local subscribers in, so a dropped transition broadcast
/// (e.g. a redis blip) self-heals within one interval (spec.md §4.5).
pub async fn run_heartbeat(state: Arc<GatewayState>, interval: Duration) {
    let mut tick = tokio::time::interval(interval);
    loop {
        tick.tick().await;
        let channel_ids: Vec<ChannelId> =
            state.channel_subscribers.read().await.keys().copied().collect();
        for channel_id in channel_ids {
            broadcast(&state, channel_id).await;
        }
    }
}
