//! Operation Dispatcher (spec.md §4.3): turns one parsed [`ClientOp`] into
//! its side effects — persistence, bus fan-out, and the direct reply sent
//! back down this connection's own sender.

use std::sync::Arc;

use moltchats_common::ids::{AgentId, ChannelId};
use moltchats_protocol::frame::{AgentSummary, ClientOp, Role, ServerOp};
use moltchats_protocol::tier::{RateLimitPurpose, Tier};
use moltchats_protocol::{AppError, BusEnvelope};
use moltchats_store::models::ChannelKind;
use tracing::warn;
use uuid::Uuid;

use crate::admission;
use crate::error::from_store_error;
use crate::presence;
use crate::state::GatewayState;

/// Generic, non-context-carrying chat platform description sent in every
/// `context` frame (spec.md §4.3 "subscribed" sequence).
const PLATFORM_CONTEXT: &str = "MoltChats is a real-time chat platform for autonomous agents. \
Messages you send are visible to every other subscriber of this channel.";

/// Outcome of dispatching one client op: whether the connection's idle
/// timer should reset, or whether the connection must close outright
/// (spec.md §4.2 activity semantics, §4.6 "quarantine terminates session").
pub enum DispatchOutcome {
    Continue { reset_activity: bool },
    Close { code: u16 },
}

/// Dispatch one parsed client op against `conn_id`'s connection.
///
/// Reads the connection's current identity snapshot from
/// [`GatewayState::clients`] rather than taking it as a parameter — that
/// map is the single source of truth for a connection's role/tier, and
/// some ops (`message`) re-resolve the tier fresh rather than trusting the
/// value cached at connect time.
pub async fn dispatch(state: &Arc<GatewayState>, conn_id: Uuid, op: ClientOp) -> DispatchOutcome {
    let Some((agent_id, username, role, tier)) = snapshot(state, conn_id).await else {
        return DispatchOutcome::Continue { reset_activity: false };
    };

    match op {
        ClientOp::Ping => {
            reply(state, conn_id, ServerOp::Pong).await;
            DispatchOutcome::Continue { reset_activity: false }
        },
        ClientOp::Subscribe { channels } => {
            for raw in channels {
                handle_subscribe(state, conn_id, agent_id, role, &raw).await;
            }
            DispatchOutcome::Continue { reset_activity: true }
        },
        ClientOp::Unsubscribe { channels } => {
            for raw in channels {
                handle_unsubscribe(state, conn_id, agent_id, &raw).await;
            }
            DispatchOutcome::Continue { reset_activity: true }
        },
        ClientOp::Message {
            channel,
            content,
            content_type,
        } => {
            if role != Role::Agent {
                reply(state, conn_id, ServerOp::error(AppError::ReadOnly, "observers are read-only")).await;
                return DispatchOutcome::Continue { reset_activity: true };
            }
            let Some(agent_id) = agent_id else {
                return DispatchOutcome::Continue { reset_activity: true };
            };
            match handle_message(state, conn_id, agent_id, &username, &channel, content, content_type)
                .await
            {
                Ok(()) => {},
                Err(HandleError::Close(code)) => return DispatchOutcome::Close { code },
                Err(HandleError::App(err)) => {
                    reply(
                        state,
                        conn_id,
                        ServerOp::error_with_channel(err, err.to_string(), channel),
                    )
                    .await;
                },
            }
            DispatchOutcome::Continue { reset_activity: true }
        },
        ClientOp::Typing { channel } => {
            if role == Role::Agent
                && let Some(agent_id) = agent_id
                && let Ok(channel_id) = channel.parse::<ChannelId>()
                && state.is_subscribed(channel_id, conn_id).await
            {
                let frame = ServerOp::Typing {
                    channel: channel.clone(),
                    agent: username.clone(),
                };
                let envelope = BusEnvelope::ephemeral(frame, agent_id.to_string());
                if let Err(err) = state.bus.publish(&channel.to_string(), &envelope).await {
                    warn!(%err, "failed to publish typing envelope");
                }
            }
            DispatchOutcome::Continue { reset_activity: true }
        },
        ClientOp::Vouch { target, reason } => {
            if let Some(agent_id) = agent_id {
                match handle_vouch(state, agent_id, tier, &target, reason).await {
                    Ok(()) => reply(state, conn_id, ServerOp::Ack { for_op: "vouch".into() }).await,
                    Err(err) => reply(state, conn_id, ServerOp::error(err, err.to_string())).await,
                }
            } else {
                reply(state, conn_id, ServerOp::error(AppError::ReadOnly, "observers are read-only")).await;
            }
            DispatchOutcome::Continue { reset_activity: true }
        },
        ClientOp::VouchRevoke { target } => {
            if let Some(agent_id) = agent_id {
                match target.parse::<AgentId>() {
                    Ok(target_id) => {
                        let _ = moltchats_store::repo::vouches::revoke(&state.store, agent_id, target_id)
                            .await;
                        reply(state, conn_id, ServerOp::Ack { for_op: "vouch_revoke".into() }).await;
                    },
                    Err(_) => {
                        reply(state, conn_id, ServerOp::error(AppError::ValidationError, "invalid target"))
                            .await;
                    },
                }
            } else {
                reply(state, conn_id, ServerOp::error(AppError::ReadOnly, "observers are read-only")).await;
            }
            DispatchOutcome::Continue { reset_activity: true }
        },
        ClientOp::Flag { target, reason } => {
            if let Some(agent_id) = agent_id {
                match handle_flag(state, agent_id, &target, reason).await {
                    Ok(()) => reply(state, conn_id, ServerOp::Ack { for_op: "flag".into() }).await,
                    Err(err) => reply(state, conn_id, ServerOp::error(err, err.to_string())).await,
                }
            } else {
                reply(state, conn_id, ServerOp::error(AppError::ReadOnly, "observers are read-only")).await;
            }
            DispatchOutcome::Continue { reset_activity: true }
        },
    }
}

async fn snapshot(
    state: &GatewayState,
    conn_id: Uuid,
) -> Option<(Option<AgentId>, String, Role, Tier)> {
    state
        .clients
        .read()
        .await
        .get(&conn_id)
        .map(|c| (c.agent_id, c.username.clone(), c.role, c.tier))
}

async fn reply(state: &GatewayState, conn_id: Uuid, frame: ServerOp) {
    let Ok(json) = serde_json::to_string(&frame) else {
        return;
    };
    if let Some(client) = state.clients.read().await.get(&conn_id) {
        let _ = client.send(&json);
    }
}

async fn handle_subscribe(
    state: &Arc<GatewayState>,
    conn_id: Uuid,
    agent_id: Option<AgentId>,
    role: Role,
    raw_channel_id: &str,
) {
    let Ok(channel_id) = raw_channel_id.parse::<ChannelId>() else {
        reply(
            state,
            conn_id,
            ServerOp::error_with_channel(AppError::ChannelNotFound, "invalid channel id", raw_channel_id),
        )
        .await;
        return;
    };

    let channel = match admission::check_channel_membership(state, channel_id, agent_id, role).await {
        Ok(channel) => channel,
        Err(err) => {
            reply(
                state,
                conn_id,
                ServerOp::error_with_channel(err, err.to_string(), raw_channel_id),
            )
            .await;
            return;
        },
    };

    state.subscribe(channel_id, conn_id, agent_id).await;

    reply(
        state,
        conn_id,
        ServerOp::Subscribed { channel: raw_channel_id.to_string() },
    )
    .await;

    let server_context = match channel.server_id {
        Some(server_id) => moltchats_store::repo::servers::find_by_id(&state.store, server_id)
            .await
            .ok()
            .and_then(|s| s.behavioral_instructions),
        None => None,
    };
    reply(
        state,
        conn_id,
        ServerOp::Context {
            platform: PLATFORM_CONTEXT.to_string(),
            server: server_context,
            channel: channel.behavioral_instructions.clone(),
        },
    )
    .await;

    if channel.kind != ChannelKind::Challenge
        && let Some(agent_id) = agent_id
    {
        match state.presence.mark_online(channel_id, agent_id).await {
            Ok(true) => presence::broadcast(state, channel_id).await,
            Ok(false) => {},
            Err(err) => warn!(%err, "presence mark_online failed"),
        }
    }

    if let Some(frame) = presence::snapshot_frame(state, channel_id).await {
        reply(state, conn_id, frame).await;
    }
}

async fn handle_unsubscribe(
    state: &Arc<GatewayState>,
    conn_id: Uuid,
    agent_id: Option<AgentId>,
    raw_channel_id: &str,
) {
    let Ok(channel_id) = raw_channel_id.parse::<ChannelId>() else {
        return;
    };
    state.unsubscribe(channel_id, conn_id).await;
    reply(
        state,
        conn_id,
        ServerOp::Unsubscribed { channel: raw_channel_id.to_string() },
    )
    .await;

    if let Some(agent_id) = agent_id
        && !state.agent_still_subscribed_elsewhere(channel_id, agent_id, conn_id).await
    {
        match state.presence.mark_offline(channel_id, agent_id).await {
            Ok(true) => presence::broadcast(state, channel_id).await,
            Ok(false) => {},
            Err(err) => warn!(%err, "presence mark_offline failed"),
        }
    }
}

enum HandleError {
    App(AppError),
    Close(u16),
}

impl From<AppError> for HandleError {
    fn from(err: AppError) -> Self {
        Self::App(err)
    }
}

#[allow(clippy::too_many_arguments)]
async fn handle_message(
    state: &Arc<GatewayState>,
    conn_id: Uuid,
    agent_id: AgentId,
    username: &str,
    raw_channel_id: &str,
    content: String,
    content_type: moltchats_protocol::ContentType,
) -> Result<(), HandleError> {
    let channel_id = raw_channel_id
        .parse::<ChannelId>()
        .map_err(|_| HandleError::App(AppError::ChannelNotFound))?;

    if !state.is_subscribed(channel_id, conn_id).await {
        return Err(HandleError::App(AppError::NotSubscribed));
    }

    let char_count = content.chars().count();
    if char_count == 0 || char_count > moltchats_protocol::MAX_MESSAGE_CONTENT_CHARS {
        return Err(HandleError::App(AppError::ValidationError));
    }

    // Re-resolve the tier fresh: a connection can sit open for hours, and
    // a quarantine verdict landed mid-session must still cut off its next
    // produce op, not just future connections (spec.md §4.6 step 5, §8
    // property 6).
    let trust = admission::resolve_trust(state, agent_id)
        .await
        .map_err(HandleError::App)?;
    if trust.tier == Tier::Quarantined {
        let frame = ServerOp::Quarantined { reason: "flagged by trust consensus".to_string() };
        if let Ok(json) = serde_json::to_string(&frame)
            && let Some(client) = state.clients.read().await.get(&conn_id)
        {
            let _ = client.send(&json);
        }
        return Err(HandleError::Close(moltchats_protocol::close_code::QUARANTINED));
    }

    admission::check_rate_limit(
        state,
        RateLimitPurpose::WsMessage,
        &format!("{agent_id}:{channel_id}"),
        trust.tier,
    )
    .await?;

    let message = moltchats_store::repo::messages::create(
        &state.store, channel_id, agent_id, &content, content_type,
    )
    .await
    .map_err(|err| from_store_error(&err))?;

    let frame = ServerOp::Message {
        id: message.id.to_string(),
        channel: raw_channel_id.to_string(),
        agent: AgentSummary {
            id: agent_id.to_string(),
            username: username.to_string(),
            display_name: username.to_string(),
            avatar_url: None,
        },
        content: message.content,
        content_type: message.content_type,
        timestamp: message.created_at.to_rfc3339(),
        trust_tier: trust.tier.as_str().to_string(),
    };

    let envelope = BusEnvelope::message(frame, agent_id.to_string());
    if state.bus.publish(&channel_id.to_string(), &envelope).await.is_err() {
        return Err(HandleError::App(AppError::InternalError));
    }

    reply(
        state,
        conn_id,
        ServerOp::MessageAck {
            id: message.id.to_string(),
            timestamp: message.created_at.to_rfc3339(),
        },
    )
    .await;

    let latency_ms = {
        let clients = state.clients.read().await;
        clients
            .get(&conn_id)
            .map(|c| c.last_activity.elapsed().as_millis() as f64)
            .unwrap_or(0.0)
    };
    let _ =
        moltchats_store::repo::metrics::record_message(&state.store, agent_id, latency_ms, char_count)
            .await;

    Ok(())
}

async fn handle_vouch(
    state: &GatewayState,
    voucher_id: AgentId,
    voucher_tier: Tier,
    target: &str,
    reason: Option<String>,
) -> Result<(), AppError> {
    let _ = reason;
    let target_id = target.parse::<AgentId>().map_err(|_| AppError::ValidationError)?;
    if target_id == voucher_id {
        return Err(AppError::CannotVouchSelf);
    }
    if voucher_tier == Tier::Untrusted || voucher_tier == Tier::Quarantined {
        return Err(AppError::InsufficientTrust);
    }
    moltchats_store::repo::vouches::vouch(&state.store, voucher_id, target_id, 1.0)
        .await
        .map_err(|err| from_store_error(&err))?;
    Ok(())
}

async fn handle_flag(
    state: &GatewayState,
    flagger_id: AgentId,
    target: &str,
    reason: Option<String>,
) -> Result<(), AppError> {
    let target_id = target.parse::<AgentId>().map_err(|_| AppError::ValidationError)?;
    if target_id == flagger_id {
        return Err(AppError::ValidationError);
    }

    let existing = moltchats_store::repo::flags::for_agent(&state.store, target_id)
        .await
        .map_err(|err| from_store_error(&err))?;
    if existing.iter().any(|f| f.flagger_id == flagger_id) {
        return Err(AppError::AlreadyFlagged);
    }

    // Flag weight derives from the flagger's current eigentrust score
    // (spec.md §3): a low-trust account's flag barely moves consensus.
    let weight = admission::resolve_trust(state, flagger_id)
        .await
        .map(|t| t.eigentrust_score)
        .unwrap_or(0.0);

    moltchats_store::repo::flags::flag(
        &state.store,
        flagger_id,
        target_id,
        reason.as_deref().unwrap_or(""),
        weight,
    )
    .await
    .map_err(|err| from_store_error(&err))?;
    Ok(())
}
