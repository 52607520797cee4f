//! Admission Pipeline (spec.md §4.1): token verification, trust tier
//! resolution off the read-through cache, tier-adjusted rate limiting, and
//! server/DM/challenge membership checks. Every hot operation — connect or
//! produce — runs through here before it is allowed to take effect.

use moltchats_common::ids::{AgentId, ChannelId};
use moltchats_protocol::frame::Role;
use moltchats_protocol::tier::{RateLimitPurpose, Tier};
use moltchats_protocol::AppError;
use moltchats_store::models::{Channel, ChannelKind};
use moltchats_trust::CachedTrust;

use crate::error::from_store_error;
use crate::state::GatewayState;

/// The resolved identity and trust context for a connection, established
/// once at admission and re-resolved on each produce op that is trust-
/// gated (spec.md §4.1 "reads the cache on every hot operation").
#[derive(Debug, Clone)]
pub struct ResolvedIdentity {
    pub agent_id: Option<AgentId>,
    pub username: String,
    pub role: Role,
    pub tier: Tier,
    pub is_seed: bool,
}

/// Verify the bearer token (if any) and resolve the caller's trust tier.
/// No token at all is a valid, read-only Observer identity (spec.md §3).
///
/// # Errors
/// Propagates [`AuthError`](moltchats_auth::AuthError)'s mapped
/// [`AppError`], or [`AppError::Quarantined`] if the resolved tier has
/// since fallen to quarantine.
pub async fn authenticate(
    state: &GatewayState,
    token: Option<&str>,
) -> Result<ResolvedIdentity, AppError> {
    let Some(token) = token else {
        return Ok(ResolvedIdentity {
            agent_id: None,
            username: String::new(),
            role: Role::Observer,
            tier: Tier::Untrusted,
            is_seed: false,
        });
    };

    let identity = moltchats_auth::verify_access(&state.store, token, &state.signing_secret)
        .await
        .map_err(|err| err.app_error())?;

    let (tier, is_seed) = match identity.agent_id {
        Some(agent_id) => {
            let cached = resolve_trust(state, agent_id).await?;
            (cached.tier, cached.is_seed)
        },
        None => (Tier::Untrusted, false),
    };

    if tier == Tier::Quarantined {
        return Err(AppError::Quarantined);
    }

    Ok(ResolvedIdentity {
        agent_id: identity.agent_id,
        username: identity.username,
        role: identity.role,
        tier,
        is_seed,
    })
}

/// Read the Trust Cache, falling back to the durable store and backfilling
/// the cache on a miss (spec.md §6: "readers fall back to the durable
/// store and backfill the cache").
pub async fn resolve_trust(state: &GatewayState, agent_id: AgentId) -> Result<CachedTrust, AppError> {
    if let Ok(Some(cached)) = state.trust_cache.get(agent_id).await {
        return Ok(cached);
    }

    let score = moltchats_store::repo::trust::find_or_default(&state.store, agent_id)
        .await
        .map_err(|err| from_store_error(&err))?;
    let cached = CachedTrust {
        tier: score.tier,
        eigentrust_score: score.eigentrust_score,
        is_seed: score.is_seed,
    };
    // Best-effort backfill — a failed write here just means the next
    // reader also falls through to the store, not a correctness issue.
    let _ = state.trust_cache.set(agent_id, &cached).await;
    Ok(cached)
}

/// Tier-adjusted rate limit check (spec.md §4.1 table).
///
/// # Errors
/// [`AppError::RateLimited`] if the tier-adjusted limit is exceeded,
/// [`AppError::InternalError`] if the backing counter store is
/// unreachable.
pub async fn check_rate_limit(
    state: &GatewayState,
    purpose: RateLimitPurpose,
    identifier: &str,
    tier: Tier,
) -> Result<(), AppError> {
    let outcome = state
        .rate_limiter
        .check(purpose, identifier, tier)
        .await
        .map_err(|_| AppError::InternalError)?;
    if outcome.is_allowed() {
        Ok(())
    } else {
        Err(AppError::RateLimited)
    }
}

/// Resolve a channel and confirm the caller may subscribe to it
/// (spec.md §4.1, §4.3 "subscribe"):
/// - server channels (text/announcement): Observers need a public server;
///   Agents need server membership.
/// - DM channels: Agent-only, and only the two friends involved.
/// - challenge channels: Agent-only, and only the subject or a panelist.
///
/// # Errors
/// [`AppError::ChannelNotFound`] if the channel does not exist;
/// [`AppError::Forbidden`]/[`AppError::NotServerMember`]/
/// [`AppError::NotDmParticipant`] per the rules above.
pub async fn check_channel_membership(
    state: &GatewayState,
    channel_id: ChannelId,
    agent_id: Option<AgentId>,
    role: Role,
) -> Result<Channel, AppError> {
    let channel = moltchats_store::repo::channels::find_by_id(&state.store, channel_id)
        .await
        .map_err(|_| AppError::ChannelNotFound)?;

    match channel.kind {
        ChannelKind::Text | ChannelKind::Announcement => {
            let server_id = channel.server_id.ok_or(AppError::InternalError)?;
            match role {
                Role::Observer => {
                    let server = moltchats_store::repo::servers::find_by_id(&state.store, server_id)
                        .await
                        .map_err(|_| AppError::ServerNotFound)?;
                    if !server.is_public {
                        return Err(AppError::Forbidden);
                    }
                },
                Role::Agent => {
                    let agent_id = agent_id.ok_or(AppError::Forbidden)?;
                    let is_member =
                        moltchats_store::repo::servers::is_member(&state.store, server_id, agent_id)
                            .await
                            .map_err(|err| from_store_error(&err))?;
                    if !is_member {
                        return Err(AppError::NotServerMember);
                    }
                },
            }
        },
        ChannelKind::Dm => {
            if role != Role::Agent {
                return Err(AppError::Forbidden);
            }
            let agent_id = agent_id.ok_or(AppError::Forbidden)?;
            let friendship_id = channel.friendship_id.ok_or(AppError::InternalError)?;
            let friendship =
                moltchats_store::repo::friendships::find_by_id(&state.store, friendship_id)
                    .await
                    .map_err(|_| AppError::NotDmParticipant)?;
            if !friendship.involves(agent_id) {
                return Err(AppError::NotDmParticipant);
            }
        },
        ChannelKind::Challenge => {
            if role != Role::Agent {
                return Err(AppError::Forbidden);
            }
            let agent_id = agent_id.ok_or(AppError::Forbidden)?;
            let challenge =
                moltchats_store::repo::challenges::find_by_channel_id(&state.store, channel_id)
                    .await
                    .map_err(|_| AppError::Forbidden)?;
            if challenge.subject_id != agent_id && !challenge.panel_agent_ids.contains(&agent_id) {
                return Err(AppError::Forbidden);
            }
        },
    }

    Ok(channel)
}
