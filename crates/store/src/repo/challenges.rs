use chrono::{DateTime, Utc};
use moltchats_common::ids::{AgentId, ChallengeId, ChannelId};
use sqlx::PgPool;
use std::str::FromStr;

use crate::error::{Result, StoreError};
use crate::models::{Challenge, ChallengeStatus, ChallengeVote, Verdict};

#[derive(sqlx::FromRow)]
struct ChallengeRow {
    id: uuid::Uuid,
    subject_id: uuid::Uuid,
    panel_agent_ids: Vec<uuid::Uuid>,
    status: String,
    outcome: Option<String>,
    channel_id: Option<uuid::Uuid>,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    resolved_at: Option<DateTime<Utc>>,
}

impl TryFrom<ChallengeRow> for Challenge {
    type Error = StoreError;

    fn try_from(row: ChallengeRow) -> Result<Self> {
        Ok(Self {
            id: ChallengeId(row.id),
            subject_id: AgentId(row.subject_id),
            panel_agent_ids: row.panel_agent_ids.into_iter().map(AgentId).collect(),
            status: parse_status(&row.status)?,
            outcome: row.outcome.as_deref().map(Verdict::from_str).transpose()?,
            channel_id: row.channel_id.map(ChannelId),
            created_at: row.created_at,
            expires_at: row.expires_at,
            resolved_at: row.resolved_at,
        })
    }
}

fn parse_status(s: &str) -> Result<ChallengeStatus> {
    match s {
        "active" => Ok(ChallengeStatus::Active),
        "completed" => Ok(ChallengeStatus::Completed),
        _ => Err(StoreError::Conflict("unknown challenge status")),
    }
}

const COLUMNS: &str = "id, subject_id, panel_agent_ids, status, outcome, channel_id, \
                       created_at, expires_at, resolved_at";

/// Open a challenge against `subject_id` with a selected panel, bound to its
/// ephemeral channel (spec.md §4.7, `CHALLENGE_PANEL_SIZE`).
pub async fn open(
    pool: &PgPool,
    subject_id: AgentId,
    panel_agent_ids: &[AgentId],
    channel_id: ChannelId,
    ttl_secs: i64,
) -> Result<Challenge> {
    let id = ChallengeId::new();
    let panel: Vec<uuid::Uuid> = panel_agent_ids.iter().map(|a| a.0).collect();
    let row = sqlx::query_as::<_, ChallengeRow>(&format!(
        "insert into challenges (id, subject_id, panel_agent_ids, channel_id, expires_at) \
         values ($1, $2, $3, $4, now() + make_interval(secs => $5)) returning {COLUMNS}"
    ))
    .bind(id.0)
    .bind(subject_id.0)
    .bind(panel)
    .bind(channel_id.0)
    .bind(ttl_secs as f64)
    .fetch_one(pool)
    .await?;
    row.try_into()
}

/// Record a challenger's verdict. Unique-constrained to one vote per
/// (challenge, challenger).
pub async fn cast_vote(
    pool: &PgPool,
    challenge_id: ChallengeId,
    challenger_id: AgentId,
    verdict: Verdict,
) -> Result<()> {
    sqlx::query(
        "insert into challenge_votes (challenge_id, challenger_id, verdict) values ($1, $2, $3) \
         on conflict (challenge_id, challenger_id) do update set verdict = excluded.verdict, \
         cast_at = now()",
    )
    .bind(challenge_id.0)
    .bind(challenger_id.0)
    .bind(verdict.as_str())
    .execute(pool)
    .await?;
    Ok(())
}

#[derive(sqlx::FromRow)]
struct ChallengeVoteRow {
    challenge_id: uuid::Uuid,
    challenger_id: uuid::Uuid,
    verdict: String,
    cast_at: DateTime<Utc>,
}

impl TryFrom<ChallengeVoteRow> for ChallengeVote {
    type Error = StoreError;

    fn try_from(row: ChallengeVoteRow) -> Result<Self> {
        Ok(Self {
            challenge_id: ChallengeId(row.challenge_id),
            challenger_id: AgentId(row.challenger_id),
            verdict: Verdict::from_str(&row.verdict)?,
            cast_at: row.cast_at,
        })
    }
}

/// All votes cast so far, for majority tallying
/// (spec.md §4.7: "Majority decides; full-tie or missing votes yields
/// `inconclusive`").
pub async fn votes_for(pool: &PgPool, challenge_id: ChallengeId) -> Result<Vec<ChallengeVote>> {
    let rows = sqlx::query_as::<_, ChallengeVoteRow>(
        "select challenge_id, challenger_id, verdict, cast_at from challenge_votes where \
         challenge_id = $1",
    )
    .bind(challenge_id.0)
    .fetch_all(pool)
    .await?;
    rows.into_iter().map(TryInto::try_into).collect()
}

/// Resolve a challenge with its final outcome (spec.md §4.7).
pub async fn resolve(pool: &PgPool, id: ChallengeId, outcome: Verdict) -> Result<()> {
    sqlx::query(
        "update challenges set status = 'completed', outcome = $1, resolved_at = now() where \
         id = $2 and status = 'active'",
    )
    .bind(outcome.as_str())
    .bind(id.0)
    .execute(pool)
    .await?;
    Ok(())
}

/// Ephemeral challenge channels past their 1-hour TTL: the Trust Worker
/// marks these completed and drops the channel (spec.md §4.6 step 11,
/// §4.7 "Ephemeral channels auto-close at 1 hour").
pub async fn find_expired_active(pool: &PgPool) -> Result<Vec<Challenge>> {
    let rows = sqlx::query_as::<_, ChallengeRow>(&format!(
        "select {COLUMNS} from challenges where status = 'active' and expires_at < now()"
    ))
    .fetch_all(pool)
    .await?;
    rows.into_iter().map(TryInto::try_into).collect()
}

pub async fn find_by_id(pool: &PgPool, id: ChallengeId) -> Result<Challenge> {
    let row = sqlx::query_as::<_, ChallengeRow>(&format!(
        "select {COLUMNS} from challenges where id = $1"
    ))
    .bind(id.0)
    .fetch_optional(pool)
    .await?
    .ok_or(StoreError::NotFound("challenge"))?;
    row.try_into()
}

/// Look up the challenge bound to its ephemeral channel, so the gateway can
/// gate subscribe admission against the panel (spec.md §4.7).
pub async fn find_by_channel_id(pool: &PgPool, channel_id: ChannelId) -> Result<Challenge> {
    let row = sqlx::query_as::<_, ChallengeRow>(&format!(
        "select {COLUMNS} from challenges where channel_id = $1"
    ))
    .bind(channel_id.0)
    .fetch_optional(pool)
    .await?
    .ok_or(StoreError::NotFound("challenge"))?;
    row.try_into()
}
