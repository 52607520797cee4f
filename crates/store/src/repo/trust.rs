use chrono::{DateTime, Utc};
use moltchats_common::ids::AgentId;
use moltchats_protocol::tier::Tier;
use sqlx::PgPool;
use std::str::FromStr;

use crate::error::{Result, StoreError};
use crate::models::TrustScore;

#[derive(sqlx::FromRow)]
struct TrustScoreRow {
    agent_id: uuid::Uuid,
    eigentrust_score: f64,
    normalized_karma: f64,
    tier: String,
    is_seed: bool,
    next_challenge_at: Option<DateTime<Utc>>,
    computed_at: DateTime<Utc>,
    version: i64,
}

impl TryFrom<TrustScoreRow> for TrustScore {
    type Error = StoreError;

    fn try_from(row: TrustScoreRow) -> Result<Self> {
        Ok(Self {
            agent_id: AgentId(row.agent_id),
            eigentrust_score: row.eigentrust_score,
            normalized_karma: row.normalized_karma,
            tier: Tier::from_str(&row.tier).map_err(|_| StoreError::Conflict("unknown tier"))?,
            is_seed: row.is_seed,
            next_challenge_at: row.next_challenge_at,
            computed_at: row.computed_at,
            version: row.version,
        })
    }
}

const COLUMNS: &str = "agent_id, eigentrust_score, normalized_karma, tier, is_seed, \
                       next_challenge_at, computed_at, version";

pub async fn find(pool: &PgPool, agent_id: AgentId) -> Result<Option<TrustScore>> {
    let row = sqlx::query_as::<_, TrustScoreRow>(&format!(
        "select {COLUMNS} from trust_scores where agent_id = $1"
    ))
    .bind(agent_id.0)
    .fetch_optional(pool)
    .await?;
    row.map(TryInto::try_into).transpose()
}

/// Every agent not yet scored starts `provisional` at score 0
/// (spec.md §3, §4.6).
pub async fn find_or_default(pool: &PgPool, agent_id: AgentId) -> Result<TrustScore> {
    match find(pool, agent_id).await? {
        Some(score) => Ok(score),
        None => Ok(TrustScore {
            agent_id,
            eigentrust_score: 0.0,
            normalized_karma: 0.0,
            tier: Tier::Provisional,
            is_seed: false,
            next_challenge_at: None,
            computed_at: Utc::now(),
            version: 0,
        }),
    }
}

/// Mark an agent as operator-designated seed: exempt from Sybil penalties,
/// always seed-tier unless quarantined (spec.md §3).
pub async fn designate_seed(pool: &PgPool, agent_id: AgentId) -> Result<()> {
    sqlx::query(
        "insert into trust_scores (agent_id, eigentrust_score, tier, is_seed, computed_at, \
         version) values ($1, 1.0, 'seed', true, now(), 0) on conflict (agent_id) do update set \
         is_seed = true, tier = case when trust_scores.tier = 'quarantined' then \
         trust_scores.tier else 'seed' end",
    )
    .bind(agent_id.0)
    .execute(pool)
    .await?;
    Ok(())
}

/// Write back one Trust Worker cycle's result for an agent, bumping the
/// monotonic version (spec.md §3: "monotonic `version`").
pub async fn upsert(
    pool: &PgPool,
    agent_id: AgentId,
    eigentrust_score: f64,
    normalized_karma: f64,
    tier: Tier,
    next_challenge_at: Option<DateTime<Utc>>,
) -> Result<TrustScore> {
    let row = sqlx::query_as::<_, TrustScoreRow>(&format!(
        "insert into trust_scores (agent_id, eigentrust_score, normalized_karma, tier, is_seed, \
         next_challenge_at, computed_at, version) values ($1, $2, $3, $4, false, $5, now(), 1) \
         on conflict (agent_id) do update set eigentrust_score = excluded.eigentrust_score, \
         normalized_karma = excluded.normalized_karma, tier = excluded.tier, next_challenge_at = \
         excluded.next_challenge_at, computed_at = now(), version = trust_scores.version + 1 \
         returning {COLUMNS}"
    ))
    .bind(agent_id.0)
    .bind(eigentrust_score)
    .bind(normalized_karma)
    .bind(tier.as_str())
    .bind(next_challenge_at)
    .fetch_one(pool)
    .await?;
    row.try_into()
}

/// All scored agents, for the Trust Worker's per-cycle full pass
/// (spec.md §4.6).
pub async fn all(pool: &PgPool) -> Result<Vec<TrustScore>> {
    let rows = sqlx::query_as::<_, TrustScoreRow>(&format!("select {COLUMNS} from trust_scores"))
        .fetch_all(pool)
        .await?;
    rows.into_iter().map(TryInto::try_into).collect()
}

pub async fn quarantine(pool: &PgPool, agent_id: AgentId) -> Result<()> {
    sqlx::query(
        "insert into trust_scores (agent_id, eigentrust_score, tier, is_seed, computed_at, \
         version) values ($1, 0, 'quarantined', false, now(), 1) on conflict (agent_id) do \
         update set tier = 'quarantined', computed_at = now(), version = trust_scores.version + 1",
    )
    .bind(agent_id.0)
    .execute(pool)
    .await?;
    Ok(())
}
