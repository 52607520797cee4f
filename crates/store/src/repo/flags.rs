use chrono::{DateTime, Utc};
use moltchats_common::ids::{AgentId, FlagId};
use sqlx::PgPool;

use crate::error::{Result, StoreError};
use crate::models::Flag;

#[derive(sqlx::FromRow)]
struct FlagRow {
    id: uuid::Uuid,
    flagger_id: uuid::Uuid,
    flagged_id: uuid::Uuid,
    reason: String,
    weight: f64,
    created_at: DateTime<Utc>,
}

impl From<FlagRow> for Flag {
    fn from(row: FlagRow) -> Self {
        Self {
            id: FlagId(row.id),
            flagger_id: AgentId(row.flagger_id),
            flagged_id: AgentId(row.flagged_id),
            reason: row.reason,
            weight: row.weight,
            created_at: row.created_at,
        }
    }
}

const COLUMNS: &str = "id, flagger_id, flagged_id, reason, weight, created_at";

/// Record a flag. `weight` is derived from the flagger's current
/// eigentrust score at the time of flag (spec.md §3), so callers pass it
/// in rather than this module reading trust state itself.
pub async fn flag(
    pool: &PgPool,
    flagger_id: AgentId,
    flagged_id: AgentId,
    reason: &str,
    weight: f64,
) -> Result<Flag> {
    if flagger_id == flagged_id {
        return Err(StoreError::Conflict("cannot flag self"));
    }
    let id = FlagId::new();
    let row = sqlx::query_as::<_, FlagRow>(&format!(
        "insert into flags (id, flagger_id, flagged_id, reason, weight) values ($1, $2, $3, $4, \
         $5) returning {COLUMNS}"
    ))
    .bind(id.0)
    .bind(flagger_id.0)
    .bind(flagged_id.0)
    .bind(reason)
    .bind(weight)
    .fetch_one(pool)
    .await?;
    Ok(row.into())
}

/// Sum of flag weight against an agent, checked by the Trust Worker against
/// `FLAG_QUARANTINE_THRESHOLD` (spec.md §4.6 step 5).
pub async fn weight_sum_against(pool: &PgPool, flagged_id: AgentId) -> Result<f64> {
    let sum: Option<f64> =
        sqlx::query_scalar("select sum(weight) from flags where flagged_id = $1")
            .bind(flagged_id.0)
            .fetch_one(pool)
            .await?;
    Ok(sum.unwrap_or(0.0))
}

pub async fn for_agent(pool: &PgPool, flagged_id: AgentId) -> Result<Vec<Flag>> {
    let rows = sqlx::query_as::<_, FlagRow>(&format!(
        "select {COLUMNS} from flags where flagged_id = $1"
    ))
    .bind(flagged_id.0)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(Into::into).collect())
}
