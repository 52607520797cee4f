use chrono::{DateTime, Utc};
use moltchats_common::ids::AgentId;
use sqlx::PgPool;

use crate::error::{Result, StoreError};
use crate::models::Block;

#[derive(sqlx::FromRow)]
struct BlockRow {
    blocker_id: uuid::Uuid,
    blocked_id: uuid::Uuid,
    created_at: DateTime<Utc>,
}

impl From<BlockRow> for Block {
    fn from(row: BlockRow) -> Self {
        Self {
            blocker_id: AgentId(row.blocker_id),
            blocked_id: AgentId(row.blocked_id),
            created_at: row.created_at,
        }
    }
}

/// Block an agent. Directional: `blocker_id` no longer wants to see
/// `blocked_id` (spec.md §4.6 step 2 treats this as a negative edge
/// blocker→blocked, weight −0.5).
pub async fn block(pool: &PgPool, blocker_id: AgentId, blocked_id: AgentId) -> Result<Block> {
    if blocker_id == blocked_id {
        return Err(StoreError::Conflict("cannot block self"));
    }
    let row = sqlx::query_as::<_, BlockRow>(
        "insert into blocks (blocker_id, blocked_id) values ($1, $2) on conflict (blocker_id, \
         blocked_id) do nothing returning blocker_id, blocked_id, created_at",
    )
    .bind(blocker_id.0)
    .bind(blocked_id.0)
    .fetch_optional(pool)
    .await?;
    match row {
        Some(row) => Ok(row.into()),
        None => find(pool, blocker_id, blocked_id)
            .await?
            .ok_or(StoreError::Conflict("block not found after conflict")),
    }
}

pub async fn unblock(pool: &PgPool, blocker_id: AgentId, blocked_id: AgentId) -> Result<()> {
    sqlx::query("delete from blocks where blocker_id = $1 and blocked_id = $2")
        .bind(blocker_id.0)
        .bind(blocked_id.0)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn find(pool: &PgPool, blocker_id: AgentId, blocked_id: AgentId) -> Result<Option<Block>> {
    let row = sqlx::query_as::<_, BlockRow>(
        "select blocker_id, blocked_id, created_at from blocks where blocker_id = $1 and \
         blocked_id = $2",
    )
    .bind(blocker_id.0)
    .bind(blocked_id.0)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(Into::into))
}

/// Whether either side of the pair has blocked the other — used to gate
/// friend requests and DMs (spec.md §7 `BLOCKED`).
pub async fn either_blocks(pool: &PgPool, a: AgentId, b: AgentId) -> Result<bool> {
    let count: i64 = sqlx::query_scalar(
        "select count(*) from blocks where (blocker_id = $1 and blocked_id = $2) or \
         (blocker_id = $2 and blocked_id = $1)",
    )
    .bind(a.0)
    .bind(b.0)
    .fetch_one(pool)
    .await?;
    Ok(count > 0)
}

/// All block edges, for the Trust Worker's matrix build (spec.md §4.6
/// step 2).
pub async fn all_edges(pool: &PgPool) -> Result<Vec<Block>> {
    let rows = sqlx::query_as::<_, BlockRow>("select blocker_id, blocked_id, created_at from blocks")
        .fetch_all(pool)
        .await?;
    Ok(rows.into_iter().map(Into::into).collect())
}
