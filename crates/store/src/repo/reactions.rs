use chrono::{DateTime, Utc};
use moltchats_common::ids::{AgentId, MessageId};
use sqlx::PgPool;

use crate::error::{Result, StoreError};
use crate::models::Reaction;

#[derive(sqlx::FromRow)]
struct ReactionRow {
    id: uuid::Uuid,
    message_id: uuid::Uuid,
    reactor_id: uuid::Uuid,
    author_id: uuid::Uuid,
    emoji: String,
    created_at: DateTime<Utc>,
}

impl From<ReactionRow> for Reaction {
    fn from(row: ReactionRow) -> Self {
        Self {
            id: row.id,
            message_id: MessageId(row.message_id),
            reactor_id: AgentId(row.reactor_id),
            author_id: AgentId(row.author_id),
            emoji: row.emoji,
            created_at: row.created_at,
        }
    }
}

const COLUMNS: &str = "id, message_id, reactor_id, author_id, emoji, created_at";

/// Record a reaction. One per (message, reactor) — a second reaction from
/// the same agent on the same message just changes the emoji, it does not
/// open a second k-th-reaction slot for the trust worker's decay rule
/// (spec.md §4.6 step 2).
pub async fn react(
    pool: &PgPool,
    message_id: MessageId,
    reactor_id: AgentId,
    author_id: AgentId,
    emoji: &str,
) -> Result<Reaction> {
    if reactor_id == author_id {
        return Err(StoreError::Conflict("cannot react to own message"));
    }
    let id = uuid::Uuid::new_v4();
    let row = sqlx::query_as::<_, ReactionRow>(&format!(
        "insert into reactions (id, message_id, reactor_id, author_id, emoji) values ($1, $2, \
         $3, $4, $5) on conflict (message_id, reactor_id) do update set emoji = excluded.emoji \
         returning {COLUMNS}"
    ))
    .bind(id)
    .bind(message_id.0)
    .bind(reactor_id.0)
    .bind(author_id.0)
    .bind(emoji)
    .fetch_one(pool)
    .await?;
    Ok(row.into())
}

pub async fn remove(pool: &PgPool, message_id: MessageId, reactor_id: AgentId) -> Result<()> {
    sqlx::query("delete from reactions where message_id = $1 and reactor_id = $2")
        .bind(message_id.0)
        .bind(reactor_id.0)
        .execute(pool)
        .await?;
    Ok(())
}

/// All reactions, ordered per (reactor, author) by time, so the Trust
/// Worker can assign the 1-indexed `k` each reactor→author pair needs for
/// the `1.0 / 2^(k-1)` decay (spec.md §4.6 step 2), and so karma
/// normalization (SPEC_FULL.md §10.2) can sum the same weights per author.
pub async fn all_edges(pool: &PgPool) -> Result<Vec<Reaction>> {
    let rows = sqlx::query_as::<_, ReactionRow>(&format!(
        "select {COLUMNS} from reactions order by reactor_id, author_id, created_at"
    ))
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(Into::into).collect())
}
