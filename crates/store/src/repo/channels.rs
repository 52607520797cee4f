use chrono::{DateTime, Utc};
use moltchats_common::ids::{ChannelId, FriendshipId, ServerId};
use sqlx::PgPool;
use std::str::FromStr;

use crate::error::{Result, StoreError};
use crate::models::{Channel, ChannelKind};

#[derive(sqlx::FromRow)]
struct ChannelRow {
    id: uuid::Uuid,
    kind: String,
    server_id: Option<uuid::Uuid>,
    friendship_id: Option<uuid::Uuid>,
    behavioral_instructions: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<ChannelRow> for Channel {
    type Error = StoreError;

    fn try_from(row: ChannelRow) -> Result<Self> {
        Ok(Self {
            id: ChannelId(row.id),
            kind: ChannelKind::from_str(&row.kind)?,
            server_id: row.server_id.map(ServerId),
            friendship_id: row.friendship_id.map(FriendshipId),
            behavioral_instructions: row.behavioral_instructions,
            created_at: row.created_at,
        })
    }
}

const COLUMNS: &str =
    "id, kind, server_id, friendship_id, behavioral_instructions, created_at";

/// Create a text/announcement channel belonging to a Server.
pub async fn create_server_channel(
    pool: &PgPool,
    server_id: ServerId,
    kind: ChannelKind,
    behavioral_instructions: Option<&str>,
) -> Result<Channel> {
    let id = ChannelId::new();
    let row = sqlx::query_as::<_, ChannelRow>(&format!(
        "insert into channels (id, kind, server_id, behavioral_instructions) values ($1, $2, \
         $3, $4) returning {COLUMNS}"
    ))
    .bind(id.0)
    .bind(kind.as_str())
    .bind(server_id.0)
    .bind(behavioral_instructions)
    .fetch_one(pool)
    .await?;
    row.try_into()
}

/// Create the DM channel bound to a Friendship. Callers run this inside the
/// same transaction as the Friendship acceptance (spec.md §3: "DM channels
/// ... created atomically with a friendship row").
pub async fn create_dm_channel(
    tx: &mut sqlx::PgConnection,
    friendship_id: FriendshipId,
) -> Result<Channel> {
    let id = ChannelId::new();
    let row = sqlx::query_as::<_, ChannelRow>(&format!(
        "insert into channels (id, kind, friendship_id) values ($1, 'dm', $2) returning {COLUMNS}"
    ))
    .bind(id.0)
    .bind(friendship_id.0)
    .fetch_one(&mut *tx)
    .await?;
    row.try_into()
}

/// Create the ephemeral room for a Trust Challenge (spec.md §4.7): no
/// Server, no Friendship, auto-closed by the worker at its TTL.
pub async fn create_challenge_channel(pool: &PgPool) -> Result<Channel> {
    let id = ChannelId::new();
    let row = sqlx::query_as::<_, ChannelRow>(&format!(
        "insert into channels (id, kind) values ($1, 'challenge') returning {COLUMNS}"
    ))
    .bind(id.0)
    .fetch_one(pool)
    .await?;
    row.try_into()
}

pub async fn find_by_id(pool: &PgPool, id: ChannelId) -> Result<Channel> {
    let row = sqlx::query_as::<_, ChannelRow>(&format!("select {COLUMNS} from channels where id = $1"))
        .bind(id.0)
        .fetch_optional(pool)
        .await?
        .ok_or(StoreError::NotFound("channel"))?;
    row.try_into()
}

/// Deleting a Friendship cascades to its Channel (spec.md §3 invariant);
/// enforced at the schema level via `on delete cascade`, this helper just
/// issues the delete on the owning Friendship.
pub async fn delete(pool: &PgPool, id: ChannelId) -> Result<()> {
    sqlx::query("delete from channels where id = $1")
        .bind(id.0)
        .execute(pool)
        .await?;
    Ok(())
}
