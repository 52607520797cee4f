use chrono::{DateTime, Utc};
use moltchats_common::ids::{AgentId, ChannelId, FriendshipId};
use sqlx::PgPool;
use std::str::FromStr;

use crate::error::{Result, StoreError};
use crate::models::{Channel, Friendship, FriendshipStatus};
use crate::repo::channels;

impl FromStr for FriendshipStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "accepted" => Ok(Self::Accepted),
            "rejected" => Ok(Self::Rejected),
            _ => Err(StoreError::Conflict("unknown friendship status")),
        }
    }
}

#[derive(sqlx::FromRow)]
struct FriendshipRow {
    id: uuid::Uuid,
    agent_a_id: uuid::Uuid,
    agent_b_id: uuid::Uuid,
    dm_channel_id: Option<uuid::Uuid>,
    status: String,
    requested_by: uuid::Uuid,
    created_at: DateTime<Utc>,
    responded_at: Option<DateTime<Utc>>,
}

impl TryFrom<FriendshipRow> for Friendship {
    type Error = StoreError;

    fn try_from(row: FriendshipRow) -> Result<Self> {
        Ok(Self {
            id: FriendshipId(row.id),
            agent_a_id: AgentId(row.agent_a_id),
            agent_b_id: AgentId(row.agent_b_id),
            dm_channel_id: row.dm_channel_id.map(ChannelId),
            status: FriendshipStatus::from_str(&row.status)?,
            requested_by: AgentId(row.requested_by),
            created_at: row.created_at,
            responded_at: row.responded_at,
        })
    }
}

const COLUMNS: &str = "id, agent_a_id, agent_b_id, dm_channel_id, status, requested_by, \
                       created_at, responded_at";

/// Open a friend request, storing the pair in canonical order
/// (spec.md §3 invariant).
pub async fn request(pool: &PgPool, requester: AgentId, target: AgentId) -> Result<Friendship> {
    if requester == target {
        return Err(StoreError::Conflict("cannot friend self"));
    }
    let (a, b) = Friendship::canonical_order(requester, target);
    let id = FriendshipId::new();
    let row = sqlx::query_as::<_, FriendshipRow>(&format!(
        "insert into friendships (id, agent_a_id, agent_b_id, status, requested_by) values \
         ($1, $2, $3, 'pending', $4) returning {COLUMNS}"
    ))
    .bind(id.0)
    .bind(a.0)
    .bind(b.0)
    .bind(requester.0)
    .fetch_one(pool)
    .await?;
    row.try_into()
}

/// Accept a pending friend request: atomically flips status to `accepted`
/// and creates the bound DM Channel (spec.md §3: "acceptance atomically
/// creates the Friendship and the DM Channel").
pub async fn accept(pool: &PgPool, id: FriendshipId) -> Result<(Friendship, Channel)> {
    let mut tx = pool.begin().await?;
    let row = sqlx::query_as::<_, FriendshipRow>(&format!(
        "update friendships set status = 'accepted', responded_at = now() where id = $1 and \
         status = 'pending' returning {COLUMNS}"
    ))
    .bind(id.0)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or(StoreError::NotFound("pending friendship"))?;

    let channel = channels::create_dm_channel(&mut tx, id).await?;

    sqlx::query("update friendships set dm_channel_id = $1 where id = $2")
        .bind(channel.id.0)
        .bind(id.0)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    let mut friendship: Friendship = row.try_into()?;
    friendship.dm_channel_id = Some(channel.id);
    Ok((friendship, channel))
}

pub async fn reject(pool: &PgPool, id: FriendshipId) -> Result<()> {
    sqlx::query(
        "update friendships set status = 'rejected', responded_at = now() where id = $1 and \
         status = 'pending'",
    )
    .bind(id.0)
    .execute(pool)
    .await?;
    Ok(())
}

/// Every accepted friendship as a canonical `(a, b)` pair, the symmetric
/// weight-0.5 edge the Trust Worker folds into the interaction graph in both
/// directions (spec.md §4.6 step 2).
pub async fn all_accepted(pool: &PgPool) -> Result<Vec<(AgentId, AgentId)>> {
    let rows: Vec<(uuid::Uuid, uuid::Uuid)> = sqlx::query_as(
        "select agent_a_id, agent_b_id from friendships where status = 'accepted'",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows
        .into_iter()
        .map(|(a, b)| (AgentId(a), AgentId(b)))
        .collect())
}

/// Whether two agents are accepted friends, regardless of who requested —
/// used to exclude friends of the subject from a challenge panel
/// (spec.md §4.7).
pub async fn are_friends(pool: &PgPool, x: AgentId, y: AgentId) -> Result<bool> {
    let (a, b) = Friendship::canonical_order(x, y);
    let exists: bool = sqlx::query_scalar(
        "select exists(select 1 from friendships where agent_a_id = $1 and agent_b_id = $2 and \
         status = 'accepted')",
    )
    .bind(a.0)
    .bind(b.0)
    .fetch_one(pool)
    .await?;
    Ok(exists)
}

pub async fn find_by_id(pool: &PgPool, id: FriendshipId) -> Result<Friendship> {
    let row = sqlx::query_as::<_, FriendshipRow>(&format!(
        "select {COLUMNS} from friendships where id = $1"
    ))
    .bind(id.0)
    .fetch_optional(pool)
    .await?
    .ok_or(StoreError::NotFound("friendship"))?;
    row.try_into()
}

/// Deleting a Friendship cascades to its DM Channel (spec.md §3 invariant,
/// enforced by the schema's `on delete cascade` from channels to
/// friendships).
pub async fn delete(pool: &PgPool, id: FriendshipId) -> Result<()> {
    sqlx::query("delete from friendships where id = $1")
        .bind(id.0)
        .execute(pool)
        .await?;
    Ok(())
}
