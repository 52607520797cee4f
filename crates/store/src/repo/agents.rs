use chrono::{DateTime, Utc};
use moltchats_common::ids::AgentId;
use moltchats_protocol::frame::{AgentStatus, Presence};
use sqlx::PgPool;

use crate::error::{Result, StoreError};
use crate::models::Agent;

#[derive(sqlx::FromRow)]
struct AgentRow {
    id: uuid::Uuid,
    username: String,
    public_key: String,
    status: String,
    presence: String,
    capability_tags: Vec<String>,
    created_at: DateTime<Utc>,
    verified_at: Option<DateTime<Utc>>,
}

impl TryFrom<AgentRow> for Agent {
    type Error = StoreError;

    fn try_from(row: AgentRow) -> Result<Self> {
        Ok(Self {
            id: AgentId(row.id),
            username: row.username,
            public_key: row.public_key,
            status: parse_status(&row.status)?,
            presence: parse_presence(&row.presence)?,
            capability_tags: row.capability_tags,
            created_at: row.created_at,
            verified_at: row.verified_at,
        })
    }
}

fn parse_status(s: &str) -> Result<AgentStatus> {
    match s {
        "pending" => Ok(AgentStatus::Pending),
        "verified" => Ok(AgentStatus::Verified),
        "suspended" => Ok(AgentStatus::Suspended),
        _ => Err(StoreError::Conflict("unknown agent status")),
    }
}

fn status_str(s: AgentStatus) -> &'static str {
    match s {
        AgentStatus::Pending => "pending",
        AgentStatus::Verified => "verified",
        AgentStatus::Suspended => "suspended",
    }
}

fn parse_presence(s: &str) -> Result<Presence> {
    match s {
        "online" => Ok(Presence::Online),
        "idle" => Ok(Presence::Idle),
        "offline" => Ok(Presence::Offline),
        _ => Err(StoreError::Conflict("unknown presence value")),
    }
}

fn presence_str(p: Presence) -> &'static str {
    match p {
        Presence::Online => "online",
        Presence::Idle => "idle",
        Presence::Offline => "offline",
    }
}

/// Register a new agent, pending verification. Username is case-folded
/// before insert (spec.md §3 invariant: uniqueness is case-folded).
pub async fn register(pool: &PgPool, username: &str, public_key: &str) -> Result<Agent> {
    let id = AgentId::new();
    let lowered = username.to_lowercase();
    let row = sqlx::query_as::<_, AgentRow>(
        r"insert into agents (id, username, public_key, status, presence)
          values ($1, $2, $3, 'pending', 'offline')
          returning id, username, public_key, status, presence, capability_tags,
                    created_at, verified_at",
    )
    .bind(id.0)
    .bind(&lowered)
    .bind(public_key)
    .fetch_one(pool)
    .await?;
    row.try_into()
}

pub async fn find_by_id(pool: &PgPool, id: AgentId) -> Result<Agent> {
    let row = sqlx::query_as::<_, AgentRow>(
        r"select id, username, public_key, status, presence, capability_tags,
                 created_at, verified_at
          from agents where id = $1",
    )
    .bind(id.0)
    .fetch_optional(pool)
    .await?
    .ok_or(StoreError::NotFound("agent"))?;
    row.try_into()
}

pub async fn find_by_username(pool: &PgPool, username: &str) -> Result<Agent> {
    let row = sqlx::query_as::<_, AgentRow>(
        r"select id, username, public_key, status, presence, capability_tags,
                 created_at, verified_at
          from agents where lower(username) = lower($1)",
    )
    .bind(username)
    .fetch_optional(pool)
    .await?
    .ok_or(StoreError::NotFound("agent"))?;
    row.try_into()
}

/// Every verified agent, the vertex set `V` for the Trust Worker's matrix
/// build (spec.md §4.6 step 1).
pub async fn all_verified(pool: &PgPool) -> Result<Vec<Agent>> {
    let rows = sqlx::query_as::<_, AgentRow>(
        r"select id, username, public_key, status, presence, capability_tags,
                 created_at, verified_at
          from agents where status = 'verified'",
    )
    .fetch_all(pool)
    .await?;
    rows.into_iter().map(TryInto::try_into).collect()
}

/// Mark an agent verified after a successful challenge-response signature
/// (spec.md §3 lifecycle).
pub async fn mark_verified(pool: &PgPool, id: AgentId) -> Result<()> {
    sqlx::query("update agents set status = 'verified', verified_at = now() where id = $1")
        .bind(id.0)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn suspend(pool: &PgPool, id: AgentId) -> Result<()> {
    set_status(pool, id, AgentStatus::Suspended).await
}

async fn set_status(pool: &PgPool, id: AgentId, status: AgentStatus) -> Result<()> {
    sqlx::query("update agents set status = $1 where id = $2")
        .bind(status_str(status))
        .bind(id.0)
        .execute(pool)
        .await?;
    Ok(())
}

/// Presence is mutated only by the Connection Manager (spec.md §3).
pub async fn set_presence(pool: &PgPool, id: AgentId, presence: Presence) -> Result<()> {
    sqlx::query("update agents set presence = $1 where id = $2")
        .bind(presence_str(presence))
        .bind(id.0)
        .execute(pool)
        .await?;
    Ok(())
}
