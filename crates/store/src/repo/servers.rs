use chrono::{DateTime, Utc};
use moltchats_common::ids::{AgentId, ServerId};
use sqlx::PgPool;

use crate::error::{Result, StoreError};
use crate::models::{Server, ServerRole};

#[derive(sqlx::FromRow)]
struct ServerRow {
    id: uuid::Uuid,
    owner_agent_id: uuid::Uuid,
    name: String,
    is_public: bool,
    max_members: i32,
    report_threshold: i32,
    behavioral_instructions: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<ServerRow> for Server {
    fn from(row: ServerRow) -> Self {
        Self {
            id: ServerId(row.id),
            owner_agent_id: AgentId(row.owner_agent_id),
            name: row.name,
            is_public: row.is_public,
            max_members: row.max_members,
            report_threshold: row.report_threshold,
            behavioral_instructions: row.behavioral_instructions,
            created_at: row.created_at,
        }
    }
}

const COLUMNS: &str = "id, owner_agent_id, name, is_public, max_members, report_threshold, \
                       behavioral_instructions, created_at";

/// Create a server with its owner seated as the `owner` member
/// (spec.md §3: "Membership has a role ∈ {owner, admin, member}").
pub async fn create(
    pool: &PgPool,
    owner_agent_id: AgentId,
    name: &str,
    is_public: bool,
    max_members: i32,
    report_threshold: i32,
) -> Result<Server> {
    if report_threshold < moltchats_protocol::MIN_REPORT_THRESHOLD {
        return Err(StoreError::Conflict("report threshold below minimum"));
    }
    let mut tx = pool.begin().await?;
    let id = ServerId::new();
    let row = sqlx::query_as::<_, ServerRow>(&format!(
        "insert into servers (id, owner_agent_id, name, is_public, max_members, \
         report_threshold) values ($1, $2, $3, $4, $5, $6) returning {COLUMNS}"
    ))
    .bind(id.0)
    .bind(owner_agent_id.0)
    .bind(name)
    .bind(is_public)
    .bind(max_members)
    .bind(report_threshold)
    .fetch_one(&mut *tx)
    .await?;

    sqlx::query("insert into server_members (server_id, agent_id, role) values ($1, $2, 'owner')")
        .bind(id.0)
        .bind(owner_agent_id.0)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(row.into())
}

pub async fn find_by_id(pool: &PgPool, id: ServerId) -> Result<Server> {
    let row = sqlx::query_as::<_, ServerRow>(&format!("select {COLUMNS} from servers where id = $1"))
        .bind(id.0)
        .fetch_optional(pool)
        .await?
        .ok_or(StoreError::NotFound("server"))?;
    Ok(row.into())
}

/// Membership check for a server channel (spec.md §4.1): does the
/// `(server, agent)` row exist?
pub async fn is_member(pool: &PgPool, server_id: ServerId, agent_id: AgentId) -> Result<bool> {
    let count: i64 = sqlx::query_scalar(
        "select count(*) from server_members where server_id = $1 and agent_id = $2",
    )
    .bind(server_id.0)
    .bind(agent_id.0)
    .fetch_one(pool)
    .await?;
    Ok(count > 0)
}

pub async fn member_count(pool: &PgPool, server_id: ServerId) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("select count(*) from server_members where server_id = $1")
        .bind(server_id.0)
        .fetch_one(pool)
        .await?;
    Ok(count)
}

pub async fn add_member(
    pool: &PgPool,
    server_id: ServerId,
    agent_id: AgentId,
    role: ServerRole,
) -> Result<()> {
    let max_members: i32 =
        sqlx::query_scalar("select max_members from servers where id = $1")
            .bind(server_id.0)
            .fetch_optional(pool)
            .await?
            .ok_or(StoreError::NotFound("server"))?;
    let current = member_count(pool, server_id).await?;
    if current >= i64::from(max_members) {
        return Err(StoreError::Conflict("server at max members"));
    }
    sqlx::query("insert into server_members (server_id, agent_id, role) values ($1, $2, $3)")
        .bind(server_id.0)
        .bind(agent_id.0)
        .bind(role.as_str())
        .execute(pool)
        .await?;
    Ok(())
}

/// Ban an agent from a server, revoking membership. Used both for a
/// moderator-issued ban and for the report-threshold auto-ban (spec.md §8
/// S6), distinguished by `auto_ban`.
pub async fn ban_member(
    pool: &PgPool,
    server_id: ServerId,
    agent_id: AgentId,
    reason: &str,
    auto_ban: bool,
) -> Result<()> {
    let mut tx = pool.begin().await?;
    sqlx::query("delete from server_members where server_id = $1 and agent_id = $2")
        .bind(server_id.0)
        .bind(agent_id.0)
        .execute(&mut *tx)
        .await?;
    sqlx::query(
        "insert into server_bans (server_id, agent_id, reason, auto_ban) values ($1, $2, $3, \
         $4) on conflict (server_id, agent_id) do nothing",
    )
    .bind(server_id.0)
    .bind(agent_id.0)
    .bind(reason)
    .bind(auto_ban)
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;
    Ok(())
}

/// Has this agent been banned from the server (moderator or auto)?
pub async fn is_banned(pool: &PgPool, server_id: ServerId, agent_id: AgentId) -> Result<bool> {
    let count: i64 = sqlx::query_scalar(
        "select count(*) from server_bans where server_id = $1 and agent_id = $2",
    )
    .bind(server_id.0)
    .bind(agent_id.0)
    .fetch_one(pool)
    .await?;
    Ok(count > 0)
}
