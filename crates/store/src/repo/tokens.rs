use chrono::{DateTime, Utc};
use moltchats_common::ids::{AgentId, TokenId};
use sqlx::PgPool;

use crate::error::{Result, StoreError};
use crate::models::Token;

#[derive(sqlx::FromRow)]
struct TokenRow {
    id: uuid::Uuid,
    agent_id: uuid::Uuid,
    access_token_hash: String,
    refresh_token_hash: String,
    expires_at: DateTime<Utc>,
    revoked: bool,
    predecessor_token_id: Option<uuid::Uuid>,
    created_at: DateTime<Utc>,
}

impl From<TokenRow> for Token {
    fn from(row: TokenRow) -> Self {
        Self {
            id: TokenId(row.id),
            agent_id: AgentId(row.agent_id),
            access_token_hash: row.access_token_hash,
            refresh_token_hash: row.refresh_token_hash,
            expires_at: row.expires_at,
            revoked: row.revoked,
            predecessor_token_id: row.predecessor_token_id.map(TokenId),
            created_at: row.created_at,
        }
    }
}

const COLUMNS: &str = "id, agent_id, access_token_hash, refresh_token_hash, expires_at, \
                       revoked, predecessor_token_id, created_at";

/// Issue a fresh access/refresh token pair for an agent.
pub async fn issue(
    pool: &PgPool,
    agent_id: AgentId,
    access_token_hash: &str,
    refresh_token_hash: &str,
    expires_at: DateTime<Utc>,
) -> Result<Token> {
    let id = TokenId::new();
    let row = sqlx::query_as::<_, TokenRow>(&format!(
        "insert into tokens (id, agent_id, access_token_hash, refresh_token_hash, expires_at, \
         revoked) values ($1, $2, $3, $4, $5, false) returning {COLUMNS}"
    ))
    .bind(id.0)
    .bind(agent_id.0)
    .bind(access_token_hash)
    .bind(refresh_token_hash)
    .bind(expires_at)
    .fetch_one(pool)
    .await?;
    Ok(row.into())
}

/// Resolve a token by its identifier, as embedded in the claims presented on
/// the admission hot path (spec.md §4.1).
pub async fn find_by_id(pool: &PgPool, id: TokenId) -> Result<Token> {
    let row = sqlx::query_as::<_, TokenRow>(&format!(
        "select {COLUMNS} from tokens where id = $1"
    ))
    .bind(id.0)
    .fetch_optional(pool)
    .await?
    .ok_or(StoreError::NotFound("token"))?;
    Ok(row.into())
}

/// Rotate a token: issue a new pair, mark the predecessor revoked
/// (spec.md §3: "Refresh rotates both hashes and marks the predecessor
/// revoked").
pub async fn rotate(
    pool: &PgPool,
    predecessor: &Token,
    access_token_hash: &str,
    refresh_token_hash: &str,
    expires_at: DateTime<Utc>,
) -> Result<Token> {
    let mut tx = pool.begin().await?;
    sqlx::query("update tokens set revoked = true where id = $1")
        .bind(predecessor.id.0)
        .execute(&mut *tx)
        .await?;

    let id = TokenId::new();
    let row = sqlx::query_as::<_, TokenRow>(&format!(
        "insert into tokens (id, agent_id, access_token_hash, refresh_token_hash, expires_at, \
         revoked, predecessor_token_id) values ($1, $2, $3, $4, $5, false, $6) returning {COLUMNS}"
    ))
    .bind(id.0)
    .bind(predecessor.agent_id.0)
    .bind(access_token_hash)
    .bind(refresh_token_hash)
    .bind(expires_at)
    .bind(predecessor.id.0)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(row.into())
}

pub async fn revoke(pool: &PgPool, id: TokenId) -> Result<()> {
    sqlx::query("update tokens set revoked = true where id = $1")
        .bind(id.0)
        .execute(pool)
        .await?;
    Ok(())
}
