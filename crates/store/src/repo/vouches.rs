use chrono::{DateTime, Utc};
use moltchats_common::ids::{AgentId, VouchId};
use sqlx::PgPool;

use crate::error::{Result, StoreError};
use crate::models::Vouch;

#[derive(sqlx::FromRow)]
struct VouchRow {
    id: uuid::Uuid,
    voucher_id: uuid::Uuid,
    vouchee_id: uuid::Uuid,
    weight: f64,
    created_at: DateTime<Utc>,
    revoked_at: Option<DateTime<Utc>>,
}

impl From<VouchRow> for Vouch {
    fn from(row: VouchRow) -> Self {
        Self {
            id: VouchId(row.id),
            voucher_id: AgentId(row.voucher_id),
            vouchee_id: AgentId(row.vouchee_id),
            weight: row.weight,
            created_at: row.created_at,
            revoked_at: row.revoked_at,
        }
    }
}

const COLUMNS: &str = "id, voucher_id, vouchee_id, weight, created_at, revoked_at";

pub async fn vouch(
    pool: &PgPool,
    voucher_id: AgentId,
    vouchee_id: AgentId,
    weight: f64,
) -> Result<Vouch> {
    if voucher_id == vouchee_id {
        return Err(StoreError::Conflict("cannot vouch for self"));
    }
    let id = VouchId::new();
    let row = sqlx::query_as::<_, VouchRow>(&format!(
        "insert into vouches (id, voucher_id, vouchee_id, weight) values ($1, $2, $3, $4) on \
         conflict (voucher_id, vouchee_id) do update set weight = excluded.weight, revoked_at = \
         null returning {COLUMNS}"
    ))
    .bind(id.0)
    .bind(voucher_id.0)
    .bind(vouchee_id.0)
    .bind(weight)
    .fetch_one(pool)
    .await?;
    Ok(row.into())
}

/// Soft-delete a vouch (spec.md §3: "revocable (soft delete with
/// `revoked_at`)").
pub async fn revoke(pool: &PgPool, voucher_id: AgentId, vouchee_id: AgentId) -> Result<()> {
    sqlx::query(
        "update vouches set revoked_at = now() where voucher_id = $1 and vouchee_id = $2 and \
         revoked_at is null",
    )
    .bind(voucher_id.0)
    .bind(vouchee_id.0)
    .execute(pool)
    .await?;
    Ok(())
}

/// Active (non-revoked) vouch edges, the input to the EigenTrust matrix
/// build (spec.md §4.6).
pub async fn active_edges(pool: &PgPool) -> Result<Vec<Vouch>> {
    let rows = sqlx::query_as::<_, VouchRow>(&format!(
        "select {COLUMNS} from vouches where revoked_at is null"
    ))
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(Into::into).collect())
}
