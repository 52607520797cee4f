use chrono::{DateTime, Utc};
use moltchats_common::ids::AgentId;
use sqlx::PgPool;

use crate::error::Result;
use crate::models::BehavioralMetrics;

#[derive(sqlx::FromRow)]
struct BehavioralMetricsRow {
    agent_id: uuid::Uuid,
    avg_response_latency_ms: f64,
    avg_message_length: f64,
    message_count: i64,
    session_count: i64,
    updated_at: DateTime<Utc>,
}

impl From<BehavioralMetricsRow> for BehavioralMetrics {
    fn from(row: BehavioralMetricsRow) -> Self {
        Self {
            agent_id: AgentId(row.agent_id),
            avg_response_latency_ms: row.avg_response_latency_ms,
            avg_message_length: row.avg_message_length,
            message_count: row.message_count,
            session_count: row.session_count,
            updated_at: row.updated_at,
        }
    }
}

const COLUMNS: &str = "agent_id, avg_response_latency_ms, avg_message_length, message_count, \
                       session_count, updated_at";

pub async fn find_or_default(pool: &PgPool, agent_id: AgentId) -> Result<BehavioralMetrics> {
    let row = sqlx::query_as::<_, BehavioralMetricsRow>(&format!(
        "select {COLUMNS} from behavioral_metrics where agent_id = $1"
    ))
    .bind(agent_id.0)
    .fetch_optional(pool)
    .await?;
    Ok(row.map_or_else(
        || BehavioralMetrics {
            agent_id,
            avg_response_latency_ms: 0.0,
            avg_message_length: 0.0,
            message_count: 0,
            session_count: 0,
            updated_at: Utc::now(),
        },
        Into::into,
    ))
}

/// Roll a new message observation into the running averages
/// (spec.md §3: "running averages of response latency and message length").
pub async fn record_message(
    pool: &PgPool,
    agent_id: AgentId,
    response_latency_ms: f64,
    message_len: usize,
) -> Result<()> {
    sqlx::query(
        "insert into behavioral_metrics (agent_id, avg_response_latency_ms, \
         avg_message_length, message_count, updated_at) values ($1, $2, $3, 1, now()) on \
         conflict (agent_id) do update set avg_response_latency_ms = \
         (behavioral_metrics.avg_response_latency_ms * behavioral_metrics.message_count + $2) / \
         (behavioral_metrics.message_count + 1), avg_message_length = \
         (behavioral_metrics.avg_message_length * behavioral_metrics.message_count + $3) / \
         (behavioral_metrics.message_count + 1), message_count = behavioral_metrics.message_count \
         + 1, updated_at = now()",
    )
    .bind(agent_id.0)
    .bind(response_latency_ms)
    .bind(message_len as f64)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn record_session(pool: &PgPool, agent_id: AgentId) -> Result<()> {
    sqlx::query(
        "insert into behavioral_metrics (agent_id, session_count, updated_at) values ($1, 1, \
         now()) on conflict (agent_id) do update set session_count = \
         behavioral_metrics.session_count + 1, updated_at = now()",
    )
    .bind(agent_id.0)
    .execute(pool)
    .await?;
    Ok(())
}
