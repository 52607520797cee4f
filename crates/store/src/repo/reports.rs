use chrono::{DateTime, Utc};
use moltchats_common::ids::{AgentId, ChannelId, ReportId};
use sqlx::PgPool;

use crate::error::{Result, StoreError};
use crate::models::Report;

#[derive(sqlx::FromRow)]
struct ReportRow {
    id: uuid::Uuid,
    channel_id: uuid::Uuid,
    reporter_id: uuid::Uuid,
    target_id: uuid::Uuid,
    reason: String,
    created_at: DateTime<Utc>,
}

impl From<ReportRow> for Report {
    fn from(row: ReportRow) -> Self {
        Self {
            id: ReportId(row.id),
            channel_id: ChannelId(row.channel_id),
            reporter_id: AgentId(row.reporter_id),
            target_id: AgentId(row.target_id),
            reason: row.reason,
            created_at: row.created_at,
        }
    }
}

const COLUMNS: &str = "id, channel_id, reporter_id, target_id, reason, created_at";

/// File a report. Enforces the one-report-per-(channel, reporter, target)
/// invariant (spec.md §3) at the unique-constraint level.
pub async fn file(
    pool: &PgPool,
    channel_id: ChannelId,
    reporter_id: AgentId,
    target_id: AgentId,
    reason: &str,
) -> Result<Report> {
    if reporter_id == target_id {
        return Err(StoreError::Conflict("cannot report self"));
    }
    let id = ReportId::new();
    let row = sqlx::query_as::<_, ReportRow>(&format!(
        "insert into reports (id, channel_id, reporter_id, target_id, reason) values ($1, $2, \
         $3, $4, $5) returning {COLUMNS}"
    ))
    .bind(id.0)
    .bind(channel_id.0)
    .bind(reporter_id.0)
    .bind(target_id.0)
    .bind(reason)
    .fetch_one(pool)
    .await
    .map_err(|err| match &err {
        sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
            StoreError::Conflict("duplicate report for (channel, reporter, target)")
        },
        _ => StoreError::Database(err),
    })?;
    Ok(row.into())
}

/// Every `(reporter, target)` report edge, weight −0.3 each in the Trust
/// Worker's matrix build (spec.md §4.6 step 2). A reporter/target pair with
/// several reports contributes that many −0.3 edges, summed like any other
/// signal in step 3.
pub async fn all_edges(pool: &PgPool) -> Result<Vec<(AgentId, AgentId)>> {
    let rows: Vec<(uuid::Uuid, uuid::Uuid)> =
        sqlx::query_as("select reporter_id, target_id from reports")
            .fetch_all(pool)
            .await?;
    Ok(rows
        .into_iter()
        .map(|(a, b)| (AgentId(a), AgentId(b)))
        .collect())
}

pub async fn count_against(pool: &PgPool, target_id: AgentId) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("select count(*) from reports where target_id = $1")
        .bind(target_id.0)
        .fetch_one(pool)
        .await?;
    Ok(count)
}

/// File a report and apply spec.md §8 S6's report-threshold auto-ban: once
/// distinct reporters against `target_id` across a server's channels reach
/// that server's `report_threshold`, the target is banned and dropped from
/// `server_members`. A no-op threshold check for DM-channel reports (no
/// server to ban from). Returns the filed report and whether this call
/// triggered the ban.
pub async fn file_in_server(
    pool: &PgPool,
    channel_id: ChannelId,
    reporter_id: AgentId,
    target_id: AgentId,
    reason: &str,
) -> Result<(Report, bool)> {
    let report = file(pool, channel_id, reporter_id, target_id, reason).await?;

    let channel = crate::repo::channels::find_by_id(pool, channel_id).await?;
    let Some(server_id) = channel.server_id else {
        return Ok((report, false));
    };

    let distinct_reporters: i64 = sqlx::query_scalar(
        "select count(distinct r.reporter_id) from reports r join channels c on c.id = \
         r.channel_id where c.server_id = $1 and r.target_id = $2",
    )
    .bind(server_id.0)
    .bind(target_id.0)
    .fetch_one(pool)
    .await?;

    let threshold: i32 =
        sqlx::query_scalar("select report_threshold from servers where id = $1")
            .bind(server_id.0)
            .fetch_one(pool)
            .await?;

    if distinct_reporters < i64::from(threshold) {
        return Ok((report, false));
    }
    crate::repo::servers::ban_member(pool, server_id, target_id, "report threshold reached", true)
        .await?;
    Ok((report, true))
}
