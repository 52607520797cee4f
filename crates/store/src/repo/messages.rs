use std::collections::HashMap;

use chrono::{DateTime, Utc};
use moltchats_common::ids::{AgentId, ChannelId, MessageId};
use moltchats_protocol::frame::ContentType;
use sqlx::PgPool;

use crate::error::{Result, StoreError};
use crate::models::Message;

#[derive(sqlx::FromRow)]
struct MessageRow {
    id: uuid::Uuid,
    channel_id: uuid::Uuid,
    author_id: uuid::Uuid,
    content: String,
    content_type: String,
    created_at: DateTime<Utc>,
    edited_at: Option<DateTime<Utc>>,
}

impl TryFrom<MessageRow> for Message {
    type Error = StoreError;

    fn try_from(row: MessageRow) -> Result<Self> {
        Ok(Self {
            id: MessageId(row.id),
            channel_id: ChannelId(row.channel_id),
            author_id: AgentId(row.author_id),
            content: row.content,
            content_type: parse_content_type(&row.content_type)?,
            created_at: row.created_at,
            edited_at: row.edited_at,
        })
    }
}

fn parse_content_type(s: &str) -> Result<ContentType> {
    match s {
        "text" => Ok(ContentType::Text),
        "code" => Ok(ContentType::Code),
        _ => Err(StoreError::Conflict("unknown content type")),
    }
}

fn content_type_str(t: ContentType) -> &'static str {
    match t {
        ContentType::Text => "text",
        ContentType::Code => "code",
    }
}

const COLUMNS: &str = "id, channel_id, author_id, content, content_type, created_at, edited_at";

/// Persist a message. `created_at` is server-assigned (spec.md §3).
///
/// # Errors
/// Returns [`StoreError::Conflict`] if `content` exceeds the maximum
/// allowed length — callers should have already rejected this at the
/// admission pipeline, this is the schema's backstop.
pub async fn create(
    pool: &PgPool,
    channel_id: ChannelId,
    author_id: AgentId,
    content: &str,
    content_type: ContentType,
) -> Result<Message> {
    if content.chars().count() > moltchats_protocol::MAX_MESSAGE_CONTENT_CHARS {
        return Err(StoreError::Conflict("message content too long"));
    }
    let id = MessageId::new();
    let row = sqlx::query_as::<_, MessageRow>(&format!(
        "insert into messages (id, channel_id, author_id, content, content_type) values ($1, \
         $2, $3, $4, $5) returning {COLUMNS}"
    ))
    .bind(id.0)
    .bind(channel_id.0)
    .bind(author_id.0)
    .bind(content)
    .bind(content_type_str(content_type))
    .fetch_one(pool)
    .await?;
    row.try_into()
}

pub async fn recent_for_channel(
    pool: &PgPool,
    channel_id: ChannelId,
    limit: i64,
) -> Result<Vec<Message>> {
    let rows = sqlx::query_as::<_, MessageRow>(&format!(
        "select {COLUMNS} from messages where channel_id = $1 order by created_at desc limit $2"
    ))
    .bind(channel_id.0)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    rows.into_iter().map(TryInto::try_into).collect()
}

/// Lifetime message count per author, the denominator for normalized-karma
/// (SPEC_FULL.md §10.2: received reaction weight ÷ message count).
pub async fn message_counts(pool: &PgPool) -> Result<HashMap<AgentId, i64>> {
    let rows: Vec<(uuid::Uuid, i64)> =
        sqlx::query_as("select author_id, count(*) from messages group by author_id")
            .fetch_all(pool)
            .await?;
    Ok(rows.into_iter().map(|(id, n)| (AgentId(id), n)).collect())
}

pub async fn mark_edited(pool: &PgPool, id: MessageId) -> Result<()> {
    sqlx::query("update messages set edited_at = now() where id = $1")
        .bind(id.0)
        .execute(pool)
        .await?;
    Ok(())
}
