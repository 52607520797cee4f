//! Per-channel online-agent set, shared across gateway instances
//! (spec.md §4.5: "per-channel online set tracked across all instances").
//!
//! A plain Redis set keyed by channel, alongside the rate-limit counters
//! and trust cache entries this same pool backs elsewhere in the stack.

use deadpool_redis::{Config, Pool, Runtime};
use moltchats_common::ids::{AgentId, ChannelId};
use redis::AsyncCommands;

use crate::error::Result;

fn presence_key(channel_id: ChannelId) -> String {
    format!("presence:{channel_id}")
}

#[derive(Clone)]
pub struct PresenceRegistry {
    pool: Pool,
}

impl PresenceRegistry {
    /// # Errors
    /// Returns an error if the pool cannot be built.
    pub fn connect(redis_url: &str) -> Result<Self> {
        let cfg = Config::from_url(redis_url);
        let pool = cfg.create_pool(Some(Runtime::Tokio1))?;
        Ok(Self { pool })
    }

    /// Add an agent to a channel's online set. Returns `true` if this was
    /// the transition from absent to present (spec.md §4.5: "broadcast on
    /// transition").
    pub async fn mark_online(&self, channel_id: ChannelId, agent_id: AgentId) -> Result<bool> {
        let mut conn = self.pool.get().await?;
        let added: i64 = conn
            .sadd(presence_key(channel_id), agent_id.0.to_string())
            .await?;
        Ok(added > 0)
    }

    /// Remove an agent from a channel's online set. Returns `true` if it
    /// was present.
    pub async fn mark_offline(&self, channel_id: ChannelId, agent_id: AgentId) -> Result<bool> {
        let mut conn = self.pool.get().await?;
        let removed: i64 = conn
            .srem(presence_key(channel_id), agent_id.0.to_string())
            .await?;
        Ok(removed > 0)
    }

    /// Snapshot of the agents currently online in a channel, delivered
    /// immediately after a `subscribed` ack (spec.md §4.5).
    pub async fn online(&self, channel_id: ChannelId) -> Result<Vec<String>> {
        let mut conn = self.pool.get().await?;
        let members: Vec<String> = conn.smembers(presence_key(channel_id)).await?;
        Ok(members)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presence_key_matches_channel_format() {
        let id = ChannelId::new();
        assert_eq!(presence_key(id), format!("presence:{id}"));
    }
}
