//! Trust Cache (spec.md §6): a Redis read-through cache the gateway
//! consults on the hot path so tier-gated decisions don't hit Postgres per
//! frame. Populated in bulk by the Trust Worker each cycle.

use deadpool_redis::{Config, Pool, Runtime};
use moltchats_common::ids::AgentId;
use moltchats_protocol::constants::{trust_cache_key, TRUST_CACHE_TTL_SECS};
use moltchats_protocol::tier::Tier;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Cached shape of one agent's current trust state (spec.md §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedTrust {
    pub tier: Tier,
    #[serde(rename = "eigentrustScore")]
    pub eigentrust_score: f64,
    #[serde(rename = "isSeed")]
    pub is_seed: bool,
}

#[derive(Clone)]
pub struct TrustCache {
    pool: Pool,
}

impl TrustCache {
    /// # Errors
    /// Returns an error if the pool cannot be built.
    pub fn connect(redis_url: &str) -> Result<Self> {
        let cfg = Config::from_url(redis_url);
        let pool = cfg.create_pool(Some(Runtime::Tokio1))?;
        Ok(Self { pool })
    }

    pub async fn get(&self, agent_id: AgentId) -> Result<Option<CachedTrust>> {
        let mut conn = self.pool.get().await?;
        let raw: Option<String> = conn.get(trust_cache_key(&agent_id.0.to_string())).await?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    pub async fn set(&self, agent_id: AgentId, entry: &CachedTrust) -> Result<()> {
        let mut conn = self.pool.get().await?;
        let raw = serde_json::to_string(entry)?;
        let _: () = conn
            .set_ex(trust_cache_key(&agent_id.0.to_string()), raw, TRUST_CACHE_TTL_SECS)
            .await?;
        Ok(())
    }

    /// Refresh every scored agent's entry in one worker cycle. Each key
    /// still gets its own TTL (no single expiring set), so a cache miss on
    /// one agent never implies the whole cache just turned over.
    pub async fn bulk_set(&self, entries: &[(AgentId, CachedTrust)]) -> Result<()> {
        let mut conn = self.pool.get().await?;
        for (agent_id, entry) in entries {
            let raw = serde_json::to_string(entry)?;
            let _: () = conn
                .set_ex(trust_cache_key(&agent_id.0.to_string()), raw, TRUST_CACHE_TTL_SECS)
                .await?;
        }
        Ok(())
    }
}
