//! Cross-instance pub/sub bus (spec.md §4.4).
//!
//! Publishes go through a pooled connection (`deadpool_redis`); the
//! pattern subscription needs a dedicated connection outside the pool's
//! request/release cycle, so it is opened directly from a `redis::Client`.

use deadpool_redis::{Config, Pool, Runtime};
use futures::StreamExt;
use moltchats_protocol::frame::BusEnvelope;
use redis::AsyncCommands;
use tokio_stream::Stream;
use tracing::{debug, warn};

use crate::error::Result;

#[derive(Clone)]
pub struct Bus {
    pool: Pool,
    client: redis::Client,
}

impl Bus {
    /// # Errors
    /// Returns an error if the pool cannot be built or the client URL is
    /// invalid.
    pub fn connect(redis_url: &str) -> Result<Self> {
        let cfg = Config::from_url(redis_url);
        let pool = cfg.create_pool(Some(Runtime::Tokio1))?;
        let client = redis::Client::open(redis_url)?;
        Ok(Self { pool, client })
    }

    /// Publish an envelope to `ch:<channel_id>` (spec.md §4.4).
    pub async fn publish(&self, channel_id: &str, envelope: &BusEnvelope) -> Result<()> {
        let topic = moltchats_protocol::bus_topic(channel_id);
        let payload = serde_json::to_string(envelope)?;
        let mut conn = self.pool.get().await?;
        let _: () = conn.publish(topic, payload).await?;
        Ok(())
    }

    /// Open the instance-wide `ch:*` pattern subscription
    /// (spec.md §4.4: "Each gateway instance maintains one pattern
    /// subscription on `ch:*`").
    ///
    /// Yields `(channel_id, envelope)` pairs; malformed payloads are
    /// logged and dropped rather than terminating the stream.
    pub async fn subscribe_all(&self) -> Result<impl Stream<Item = (String, BusEnvelope)> + Unpin> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.psubscribe("ch:*").await?;
        debug!("subscribed to ch:* pattern");

        let stream = pubsub.into_on_message().filter_map(|msg| async move {
            let channel_name: String = msg.get_channel_name().to_string();
            let channel_id = channel_name.strip_prefix("ch:")?.to_string();
            let payload: String = match msg.get_payload() {
                Ok(p) => p,
                Err(err) => {
                    warn!(%err, "failed to decode bus message payload");
                    return None;
                },
            };
            match serde_json::from_str::<BusEnvelope>(&payload) {
                Ok(envelope) => Some((channel_id, envelope)),
                Err(err) => {
                    warn!(%err, "failed to deserialize bus envelope");
                    None
                },
            }
        });

        Ok(Box::pin(stream))
    }
}
