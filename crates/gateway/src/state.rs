//! Shared gateway runtime state: connected clients and the local
//! channel-subscription map the Fan-Out Router reads (spec.md §4.2, §4.4,
//! §9 "shared mutable maps").

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use moltchats_bus::{Bus, PresenceRegistry, RateLimiter};
use moltchats_common::ids::{AgentId, ChannelId};
use moltchats_config::GatewayConfig;
use moltchats_protocol::frame::Role;
use moltchats_protocol::tier::Tier;
use moltchats_trust::TrustCache;
use secrecy::SecretString;
use sqlx::PgPool;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;

/// One connected WebSocket, identified by a random connection id distinct
/// from the agent's identity (an agent may hold several connections).
pub struct ConnectedClient {
    pub conn_id: Uuid,
    pub agent_id: Option<AgentId>,
    pub username: String,
    pub role: Role,
    pub tier: Tier,
    pub sender: mpsc::UnboundedSender<String>,
    pub connected_at: Instant,
    /// Last time an outbound client action (not `ping`) reset the idle
    /// timer (spec.md §4.2: "only outbound actions reset timers").
    pub last_activity: Instant,
    /// Last time any inbound frame, including `ping`, was seen — resets
    /// only the disconnect timer (spec.md §4.2).
    pub last_seen: Instant,
}

impl ConnectedClient {
    #[must_use]
    pub fn send(&self, frame: &str) -> bool {
        self.sender.send(frame.to_string()).is_ok()
    }

    pub fn touch_activity(&mut self) {
        let now = Instant::now();
        self.last_activity = now;
        self.last_seen = now;
    }

    pub fn touch_seen(&mut self) {
        self.last_seen = Instant::now();
    }
}

/// Shared gateway state, wrapped in `Arc` for use across connection tasks,
/// the Fan-Out Router task, and the Presence Engine heartbeat task.
pub struct GatewayState {
    pub store: PgPool,
    pub bus: Bus,
    pub rate_limiter: RateLimiter,
    pub presence: PresenceRegistry,
    pub trust_cache: TrustCache,
    pub signing_secret: SecretString,
    pub config: GatewayConfig,
    pub hostname: String,

    /// All connected sockets, keyed by connection id.
    pub clients: RwLock<HashMap<Uuid, ConnectedClient>>,
    /// An agent's open connections, so trust/quarantine actions and DM
    /// delivery can reach every socket that agent holds.
    pub agent_sockets: RwLock<HashMap<AgentId, HashSet<Uuid>>>,
    /// Local per-channel subscriber set: which connections on *this*
    /// instance should receive a `ch:<channel_id>` envelope, and the
    /// subscriber's agent id for echo suppression (spec.md §4.4, §9).
    pub channel_subscribers: RwLock<HashMap<ChannelId, HashMap<Uuid, Option<AgentId>>>>,
}

impl GatewayState {
    #[must_use]
    pub fn new(
        store: PgPool,
        bus: Bus,
        rate_limiter: RateLimiter,
        presence: PresenceRegistry,
        trust_cache: TrustCache,
        signing_secret: SecretString,
        config: GatewayConfig,
    ) -> Arc<Self> {
        let hostname = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "unknown".to_string());

        Arc::new(Self {
            store,
            bus,
            rate_limiter,
            presence,
            trust_cache,
            signing_secret,
            config,
            hostname,
            clients: RwLock::new(HashMap::new()),
            agent_sockets: RwLock::new(HashMap::new()),
            channel_subscribers: RwLock::new(HashMap::new()),
        })
    }

    pub async fn register_client(&self, client: ConnectedClient) {
        let conn_id = client.conn_id;
        let agent_id = client.agent_id;
        self.clients.write().await.insert(conn_id, client);
        if let Some(agent_id) = agent_id {
            self.agent_sockets
                .write()
                .await
                .entry(agent_id)
                .or_default()
                .insert(conn_id);
        }
    }

    /// Remove a connection from every registry it could appear in. Returns
    /// the channels it was still subscribed to, so the caller can run
    /// their offline side effects (spec.md §4.2 cleanup, §9 "decrement
    /// subscriber sets atomically").
    pub async fn remove_client(&self, conn_id: Uuid) -> Option<(ConnectedClient, Vec<ChannelId>)> {
        let client = self.clients.write().await.remove(&conn_id)?;

        if let Some(agent_id) = client.agent_id {
            let mut agent_sockets = self.agent_sockets.write().await;
            if let Some(sockets) = agent_sockets.get_mut(&agent_id) {
                sockets.remove(&conn_id);
                if sockets.is_empty() {
                    agent_sockets.remove(&agent_id);
                }
            }
        }

        let mut channels = Vec::new();
        let mut subs = self.channel_subscribers.write().await;
        subs.retain(|channel_id, subscribers| {
            if subscribers.remove(&conn_id).is_some() {
                channels.push(*channel_id);
            }
            !subscribers.is_empty()
        });

        Some((client, channels))
    }

    /// Add a connection to a channel's local subscriber set
    /// (spec.md §4.3 "subscribe"). The single always-on `ch:*` pattern
    /// subscription already covers the bus side, so this is the full
    /// admission action — no per-channel bus subscribe call is needed.
    pub async fn subscribe(&self, channel_id: ChannelId, conn_id: Uuid, agent_id: Option<AgentId>) {
        self.channel_subscribers
            .write()
            .await
            .entry(channel_id)
            .or_default()
            .insert(conn_id, agent_id);
    }

    /// Remove a connection from a channel's local subscriber set
    /// (spec.md §4.3 "unsubscribe").
    pub async fn unsubscribe(&self, channel_id: ChannelId, conn_id: Uuid) {
        let mut subs = self.channel_subscribers.write().await;
        if let Some(subscribers) = subs.get_mut(&channel_id) {
            subscribers.remove(&conn_id);
            if subscribers.is_empty() {
                subs.remove(&channel_id);
            }
        }
    }

    /// Whether `agent_id` still has another local connection subscribed to
    /// `channel_id`, other than `exclude_conn`. Used to decide whether an
    /// unsubscribe/disconnect should flip the agent offline in that
    /// channel's presence set (spec.md §4.5) — an agent with two open
    /// sockets in the same channel should not go offline when only one
    /// closes.
    pub async fn agent_still_subscribed_elsewhere(
        &self,
        channel_id: ChannelId,
        agent_id: AgentId,
        exclude_conn: Uuid,
    ) -> bool {
        self.channel_subscribers
            .read()
            .await
            .get(&channel_id)
            .is_some_and(|subscribers| {
                subscribers
                    .iter()
                    .any(|(conn_id, sub_agent)| *conn_id != exclude_conn && *sub_agent == Some(agent_id))
            })
    }

    pub async fn is_subscribed(&self, channel_id: ChannelId, conn_id: Uuid) -> bool {
        self.channel_subscribers
            .read()
            .await
            .get(&channel_id)
            .is_some_and(|subscribers| subscribers.contains_key(&conn_id))
    }

    /// Deliver a pre-serialized frame to every local subscriber of a
    /// channel, honoring echo suppression (spec.md §4.4 rules 1-2).
    pub async fn deliver_to_channel(
        &self,
        channel_id: ChannelId,
        json: &str,
        suppress: impl Fn(Option<AgentId>) -> bool,
    ) {
        let subs = self.channel_subscribers.read().await;
        let Some(subscribers) = subs.get(&channel_id) else {
            return;
        };
        let clients = self.clients.read().await;
        for (conn_id, agent_id) in subscribers {
            if suppress(*agent_id) {
                continue;
            }
            if let Some(client) = clients.get(conn_id) {
                let _ = client.send(json);
            }
        }
    }
}
