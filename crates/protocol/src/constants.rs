//! Protocol-wide limits and constants (spec.md §4.1, §4.3, §6).

/// Wire protocol version. Bumped on breaking frame-shape changes.
pub const PROTOCOL_VERSION: u32 = 1;

/// Maximum size of a single inbound WebSocket text frame, in bytes.
pub const MAX_PAYLOAD_BYTES: usize = 32 * 1024;

/// Maximum length of `message.content`, in chars (spec.md §3).
pub const MAX_MESSAGE_CONTENT_CHARS: usize = 4096;

/// Minimum username length (spec.md §3).
pub const USERNAME_MIN_LEN: usize = 3;
/// Maximum username length (spec.md §3).
pub const USERNAME_MAX_LEN: usize = 64;

/// Default per-server member cap (spec.md §3).
pub const DEFAULT_SERVER_MAX_MEMBERS: i32 = 500;
/// Default report threshold before auto-ban (spec.md §3).
pub const DEFAULT_REPORT_THRESHOLD: i32 = 10;
/// Minimum allowed report threshold (spec.md §3).
pub const MIN_REPORT_THRESHOLD: i32 = 3;

/// Idle timer fires at half the idle timeout (spec.md §4.2).
pub const IDLE_HALF_DIVISOR: u64 = 2;
/// Default idle timeout, in seconds, before a connection is force-closed.
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 15 * 60;
/// Upper session cap regardless of activity (spec.md §4.2).
pub const MAX_SESSION_SECS: u64 = 4 * 60 * 60;

/// Presence heartbeat broadcast interval (spec.md §4.5).
pub const PRESENCE_HEARTBEAT_SECS: u64 = 30;

/// EigenTrust damping factor α (spec.md §4.6 step 4).
pub const EIGENTRUST_ALPHA: f64 = 0.15;
/// EigenTrust max iterations before giving up (spec.md §4.6 step 4).
pub const EIGENTRUST_MAX_ITERATIONS: usize = 50;
/// EigenTrust convergence threshold on max componentwise delta.
pub const EIGENTRUST_CONVERGENCE_EPS: f64 = 1e-6;
/// Flag-consensus quarantine threshold (spec.md §4.6 step 5).
pub const FLAG_QUARANTINE_THRESHOLD: f64 = 3.0;
/// Sybil isolation-ratio penalty cap (spec.md §4.6 step 6).
pub const SYBIL_MAX_PENALTY: f64 = 0.8;
/// Trust worker cycle interval.
pub const TRUST_WORKER_INTERVAL_SECS: u64 = 60 * 60;
/// Trust cache TTL — slightly longer than the worker interval so a slow run
/// never exposes a window with nothing cached (spec.md §6).
pub const TRUST_CACHE_TTL_SECS: u64 = 65 * 60;

/// Challenge ephemeral channel lifetime (spec.md §4.7).
pub const CHALLENGE_TTL_SECS: u64 = 60 * 60;
/// Number of challengers selected per challenge (spec.md §4.7).
pub const CHALLENGE_PANEL_SIZE: usize = 3;
/// Flag-ratio threshold that triggers an out-of-schedule challenge.
pub const CHALLENGE_FLAG_RATIO_THRESHOLD: f64 = 0.5;

/// Handshake timeout: how long the gateway waits for the first `connect`-
/// equivalent frame (here: the `token` query param is already resolved pre-
/// upgrade, so this bounds the trust-context/config load in the async setup
/// phase described in spec.md §4.2 and §9 "buffered ingress").
pub const HANDSHAKE_TIMEOUT_MS: u64 = 5_000;

/// WebSocket close codes (spec.md §6).
pub mod close_code {
    pub const AUTH_FAILED: u16 = 4001;
    pub const IDLE_TIMEOUT: u16 = 4002;
    pub const QUARANTINED: u16 = 4003;
}

/// Internal bus envelope marker field names (spec.md §4.4, §6), stripped
/// before a frame is serialized out to a socket.
pub mod bus_markers {
    pub const SENDER_AGENT_ID: &str = "_senderAgentId";
    pub const PRESENCE_BROADCAST: &str = "_presenceBroadcast";
}

/// Pub/sub topic prefix (spec.md §4.4, §6).
pub fn bus_topic(channel_id: &str) -> String {
    format!("ch:{channel_id}")
}

/// Trust cache key (spec.md §6).
pub fn trust_cache_key(agent_id: &str) -> String {
    format!("trust:{agent_id}")
}
