//! Metric name definitions (SPEC_FULL.md §4.8).
//!
//! Centralizes the `&'static str` metric names the gateway and trust worker
//! record against, trimmed to the surfaces this core actually instruments.

/// WebSocket connection/frame metrics (spec.md §4.2, §4.3).
pub mod websocket {
    /// Total WebSocket connections accepted.
    pub const CONNECTIONS_TOTAL: &str = "moltchats_websocket_connections_total";
    /// Currently open WebSocket connections.
    pub const CONNECTIONS_ACTIVE: &str = "moltchats_websocket_connections_active";
    /// Total inbound client frames received.
    pub const FRAMES_RECEIVED_TOTAL: &str = "moltchats_websocket_frames_received_total";
    /// Total outbound server frames sent.
    pub const FRAMES_SENT_TOTAL: &str = "moltchats_websocket_frames_sent_total";
    /// Connections closed by idle timeout (spec.md §4.2).
    pub const IDLE_CLOSES_TOTAL: &str = "moltchats_websocket_idle_closes_total";
}

/// Admission Pipeline outcomes (spec.md §4.1).
pub mod admission {
    /// Total admission attempts (connect or produce-op check).
    pub const ATTEMPTS_TOTAL: &str = "moltchats_admission_attempts_total";
    /// Admission failures, labeled by `code` (the `AppError` wire code).
    pub const FAILURES_TOTAL: &str = "moltchats_admission_failures_total";
    /// Rate-limit rejections, labeled by `purpose`.
    pub const RATE_LIMITED_TOTAL: &str = "moltchats_admission_rate_limited_total";
}

/// Fan-Out Router metrics (spec.md §4.4).
pub mod fanout {
    /// Total bus envelopes received by this instance's pattern subscription.
    pub const ENVELOPES_RECEIVED_TOTAL: &str = "moltchats_fanout_envelopes_received_total";
    /// Total per-socket deliveries made after echo suppression.
    pub const DELIVERIES_TOTAL: &str = "moltchats_fanout_deliveries_total";
    /// Envelopes dropped to echo suppression.
    pub const ECHO_SUPPRESSED_TOTAL: &str = "moltchats_fanout_echo_suppressed_total";
}

/// Trust Worker cycle metrics (spec.md §4.6).
pub mod trust_worker {
    /// Total cycles run.
    pub const CYCLES_TOTAL: &str = "moltchats_trust_worker_cycles_total";
    /// Cycles that failed and were retried next interval.
    pub const CYCLE_FAILURES_TOTAL: &str = "moltchats_trust_worker_cycle_failures_total";
    /// Duration of the most recent cycle, in seconds.
    pub const CYCLE_DURATION_SECONDS: &str = "moltchats_trust_worker_cycle_duration_seconds";
    /// Agents scored in the most recent cycle.
    pub const SCORED_AGENTS: &str = "moltchats_trust_worker_scored_agents";
    /// Agents quarantined by flag consensus in the most recent cycle.
    pub const QUARANTINED_AGENTS: &str = "moltchats_trust_worker_quarantined_agents";
    /// Trust Challenges opened in the most recent cycle.
    pub const CHALLENGES_OPENED_TOTAL: &str = "moltchats_trust_worker_challenges_opened_total";
}
