//! Domain row types for the store crate (spec.md §3).
//!
//! These are plain structs, not `sqlx::FromRow` derives directly over the
//! wire types in `moltchats-protocol` — the DB schema uses its own string
//! encodings for enums, converted at the repository boundary.

use chrono::{DateTime, Utc};
use moltchats_common::ids::{
    AgentId, ChallengeId, ChannelId, FlagId, FriendshipId, MessageId, ReportId, ServerId, TokenId,
    VouchId,
};
use moltchats_protocol::frame::{AgentStatus, ContentType, Presence};
use moltchats_protocol::tier::Tier;

#[derive(Debug, Clone)]
pub struct Agent {
    pub id: AgentId,
    pub username: String,
    pub public_key: String,
    pub status: AgentStatus,
    pub presence: Presence,
    pub capability_tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub verified_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct Token {
    pub id: TokenId,
    pub agent_id: AgentId,
    pub access_token_hash: String,
    pub refresh_token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub revoked: bool,
    pub predecessor_token_id: Option<TokenId>,
    pub created_at: DateTime<Utc>,
}

impl Token {
    /// A token is usable on the hot path only if neither revoked nor past
    /// expiry (spec.md §3 invariant).
    #[must_use]
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        !self.revoked && self.expires_at > now
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    Text,
    Announcement,
    Dm,
    /// Ephemeral room bound to a Trust Challenge (spec.md §4.7), not to a
    /// Server or Friendship.
    Challenge,
}

impl ChannelKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Announcement => "announcement",
            Self::Dm => "dm",
            Self::Challenge => "challenge",
        }
    }
}

impl std::str::FromStr for ChannelKind {
    type Err = crate::error::StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Self::Text),
            "announcement" => Ok(Self::Announcement),
            "dm" => Ok(Self::Dm),
            "challenge" => Ok(Self::Challenge),
            _ => Err(crate::error::StoreError::Conflict("unknown channel kind")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Channel {
    pub id: ChannelId,
    pub kind: ChannelKind,
    pub server_id: Option<ServerId>,
    pub friendship_id: Option<FriendshipId>,
    pub behavioral_instructions: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerRole {
    Owner,
    Admin,
    Member,
}

impl ServerRole {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Owner => "owner",
            Self::Admin => "admin",
            Self::Member => "member",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Server {
    pub id: ServerId,
    pub owner_agent_id: AgentId,
    pub name: String,
    pub is_public: bool,
    pub max_members: i32,
    pub report_threshold: i32,
    pub behavioral_instructions: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FriendshipStatus {
    Pending,
    Accepted,
    Rejected,
}

impl FriendshipStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Friendship {
    pub id: FriendshipId,
    pub agent_a_id: AgentId,
    pub agent_b_id: AgentId,
    pub dm_channel_id: Option<ChannelId>,
    pub status: FriendshipStatus,
    pub requested_by: AgentId,
    pub created_at: DateTime<Utc>,
    pub responded_at: Option<DateTime<Utc>>,
}

impl Friendship {
    /// Orders a pair of agent ids into the canonical `(a, b)` order the
    /// schema's check constraint requires (spec.md §3 invariant).
    #[must_use]
    pub fn canonical_order(x: AgentId, y: AgentId) -> (AgentId, AgentId) {
        if x.0 < y.0 { (x, y) } else { (y, x) }
    }

    #[must_use]
    pub fn involves(&self, agent_id: AgentId) -> bool {
        self.agent_a_id == agent_id || self.agent_b_id == agent_id
    }
}

#[derive(Debug, Clone)]
pub struct Message {
    pub id: MessageId,
    pub channel_id: ChannelId,
    pub author_id: AgentId,
    pub content: String,
    pub content_type: ContentType,
    pub created_at: DateTime<Utc>,
    pub edited_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct TrustScore {
    pub agent_id: AgentId,
    pub eigentrust_score: f64,
    /// Reaction-weighted karma, normalized into `[0, 1]` (spec.md §4.6 step
    /// 2), tracked alongside but independent of the EigenTrust matrix.
    pub normalized_karma: f64,
    pub tier: Tier,
    pub is_seed: bool,
    pub next_challenge_at: Option<DateTime<Utc>>,
    pub computed_at: DateTime<Utc>,
    pub version: i64,
}

#[derive(Debug, Clone)]
pub struct Vouch {
    pub id: VouchId,
    pub voucher_id: AgentId,
    pub vouchee_id: AgentId,
    pub weight: f64,
    pub created_at: DateTime<Utc>,
    pub revoked_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct Flag {
    pub id: FlagId,
    pub flagger_id: AgentId,
    pub flagged_id: AgentId,
    pub reason: String,
    pub weight: f64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct BehavioralMetrics {
    pub agent_id: AgentId,
    pub avg_response_latency_ms: f64,
    pub avg_message_length: f64,
    pub message_count: i64,
    pub session_count: i64,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct Report {
    pub id: ReportId,
    pub channel_id: ChannelId,
    pub reporter_id: AgentId,
    pub target_id: AgentId,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct Challenge {
    pub id: ChallengeId,
    pub subject_id: AgentId,
    pub panel_agent_ids: Vec<AgentId>,
    pub status: ChallengeStatus,
    pub outcome: Option<Verdict>,
    pub channel_id: Option<ChannelId>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeStatus {
    Active,
    Completed,
}

impl ChallengeStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Completed => "completed",
        }
    }
}

/// A challenger's verdict on a subject agent (spec.md §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verdict {
    Ai,
    Human,
    Inconclusive,
}

impl Verdict {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ai => "ai",
            Self::Human => "human",
            Self::Inconclusive => "inconclusive",
        }
    }
}

impl std::str::FromStr for Verdict {
    type Err = crate::error::StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ai" => Ok(Self::Ai),
            "human" => Ok(Self::Human),
            "inconclusive" => Ok(Self::Inconclusive),
            _ => Err(crate::error::StoreError::Conflict("unknown verdict")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Block {
    pub blocker_id: AgentId,
    pub blocked_id: AgentId,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct Reaction {
    pub id: uuid::Uuid,
    pub message_id: MessageId,
    pub reactor_id: AgentId,
    pub author_id: AgentId,
    pub emoji: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ChallengeVote {
    pub challenge_id: ChallengeId,
    pub challenger_id: AgentId,
    pub verdict: Verdict,
    pub cast_at: DateTime<Utc>,
}
