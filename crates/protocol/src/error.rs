//! Wire-protocol error kinds (spec.md §7). `AppError` is the single source
//! of truth for the `code` string sent in `error` frames and used in close
//! reasons; every lower crate's error type converts into this at the
//! handler boundary (SPEC_FULL.md §4.9).

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AppError {
    // Authentication
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("token expired")]
    TokenExpired,
    #[error("token revoked")]
    TokenRevoked,
    #[error("authentication failed")]
    AuthFailed,

    // Authorization
    #[error("forbidden")]
    Forbidden,
    #[error("read-only role")]
    ReadOnly,
    #[error("not a server member")]
    NotServerMember,
    #[error("not a dm participant")]
    NotDmParticipant,
    #[error("not a server admin")]
    NotServerAdmin,
    #[error("not the server owner")]
    NotServerOwner,
    #[error("agent is quarantined")]
    Quarantined,
    #[error("banned from server")]
    BannedFromServer,

    // Resource
    #[error("agent not found")]
    AgentNotFound,
    #[error("channel not found")]
    ChannelNotFound,
    #[error("message not found")]
    MessageNotFound,
    #[error("server not found")]
    ServerNotFound,

    // Validation
    #[error("validation error")]
    ValidationError,
    #[error("username taken")]
    UsernameTaken,
    #[error("max channels reached")]
    MaxChannelsReached,
    #[error("already friends")]
    AlreadyFriends,
    #[error("friend request already exists")]
    FriendRequestExists,
    #[error("cannot friend self")]
    CannotFriendSelf,
    #[error("cannot vouch for self")]
    CannotVouchSelf,
    #[error("vouch already exists")]
    VouchExists,
    #[error("already flagged")]
    AlreadyFlagged,
    #[error("insufficient trust")]
    InsufficientTrust,
    #[error("blocked")]
    Blocked,

    // Throughput
    #[error("rate limited")]
    RateLimited,

    // Protocol
    #[error("invalid json")]
    InvalidJson,
    #[error("unknown op")]
    UnknownOp,
    #[error("not subscribed")]
    NotSubscribed,
    #[error("subscribe failed")]
    SubscribeFailed,
    #[error("idle timeout")]
    IdleTimeout,

    // Internal
    #[error("internal error")]
    InternalError,
    #[error("handler error")]
    HandlerError,
}

impl AppError {
    /// The wire `code` string (spec.md §7) — part of the external protocol,
    /// never renamed casually.
    #[must_use]
    pub fn code(self) -> &'static str {
        match self {
            Self::InvalidCredentials => "INVALID_CREDENTIALS",
            Self::TokenExpired => "TOKEN_EXPIRED",
            Self::TokenRevoked => "TOKEN_REVOKED",
            Self::AuthFailed => "AUTH_FAILED",
            Self::Forbidden => "FORBIDDEN",
            Self::ReadOnly => "READ_ONLY",
            Self::NotServerMember => "NOT_SERVER_MEMBER",
            Self::NotDmParticipant => "NOT_DM_PARTICIPANT",
            Self::NotServerAdmin => "NOT_SERVER_ADMIN",
            Self::NotServerOwner => "NOT_SERVER_OWNER",
            Self::Quarantined => "QUARANTINED",
            Self::BannedFromServer => "BANNED_FROM_SERVER",
            Self::AgentNotFound => "AGENT_NOT_FOUND",
            Self::ChannelNotFound => "CHANNEL_NOT_FOUND",
            Self::MessageNotFound => "MESSAGE_NOT_FOUND",
            Self::ServerNotFound => "SERVER_NOT_FOUND",
            Self::ValidationError => "VALIDATION_ERROR",
            Self::UsernameTaken => "USERNAME_TAKEN",
            Self::MaxChannelsReached => "MAX_CHANNELS_REACHED",
            Self::AlreadyFriends => "ALREADY_FRIENDS",
            Self::FriendRequestExists => "FRIEND_REQUEST_EXISTS",
            Self::CannotFriendSelf => "CANNOT_FRIEND_SELF",
            Self::CannotVouchSelf => "CANNOT_VOUCH_SELF",
            Self::VouchExists => "VOUCH_EXISTS",
            Self::AlreadyFlagged => "ALREADY_FLAGGED",
            Self::InsufficientTrust => "INSUFFICIENT_TRUST",
            Self::Blocked => "BLOCKED",
            Self::RateLimited => "RATE_LIMITED",
            Self::InvalidJson => "INVALID_JSON",
            Self::UnknownOp => "UNKNOWN_OP",
            Self::NotSubscribed => "NOT_SUBSCRIBED",
            Self::SubscribeFailed => "SUBSCRIBE_FAILED",
            Self::IdleTimeout => "IDLE_TIMEOUT",
            Self::InternalError => "INTERNAL_ERROR",
            Self::HandlerError => "HANDLER_ERROR",
        }
    }

    /// Whether this error, when it occurs on an active WebSocket connection,
    /// closes the socket rather than just emitting an `error` frame
    /// (spec.md §7 propagation policy).
    #[must_use]
    pub fn closes_connection(self) -> bool {
        matches!(
            self,
            Self::IdleTimeout
                | Self::Quarantined
                | Self::InvalidCredentials
                | Self::TokenExpired
                | Self::TokenRevoked
                | Self::AuthFailed
        )
    }

    /// The WebSocket close code to use, if this error closes the connection.
    #[must_use]
    pub fn close_code(self) -> Option<u16> {
        match self {
            Self::IdleTimeout => Some(crate::constants::close_code::IDLE_TIMEOUT),
            Self::Quarantined => Some(crate::constants::close_code::QUARANTINED),
            Self::InvalidCredentials | Self::TokenExpired | Self::TokenRevoked | Self::AuthFailed => {
                Some(crate::constants::close_code::AUTH_FAILED)
            },
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_timeout_closes() {
        assert!(AppError::IdleTimeout.closes_connection());
        assert_eq!(
            AppError::IdleTimeout.close_code(),
            Some(crate::constants::close_code::IDLE_TIMEOUT)
        );
    }

    #[test]
    fn rate_limited_does_not_close() {
        assert!(!AppError::RateLimited.closes_connection());
        assert_eq!(AppError::RateLimited.close_code(), None);
    }

    #[test]
    fn code_strings_are_stable() {
        assert_eq!(AppError::Quarantined.code(), "QUARANTINED");
        assert_eq!(AppError::RateLimited.code(), "RATE_LIMITED");
    }
}
