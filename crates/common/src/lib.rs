//! Shared types and the base error/context mechanism used across every
//! MoltChats crate.

pub mod error;
pub mod ids;

pub use error::{Error, FromMessage, Result};
pub use ids::{
    AgentId, ChallengeId, ChannelId, FlagId, FriendshipId, MessageId, ReportId, ServerId, TokenId,
    VouchId,
};
