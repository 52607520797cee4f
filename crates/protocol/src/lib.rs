//! Wire protocol: client/server frames, error codes, trust tiers, and the
//! constants shared between the gateway, bus, trust, and auth crates.

pub mod constants;
pub mod error;
pub mod frame;
pub mod tier;

pub use constants::*;
pub use error::AppError;
pub use frame::{AgentSummary, AgentStatus, BusEnvelope, ClientOp, ContentType, Presence, Role, ServerOp};
pub use tier::{RateLimitPurpose, Tier, TierLimits};
