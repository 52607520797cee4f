//! Trust tiers and the per-tier rate-limit table (spec.md §3, §4.1).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Seed,
    Trusted,
    Provisional,
    Untrusted,
    Quarantined,
}

impl Tier {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Seed => "seed",
            Self::Trusted => "trusted",
            Self::Provisional => "provisional",
            Self::Untrusted => "untrusted",
            Self::Quarantined => "quarantined",
        }
    }

    #[must_use]
    pub fn limits(self) -> TierLimits {
        match self {
            Self::Seed => TierLimits {
                api_per_min: 60,
                ws_msg_per_min_per_channel: 15,
                servers_per_day: 10,
                friend_requests_per_hour: 30,
            },
            Self::Trusted => TierLimits {
                api_per_min: 40,
                ws_msg_per_min_per_channel: 10,
                servers_per_day: 5,
                friend_requests_per_hour: 20,
            },
            Self::Provisional => TierLimits {
                api_per_min: 20,
                ws_msg_per_min_per_channel: 5,
                servers_per_day: 2,
                friend_requests_per_hour: 10,
            },
            Self::Untrusted => TierLimits {
                api_per_min: 5,
                ws_msg_per_min_per_channel: 3,
                servers_per_day: 0,
                friend_requests_per_hour: 2,
            },
            Self::Quarantined => TierLimits {
                api_per_min: 2,
                ws_msg_per_min_per_channel: 0,
                servers_per_day: 0,
                friend_requests_per_hour: 0,
            },
        }
    }
}

impl std::str::FromStr for Tier {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "seed" => Ok(Self::Seed),
            "trusted" => Ok(Self::Trusted),
            "provisional" => Ok(Self::Provisional),
            "untrusted" => Ok(Self::Untrusted),
            "quarantined" => Ok(Self::Quarantined),
            _ => Err(()),
        }
    }
}

/// The table in spec.md §4.1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierLimits {
    pub api_per_min: u32,
    pub ws_msg_per_min_per_channel: u32,
    pub servers_per_day: u32,
    pub friend_requests_per_hour: u32,
}

/// The rate-limit purposes a `(purpose, scope, identifier, window)` counter
/// key can be opened for (spec.md §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateLimitPurpose {
    Api,
    WsMessage,
    ServerCreate,
    FriendRequest,
}

impl RateLimitPurpose {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Api => "api",
            Self::WsMessage => "ws_message",
            Self::ServerCreate => "server_create",
            Self::FriendRequest => "friend_request",
        }
    }

    /// Window length for this purpose.
    #[must_use]
    pub fn window_secs(self) -> u64 {
        match self {
            Self::Api | Self::WsMessage => 60,
            Self::ServerCreate => 24 * 60 * 60,
            Self::FriendRequest => 60 * 60,
        }
    }

    #[must_use]
    pub fn limit_for(self, tier: Tier) -> u32 {
        let l = tier.limits();
        match self {
            Self::Api => l.api_per_min,
            Self::WsMessage => l.ws_msg_per_min_per_channel,
            Self::ServerCreate => l.servers_per_day,
            Self::FriendRequest => l.friend_requests_per_hour,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_limits_match_table() {
        assert_eq!(Tier::Seed.limits().api_per_min, 60);
        assert_eq!(Tier::Untrusted.limits().ws_msg_per_min_per_channel, 3);
        assert_eq!(Tier::Quarantined.limits().servers_per_day, 0);
    }

    #[test]
    fn roundtrip_str() {
        for t in [
            Tier::Seed,
            Tier::Trusted,
            Tier::Provisional,
            Tier::Untrusted,
            Tier::Quarantined,
        ] {
            assert_eq!(t.as_str().parse::<Tier>().unwrap(), t);
        }
    }
}
