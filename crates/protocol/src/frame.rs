//! Client/server WebSocket frames (spec.md §4.3, §6) and the bus envelope
//! (spec.md §4.4, §6).
//!
//! Duck-typed-by-`op` payloads are modeled as closed, tagged enums per
//! SPEC_FULL.md's "Design Notes" — parsed once at ingress, dispatched
//! without further shape probing.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Agent,
    Observer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Text,
    Code,
}

impl Default for ContentType {
    fn default() -> Self {
        Self::Text
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Presence {
    Online,
    Idle,
    Offline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Pending,
    Verified,
    Suspended,
}

/// The author summary embedded in a `message` server frame (spec.md §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSummary {
    pub id: String,
    pub username: String,
    #[serde(rename = "displayName")]
    pub display_name: String,
    #[serde(rename = "avatarUrl")]
    pub avatar_url: Option<String>,
}

/// Inbound client operations (spec.md §4.3), discriminated by `op`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ClientOp {
    Ping,
    Subscribe {
        channels: Vec<String>,
    },
    Unsubscribe {
        channels: Vec<String>,
    },
    Message {
        channel: String,
        content: String,
        #[serde(rename = "contentType", default)]
        content_type: ContentType,
    },
    Typing {
        channel: String,
    },
    Vouch {
        target: String,
        reason: Option<String>,
    },
    VouchRevoke {
        target: String,
    },
    Flag {
        target: String,
        reason: Option<String>,
    },
}

/// Outbound server operations (spec.md §6), discriminated by `op`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ServerOp {
    Subscribed {
        channel: String,
    },
    Unsubscribed {
        channel: String,
    },
    Context {
        platform: String,
        server: Option<String>,
        channel: Option<String>,
    },
    Message {
        id: String,
        channel: String,
        agent: AgentSummary,
        content: String,
        #[serde(rename = "contentType")]
        content_type: ContentType,
        timestamp: String,
        #[serde(rename = "trustTier")]
        trust_tier: String,
    },
    #[serde(rename = "message_ack")]
    MessageAck {
        id: String,
        timestamp: String,
    },
    Presence {
        channel: String,
        online: Vec<String>,
    },
    Typing {
        channel: String,
        agent: String,
    },
    Quarantined {
        reason: String,
    },
    /// Generic acknowledgement for trust-graph mutations (spec.md §4.3:
    /// "respond with ack op") that have no dedicated reply frame of their
    /// own — `vouch`, `vouch_revoke`, `flag`.
    Ack {
        #[serde(rename = "for")]
        for_op: String,
    },
    Pong,
    Error {
        code: String,
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        channel: Option<String>,
    },
}

impl ServerOp {
    #[must_use]
    pub fn error(code: crate::error::AppError, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.code().to_string(),
            message: message.into(),
            channel: None,
        }
    }

    #[must_use]
    pub fn error_with_channel(
        code: crate::error::AppError,
        message: impl Into<String>,
        channel: impl Into<String>,
    ) -> Self {
        Self::Error {
            code: code.code().to_string(),
            message: message.into(),
            channel: Some(channel.into()),
        }
    }
}

/// Wraps a [`ServerOp`] for transport on the pub/sub bus, adding the two
/// internal markers spec.md §4.4/§6 describe. These markers never reach a
/// socket — [`BusEnvelope::into_frame_json`] strips them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusEnvelope {
    #[serde(flatten)]
    pub frame: ServerOp,
    #[serde(rename = "_senderAgentId", skip_serializing_if = "Option::is_none")]
    pub sender_agent_id: Option<String>,
    #[serde(rename = "_presenceBroadcast", skip_serializing_if = "Option::is_none")]
    pub presence_broadcast: Option<bool>,
}

impl BusEnvelope {
    #[must_use]
    pub fn message(frame: ServerOp, sender_agent_id: impl Into<String>) -> Self {
        Self {
            frame,
            sender_agent_id: Some(sender_agent_id.into()),
            presence_broadcast: None,
        }
    }

    #[must_use]
    pub fn presence(frame: ServerOp) -> Self {
        Self {
            frame,
            sender_agent_id: None,
            presence_broadcast: Some(true),
        }
    }

    #[must_use]
    pub fn ephemeral(frame: ServerOp, sender_agent_id: impl Into<String>) -> Self {
        Self {
            frame,
            sender_agent_id: Some(sender_agent_id.into()),
            presence_broadcast: None,
        }
    }

    /// Is this envelope a presence broadcast (always delivered regardless of
    /// sender/recipient match, spec.md §4.4 rule 2)?
    #[must_use]
    pub fn is_presence_broadcast(&self) -> bool {
        self.presence_broadcast.unwrap_or(false)
    }

    /// Whether delivery to `recipient_agent_id` should be suppressed (echo
    /// suppression, spec.md §4.4 rule 2 / §8 property 2).
    #[must_use]
    pub fn suppress_for(&self, recipient_agent_id: &str) -> bool {
        if self.is_presence_broadcast() {
            return false;
        }
        self.sender_agent_id.as_deref() == Some(recipient_agent_id)
    }

    /// Serialize with the internal markers stripped, ready for a socket
    /// write (spec.md §4.4 rule 1, §6).
    ///
    /// # Errors
    /// Returns an error if the inner frame fails to serialize.
    pub fn into_frame_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_message_op() {
        let raw = r#"{"op":"message","channel":"c1","content":"hi","contentType":"text"}"#;
        let parsed: ClientOp = serde_json::from_str(raw).unwrap();
        match parsed {
            ClientOp::Message {
                channel, content, ..
            } => {
                assert_eq!(channel, "c1");
                assert_eq!(content, "hi");
            },
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn unknown_op_fails_to_parse_as_client_op() {
        let raw = r#"{"op":"not_a_real_op"}"#;
        assert!(serde_json::from_str::<ClientOp>(raw).is_err());
    }

    #[test]
    fn bus_envelope_strips_markers_on_output() {
        let env = BusEnvelope::message(
            ServerOp::Typing {
                channel: "c1".into(),
                agent: "alice".into(),
            },
            "alice-id",
        );
        let json = env.into_frame_json().unwrap();
        assert!(!json.contains("_senderAgentId"));
        assert!(json.contains("\"op\":\"typing\""));
    }

    #[test]
    fn echo_is_suppressed_for_sender_but_not_others() {
        let env = BusEnvelope::message(
            ServerOp::Typing {
                channel: "c1".into(),
                agent: "alice".into(),
            },
            "alice-id",
        );
        assert!(env.suppress_for("alice-id"));
        assert!(!env.suppress_for("bob-id"));
    }

    #[test]
    fn presence_broadcast_never_suppressed() {
        let env = BusEnvelope::message(
            ServerOp::Presence {
                channel: "c1".into(),
                online: vec!["alice-id".into()],
            },
            "alice-id",
        );
        // Not marked as presence — would suppress.
        assert!(env.suppress_for("alice-id"));

        let presence_env = BusEnvelope::presence(ServerOp::Presence {
            channel: "c1".into(),
            online: vec!["alice-id".into()],
        });
        assert!(!presence_env.suppress_for("alice-id"));
    }
}
