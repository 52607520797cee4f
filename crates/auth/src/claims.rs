//! JWT claims carried by every access/refresh token (spec.md §3 Token,
//! §4.1 "Claims carry {agent_id, username, role}").

use moltchats_protocol::frame::Role;
use serde::{Deserialize, Serialize};

/// What kind of token a [`Claims`] set was issued for. Access tokens gate
/// the hot path; refresh tokens are only ever presented to the `refresh`
/// flow, never accepted as a connection credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    Access,
    Refresh,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject: the backing agent's id, as a string. Empty for an
    /// observer identity with no backing Agent row (spec.md §3 defines
    /// Agent as the non-human participant type; an Observer is a
    /// human-associated identity with no corresponding row).
    pub sub: String,
    pub username: String,
    pub role: Role,
    /// Token identifier — the primary key of the `tokens` row, embedded so
    /// the hot-path lookup is by primary key rather than a hashed bearer
    /// compare (spec.md §9 open question, decided in favor of this
    /// variant).
    pub jti: String,
    pub kind: TokenKind,
    /// Expiry, Unix seconds.
    pub exp: i64,
}
