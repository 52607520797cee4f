//! Token issuance, verification, and refresh rotation (spec.md §3 Token,
//! §4.1 Token verification, §8 property 11).

use chrono::{Duration, Utc};
use moltchats_common::ids::{AgentId, TokenId};
use moltchats_protocol::frame::Role;
use secrecy::SecretString;
use sha2::{Digest, Sha256};
use sqlx::PgPool;

use crate::claims::{Claims, TokenKind};
use crate::error::{AuthError, Result};
use crate::jwt::{decode_claims, encode_claims};

/// Access tokens are short-lived; a client is expected to refresh ahead of
/// expiry rather than hold one until it is rejected (spec.md §9 client
/// reconnect policy).
pub const ACCESS_TOKEN_TTL: Duration = Duration::hours(1);
/// Refresh tokens outlive several access-token cycles.
pub const REFRESH_TOKEN_TTL: Duration = Duration::days(30);

/// The resolved identity a connection or request carries once admission
/// succeeds. `agent_id` is `None` for an observer, which spec.md §3 defines
/// only as a human-associated role with no backing `Agent` row.
#[derive(Debug, Clone)]
pub struct Identity {
    pub agent_id: Option<AgentId>,
    pub username: String,
    pub role: Role,
    pub token_id: TokenId,
}

fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn sub_for(agent_id: Option<AgentId>) -> String {
    agent_id.map(|id| id.to_string()).unwrap_or_default()
}

fn parse_sub(sub: &str) -> Option<AgentId> {
    if sub.is_empty() {
        None
    } else {
        sub.parse().ok()
    }
}

/// Issue a fresh access/refresh pair, persisting only their hashes
/// (spec.md §3: "stores hash of access token plus hash of paired refresh
/// token").
///
/// # Errors
/// Propagates any store failure or JWT encoding failure.
pub async fn issue(
    pool: &PgPool,
    agent_id: Option<AgentId>,
    username: &str,
    role: Role,
    signing_secret: &SecretString,
) -> Result<(String, String)> {
    let token_id = TokenId::new();
    let sub = sub_for(agent_id);
    let now = Utc::now();

    let access = encode_claims(
        &Claims {
            sub: sub.clone(),
            username: username.to_string(),
            role,
            jti: token_id.to_string(),
            kind: TokenKind::Access,
            exp: (now + ACCESS_TOKEN_TTL).timestamp(),
        },
        signing_secret,
    )?;
    let refresh = encode_claims(
        &Claims {
            sub,
            username: username.to_string(),
            role,
            jti: token_id.to_string(),
            kind: TokenKind::Refresh,
            exp: (now + REFRESH_TOKEN_TTL).timestamp(),
        },
        signing_secret,
    )?;

    // Observers have no backing Agent row; only real agents get a durable
    // token record to revoke/rotate against. An observer's access token is
    // self-verifying off the JWT signature alone.
    if let Some(agent_id) = agent_id {
        moltchats_store::repo::tokens::issue(
            pool,
            agent_id,
            &hash_token(&access),
            &hash_token(&refresh),
            now + REFRESH_TOKEN_TTL,
        )
        .await?;
    }

    Ok((access, refresh))
}

/// Verify a presented access token against both the JWT signature and the
/// durable token store (spec.md §4.1 "Token verification").
///
/// # Errors
/// [`AuthError::TokenExpired`]/[`AuthError::InvalidCredentials`] on a
/// malformed or expired JWT; [`AuthError::InvalidCredentials`] if the
/// embedded `jti` does not resolve; [`AuthError::TokenRevoked`] if it
/// resolves to a revoked or expired store row.
pub async fn verify_access(
    pool: &PgPool,
    token: &str,
    signing_secret: &SecretString,
) -> Result<Identity> {
    let claims = decode_claims(token, signing_secret)?;
    if claims.kind != TokenKind::Access {
        return Err(AuthError::InvalidCredentials);
    }
    let token_id: TokenId = claims
        .jti
        .parse()
        .map_err(|_| AuthError::InvalidCredentials)?;
    let agent_id = parse_sub(&claims.sub);

    // Observers carry no durable row to check against; the signature and
    // expiry already validated above are the full check.
    if let Some(agent_id) = agent_id {
        let row = moltchats_store::repo::tokens::find_by_id(pool, token_id).await?;
        if row.agent_id != agent_id {
            return Err(AuthError::InvalidCredentials);
        }
        if row.revoked {
            return Err(AuthError::TokenRevoked);
        }
        if row.expires_at <= Utc::now() {
            return Err(AuthError::TokenExpired);
        }
    }

    Ok(Identity {
        agent_id,
        username: claims.username,
        role: claims.role,
        token_id,
    })
}

/// Rotate a refresh token: verify it, revoke the predecessor, issue a new
/// pair (spec.md §3 "Refresh rotates both hashes and marks the predecessor
/// revoked"; §8 property 11).
///
/// # Errors
/// As [`verify_access`], plus [`AuthError::InvalidCredentials`] if the
/// presented refresh token's hash does not match the stored row (meaning
/// it has already been rotated away).
pub async fn refresh(
    pool: &PgPool,
    refresh_token: &str,
    signing_secret: &SecretString,
) -> Result<(String, String)> {
    let claims = decode_claims(refresh_token, signing_secret)?;
    if claims.kind != TokenKind::Refresh {
        return Err(AuthError::InvalidCredentials);
    }
    let agent_id = parse_sub(&claims.sub).ok_or(AuthError::InvalidCredentials)?;
    let token_id: TokenId = claims
        .jti
        .parse()
        .map_err(|_| AuthError::InvalidCredentials)?;

    let predecessor = moltchats_store::repo::tokens::find_by_id(pool, token_id).await?;
    if predecessor.agent_id != agent_id {
        return Err(AuthError::InvalidCredentials);
    }
    if predecessor.revoked {
        return Err(AuthError::TokenRevoked);
    }
    if predecessor.refresh_token_hash != hash_token(refresh_token) {
        return Err(AuthError::InvalidCredentials);
    }

    let new_token_id = TokenId::new();
    let now = Utc::now();
    let access = encode_claims(
        &Claims {
            sub: claims.sub.clone(),
            username: claims.username.clone(),
            role: claims.role,
            jti: new_token_id.to_string(),
            kind: TokenKind::Access,
            exp: (now + ACCESS_TOKEN_TTL).timestamp(),
        },
        signing_secret,
    )?;
    let new_refresh = encode_claims(
        &Claims {
            sub: claims.sub,
            username: claims.username,
            role: claims.role,
            jti: new_token_id.to_string(),
            kind: TokenKind::Refresh,
            exp: (now + REFRESH_TOKEN_TTL).timestamp(),
        },
        signing_secret,
    )?;

    moltchats_store::repo::tokens::rotate(
        pool,
        &predecessor,
        &hash_token(&access),
        &hash_token(&new_refresh),
        now + REFRESH_TOKEN_TTL,
    )
    .await?;

    Ok((access, new_refresh))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_stable_and_not_the_raw_token() {
        let h1 = hash_token("abc");
        let h2 = hash_token("abc");
        assert_eq!(h1, h2);
        assert_ne!(h1, "abc");
    }

    #[test]
    fn sub_roundtrips_agent_id() {
        let id = AgentId::new();
        assert_eq!(parse_sub(&sub_for(Some(id))), Some(id));
        assert_eq!(parse_sub(&sub_for(None)), None);
    }
}
