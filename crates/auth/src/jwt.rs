//! Claims encode/decode (spec.md §4.1: "Decodes the claims; on
//! expiry/malformed, fails with `TOKEN_EXPIRED`/`INVALID_CREDENTIALS`").

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use secrecy::{ExposeSecret, SecretString};

use crate::claims::Claims;
use crate::error::{AuthError, Result};

/// Encode a claims set into a signed JWT.
///
/// # Errors
/// Returns an error only on an internal `jsonwebtoken` failure (never on
/// caller input — claims are already validated by the time they reach
/// here).
pub fn encode_claims(claims: &Claims, signing_secret: &SecretString) -> Result<String> {
    let key = EncodingKey::from_secret(signing_secret.expose_secret().as_bytes());
    encode(&Header::new(Algorithm::HS256), claims, &key).map_err(|_| AuthError::InvalidCredentials)
}

/// Decode and validate a presented token's claims.
///
/// Distinguishes expiry from every other malformed-token case per
/// spec.md §4.1's two distinct error codes.
///
/// # Errors
/// Returns [`AuthError::TokenExpired`] if the `exp` claim is in the past,
/// [`AuthError::InvalidCredentials`] for any other decode failure
/// (bad signature, malformed structure, wrong algorithm).
pub fn decode_claims(token: &str, signing_secret: &SecretString) -> Result<Claims> {
    let key = DecodingKey::from_secret(signing_secret.expose_secret().as_bytes());
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;

    match decode::<Claims>(token, &key, &validation) {
        Ok(data) => Ok(data.claims),
        Err(err) => match err.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => Err(AuthError::TokenExpired),
            _ => Err(AuthError::InvalidCredentials),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::claims::TokenKind;
    use moltchats_protocol::frame::Role;

    fn secret() -> SecretString {
        SecretString::from("test-signing-secret".to_string())
    }

    fn sample_claims(exp: i64) -> Claims {
        Claims {
            sub: "00000000-0000-0000-0000-000000000001".into(),
            username: "alice".into(),
            role: Role::Agent,
            jti: "00000000-0000-0000-0000-000000000002".into(),
            kind: TokenKind::Access,
            exp,
        }
    }

    #[test]
    fn roundtrips_valid_token() {
        let secret = secret();
        let claims = sample_claims(chrono::Utc::now().timestamp() + 3600);
        let token = encode_claims(&claims, &secret).unwrap();
        let decoded = decode_claims(&token, &secret).unwrap();
        assert_eq!(decoded.sub, claims.sub);
        assert_eq!(decoded.jti, claims.jti);
    }

    #[test]
    fn expired_token_fails_with_expired_kind() {
        let secret = secret();
        let claims = sample_claims(chrono::Utc::now().timestamp() - 3600);
        let token = encode_claims(&claims, &secret).unwrap();
        let err = decode_claims(&token, &secret).unwrap_err();
        assert!(matches!(err, AuthError::TokenExpired));
    }

    #[test]
    fn wrong_secret_fails_with_invalid_credentials() {
        let claims = sample_claims(chrono::Utc::now().timestamp() + 3600);
        let token = encode_claims(&claims, &secret()).unwrap();
        let err = decode_claims(&token, &SecretString::from("other-secret".to_string())).unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));
    }

    #[test]
    fn garbage_token_fails_with_invalid_credentials() {
        let err = decode_claims("not-a-jwt", &secret()).unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredentials));
    }
}
