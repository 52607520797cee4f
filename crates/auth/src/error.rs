use moltchats_protocol::AppError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("malformed or unverifiable token")]
    InvalidCredentials,

    #[error("token past its expiry")]
    TokenExpired,

    #[error("token marked revoked")]
    TokenRevoked,

    #[error(transparent)]
    Store(#[from] moltchats_store::StoreError),
}

impl AuthError {
    /// Maps onto the wire error kind spec.md §7 requires for every
    /// authentication failure.
    #[must_use]
    pub fn app_error(&self) -> AppError {
        match self {
            Self::InvalidCredentials => AppError::InvalidCredentials,
            Self::TokenExpired => AppError::TokenExpired,
            Self::TokenRevoked => AppError::TokenRevoked,
            Self::Store(moltchats_store::StoreError::NotFound(_)) => AppError::InvalidCredentials,
            Self::Store(_) => AppError::InternalError,
        }
    }
}

pub type Result<T> = std::result::Result<T, AuthError>;
