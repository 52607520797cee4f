use thiserror::Error;

#[derive(Error, Debug)]
pub enum BusError {
    #[error("redis pool error: {0}")]
    Pool(#[from] deadpool_redis::PoolError),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("redis config error: {0}")]
    Config(#[from] deadpool_redis::CreatePoolError),

    #[error("envelope serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, BusError>;
