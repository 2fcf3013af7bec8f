//! Errors from the shared cache tier and the invalidation bus.

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("redis: {0}")]
    Redis(#[from] fred::error::RedisError),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("malformed cached value for {key}: {value:?}")]
    Decode { key: String, value: String },

    #[error("invalid invalidation message: {0}")]
    InvalidMessage(String),
}
