use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("server start failure: {0}")]
    StartServer(String),

    #[error("transport error: {0}")]
    Transport(#[from] redis::RedisError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("delivery failure: {0}")]
    Delivery(String),

    #[error("handler error: {0}")]
    Handler(String),

    #[error("not found: {0}")]
    NotFound(String),
}

impl AppError {
    /// Whether a retry against the same endpoint can reasonably succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::Transport(_) | AppError::Delivery(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_errors_are_retryable() {
        let err = AppError::Delivery("smtp timeout".into());
        assert!(err.is_retryable());
        assert!(!AppError::Config("missing var".into()).is_retryable());
    }

    #[test]
    fn serialization_errors_convert() {
        let parse_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: AppError = parse_err.into();
        assert!(matches!(err, AppError::Serialization(_)));
    }
}
