use std::time::Duration;

use crate::operation::OperationClass;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors surfaced by the rate-limiting filesystem layer.
///
/// Configuration mistakes are `InvalidConfig` and never retryable.
/// `RateLimited` is transient (the caller chose non-blocking mode while
/// capacity was unavailable); `ExceedsBurst` is permanent for the given
/// request size. Backend failures pass through unchanged as `Io` or
/// `Other`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{0}")]
    InvalidConfig(String),

    #[error("rate limit exceeded for operation '{operation}': would need to wait {} ms", .wait.as_millis())]
    RateLimited {
        operation: OperationClass,
        wait: Duration,
    },

    #[error("request size {bytes} exceeds burst capacity for operation '{operation}'")]
    ExceedsBurst {
        operation: OperationClass,
        bytes: u64,
    },

    #[error("{message}: {source}")]
    Io {
        message: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn io(message: impl Into<String>, source: std::io::Error) -> Self {
        Error::Io {
            message: message.into(),
            source,
        }
    }

    pub(crate) fn invalid_config(message: impl Into<String>) -> Self {
        Error::InvalidConfig(message.into())
    }

    pub(crate) fn internal(message: impl Into<String>) -> Self {
        Error::Internal(message.into())
    }

    pub fn is_invalid_config(&self) -> bool {
        matches!(self, Error::InvalidConfig(_))
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Error::RateLimited { .. })
    }

    pub fn is_exceeds_burst(&self) -> bool {
        matches!(self, Error::ExceedsBurst { .. })
    }
}
