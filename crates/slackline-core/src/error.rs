// Error types for event handling
//
// The taxonomy separates what may be retried (transient history fetch faults)
// from what must not be (invalid conversation, provider failures, post failures).
// A duplicate delivery is not an error at all; it is a ClaimOutcome.

use thiserror::Error;

/// Result type alias for bot operations
pub type Result<T> = std::result::Result<T, BotError>;

/// Errors that can occur while handling an inbound event
#[derive(Debug, Error)]
pub enum BotError {
    /// Network fault or timeout while retrieving history (retryable)
    #[error("Transient fetch error: {0}")]
    TransientFetch(String),

    /// Conversation reference is invalid or inaccessible (not retried)
    #[error("Permanent fetch error: {0}")]
    PermanentFetch(String),

    /// LLM invocation failed (rate limit, timeout, malformed response)
    #[error("Provider error: {0}")]
    Provider(String),

    /// Shared dedup store could not be reached
    #[error("Dedup store unavailable: {0}")]
    DedupStoreUnavailable(String),

    /// Posting the reply or a reaction failed
    #[error("Post error: {0}")]
    Post(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl BotError {
    /// Create a transient fetch error
    pub fn transient(msg: impl Into<String>) -> Self {
        BotError::TransientFetch(msg.into())
    }

    /// Create a permanent fetch error
    pub fn permanent(msg: impl Into<String>) -> Self {
        BotError::PermanentFetch(msg.into())
    }

    /// Create a provider error
    pub fn provider(msg: impl Into<String>) -> Self {
        BotError::Provider(msg.into())
    }

    /// Create a dedup store error
    pub fn store(msg: impl Into<String>) -> Self {
        BotError::DedupStoreUnavailable(msg.into())
    }

    /// Create a post error
    pub fn post(msg: impl Into<String>) -> Self {
        BotError::Post(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        BotError::Configuration(msg.into())
    }

    /// Only transient fetch faults are retried within one event
    pub fn is_retryable(&self) -> bool {
        matches!(self, BotError::TransientFetch(_))
    }

    /// Short machine-readable kind, used as a log field
    pub fn kind(&self) -> &'static str {
        match self {
            BotError::TransientFetch(_) => "transient_fetch",
            BotError::PermanentFetch(_) => "permanent_fetch",
            BotError::Provider(_) => "provider",
            BotError::DedupStoreUnavailable(_) => "dedup_store_unavailable",
            BotError::Post(_) => "post",
            BotError::Configuration(_) => "configuration",
            BotError::Internal(_) => "internal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transient_fetch_is_retryable() {
        assert!(BotError::transient("timeout").is_retryable());
        assert!(!BotError::permanent("channel_not_found").is_retryable());
        assert!(!BotError::provider("429").is_retryable());
        assert!(!BotError::store("refused").is_retryable());
        assert!(!BotError::post("500").is_retryable());
    }

    #[test]
    fn test_display_includes_message() {
        let err = BotError::provider("rate limited");
        assert_eq!(err.to_string(), "Provider error: rate limited");
        assert_eq!(err.kind(), "provider");
    }
}
