// Core traits for pluggable backends
//
// These traits allow the orchestrator to be used with different backends:
// - In-memory implementations for single-worker deployments and testing
// - Redis/Postgres claim stores for multi-worker deployments
// - The Slack Web API as the chat platform

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;
use crate::event::HistoryMessage;

// ============================================================================
// ChatPlatform - Transport capability of the chat platform
// ============================================================================

/// A message the platform accepted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostedMessage {
    pub channel: String,
    pub ts: String,
}

/// Trait for the chat platform transport
///
/// History calls report `BotError::TransientFetch` for network faults and
/// `BotError::PermanentFetch` for invalid conversation references. Write calls
/// report `BotError::Post`.
#[async_trait]
pub trait ChatPlatform: Send + Sync {
    /// Messages of a thread, oldest first, at most `limit`.
    ///
    /// The result may include the thread root; callers separate it.
    async fn thread_replies(
        &self,
        channel: &str,
        thread_ts: &str,
        limit: usize,
    ) -> Result<Vec<HistoryMessage>>;

    /// A single message by timestamp
    async fn message(&self, channel: &str, ts: &str) -> Result<Option<HistoryMessage>>;

    /// Post text into a channel, optionally as a thread reply
    async fn post_message(
        &self,
        channel: &str,
        thread_ts: Option<&str>,
        text: &str,
    ) -> Result<PostedMessage>;

    /// Attach a reaction to a message
    async fn add_reaction(&self, channel: &str, ts: &str, name: &str) -> Result<()>;

    /// Remove a reaction previously added by the bot
    async fn remove_reaction(&self, channel: &str, ts: &str, name: &str) -> Result<()>;
}

// ============================================================================
// ClaimStore - Shared state for cross-worker event dedup
// ============================================================================

/// Error type for claim store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Store could not be reached
    #[error("connection error: {0}")]
    Connection(String),

    /// Store rejected or failed the command
    #[error("command error: {0}")]
    Command(String),
}

/// Trait for a shared conditional-set-with-expiry store
///
/// `set_if_absent` must be a single atomic operation at the storage layer:
/// among any number of concurrent callers with the same key, exactly one
/// observes `true` until the record expires.
#[async_trait]
pub trait ClaimStore: Send + Sync {
    /// Create `key` with `owner` as value unless a live record exists.
    ///
    /// Returns `true` if this call created the record.
    async fn set_if_absent(
        &self,
        key: &str,
        owner: &str,
        ttl: Duration,
    ) -> std::result::Result<bool, StoreError>;

    /// Backend name for logs
    fn backend(&self) -> &'static str;
}
