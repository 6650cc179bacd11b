// Slack LLM Bot Core
//
// This crate provides the transport-agnostic engine of the bot: deciding which
// prior messages go to the LLM for an event, and guaranteeing each event is
// answered at most once across stateless workers.
//
// Key design decisions:
// - Uses traits (ChatPlatform, ClaimStore, LlmDriver) for pluggable backends
// - Event claims are a single atomic conditional write against a shared store
// - Store outages fail closed: no reply rather than duplicate replies
// - Configuration via BotConfig, passed explicitly (never read from globals)
// - Event handling is an explicit state machine (ProcessingState)
// - Error handling distinguishes retryable fetch faults from everything else

pub mod config;
pub mod context;
pub mod dedup;
pub mod error;
pub mod event;
pub mod history;
pub mod llm;
pub mod orchestrator;
pub mod resources;
pub mod retry;
pub mod telemetry;
pub mod traits;

// In-memory implementations for single-worker deployments and testing
pub mod memory;

// Re-exports for convenience
pub use config::{BotConfig, FeedbackConfig, LlmSettings};
pub use context::{ContextAssembler, ContextEntry, ContextPolicy, ContextWindow, EntrySource};
pub use dedup::{ClaimOutcome, DedupCoordinator};
pub use error::{BotError, Result};
pub use event::{
    compare_ts, BotIdentity, ConversationRef, EventKind, HistoryMessage, HistoryRole,
    IncomingEvent,
};
pub use history::{HistoryFetcher, ThreadContext};
pub use llm::{
    LlmCallConfig, LlmCompletionMetadata, LlmDriver, LlmMessage, LlmMessageRole,
    LlmProviderKind, LlmResponse, SharedLlmDriver,
};
pub use orchestrator::{
    EventOutcome, FailedStage, IgnoreReason, OrchestratorParts, ProcessingState, RejectReason,
    ResponseOrchestrator,
};
pub use retry::RetryPolicy;
pub use traits::{ChatPlatform, ClaimStore, PostedMessage, StoreError};
