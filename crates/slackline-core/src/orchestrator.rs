// Response orchestrator
//
// Drives one inbound event through its lifecycle:
//
//   Received -> Claiming -> (Rejected | Claimed) -> FetchingHistory -> Assembling
//            -> InvokingLlm -> Posting -> Done
//
// Failed is terminal and reachable from FetchingHistory, InvokingLlm and Posting.
// Only the worker that wins the claim performs any platform write. A failure
// while posting the reply triggers no further writes, since the post may have
// landed without confirmation.

use std::sync::Arc;

use tracing::{debug, info, warn, Instrument};

use crate::config::BotConfig;
use crate::context::{ContextAssembler, ContextPolicy};
use crate::dedup::{ClaimOutcome, DedupCoordinator};
use crate::error::{BotError, Result};
use crate::event::{EventKind, IncomingEvent};
use crate::history::{HistoryFetcher, ThreadContext};
use crate::llm::{LlmCallConfig, LlmDriver};
use crate::traits::ChatPlatform;

/// Lifecycle states of one event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingState {
    Received,
    Claiming,
    Rejected,
    Claimed,
    FetchingHistory,
    Assembling,
    InvokingLlm,
    Posting,
    Done,
    Failed,
}

impl ProcessingState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingState::Received => "received",
            ProcessingState::Claiming => "claiming",
            ProcessingState::Rejected => "rejected",
            ProcessingState::Claimed => "claimed",
            ProcessingState::FetchingHistory => "fetching_history",
            ProcessingState::Assembling => "assembling",
            ProcessingState::InvokingLlm => "invoking_llm",
            ProcessingState::Posting => "posting",
            ProcessingState::Done => "done",
            ProcessingState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProcessingState::Rejected | ProcessingState::Done | ProcessingState::Failed
        )
    }
}

impl std::fmt::Display for ProcessingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a claim was not granted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Another delivery of the event was claimed first
    Duplicate,
    /// The dedup store was unreachable (fail closed)
    StoreUnavailable,
}

/// Why an event was not considered at all
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// Authored by the bot itself
    OwnMessage,
    /// Authored by another bot while other bots are excluded
    OtherBot,
    /// A top-level message that does not address the bot
    NotAddressed,
    /// Nothing left to answer once mentions are stripped
    EmptyText,
}

/// State in which processing failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailedStage {
    FetchingHistory,
    InvokingLlm,
    Posting,
}

impl FailedStage {
    fn state(&self) -> ProcessingState {
        match self {
            FailedStage::FetchingHistory => ProcessingState::FetchingHistory,
            FailedStage::InvokingLlm => ProcessingState::InvokingLlm,
            FailedStage::Posting => ProcessingState::Posting,
        }
    }
}

/// Terminal result of handling one event
#[derive(Debug)]
pub enum EventOutcome {
    Ignored(IgnoreReason),
    Rejected(RejectReason),
    Replied { reply_ts: String },
    Failed { stage: FailedStage, error: BotError },
}

impl EventOutcome {
    pub fn is_replied(&self) -> bool {
        matches!(self, EventOutcome::Replied { .. })
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, EventOutcome::Rejected(_))
    }

    pub fn failed_stage(&self) -> Option<FailedStage> {
        match self {
            EventOutcome::Failed { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

/// Collaborators of a ResponseOrchestrator
pub struct OrchestratorParts {
    pub config: BotConfig,
    pub dedup: DedupCoordinator,
    pub platform: Arc<dyn ChatPlatform>,
    pub llm: Arc<dyn LlmDriver>,
}

/// Sequences claim, history, context, LLM and reply for inbound events
pub struct ResponseOrchestrator {
    config: BotConfig,
    dedup: DedupCoordinator,
    platform: Arc<dyn ChatPlatform>,
    llm: Arc<dyn LlmDriver>,
    fetcher: HistoryFetcher,
    assembler: ContextAssembler,
    call_config: LlmCallConfig,
}

impl ResponseOrchestrator {
    pub fn new(parts: OrchestratorParts) -> Self {
        let OrchestratorParts {
            config,
            dedup,
            platform,
            llm,
        } = parts;

        let fetcher = HistoryFetcher::new(platform.clone(), config.fetch_timeout);
        let assembler = ContextAssembler::new(ContextPolicy::from_config(&config));
        let call_config = config.llm.call_config();

        Self {
            config,
            dedup,
            platform,
            llm,
            fetcher,
            assembler,
            call_config,
        }
    }

    pub fn config(&self) -> &BotConfig {
        &self.config
    }

    /// Handle one inbound event to its terminal state
    pub async fn handle(&self, event: &IncomingEvent) -> EventOutcome {
        let span = tracing::info_span!(
            "handle_event",
            event_id = %event.event_id,
            channel = %event.conversation.channel,
            thread_ts = event.conversation.thread_ts.as_deref().unwrap_or(""),
            kind = %event.kind,
        );

        let outcome = self.handle_inner(event).instrument(span.clone()).await;

        let _guard = span.enter();
        match &outcome {
            EventOutcome::Replied { reply_ts } => {
                info!(state = %ProcessingState::Done, reply_ts = %reply_ts, "event answered");
            }
            EventOutcome::Ignored(reason) => {
                debug!(?reason, "event ignored");
            }
            EventOutcome::Rejected(reason) => {
                warn!(state = %ProcessingState::Rejected, ?reason, "event rejected");
            }
            EventOutcome::Failed { stage, error } => {
                warn!(
                    state = %ProcessingState::Failed,
                    stage = %stage.state(),
                    error_kind = error.kind(),
                    error = %error,
                    "event failed"
                );
            }
        }
        outcome
    }

    async fn handle_inner(&self, event: &IncomingEvent) -> EventOutcome {
        self.transition(event, ProcessingState::Received);

        if let Some(reason) = self.ignore_reason(event) {
            return EventOutcome::Ignored(reason);
        }

        self.transition(event, ProcessingState::Claiming);
        match self.dedup.claim(&event.event_id).await {
            Ok(ClaimOutcome::Claimed) => {}
            Ok(ClaimOutcome::AlreadyClaimed) => {
                return EventOutcome::Rejected(RejectReason::Duplicate);
            }
            Err(_) => return EventOutcome::Rejected(RejectReason::StoreUnavailable),
        }
        self.transition(event, ProcessingState::Claimed);

        if let Some(name) = &self.config.feedback.in_progress_reaction {
            self.cosmetic(
                "add_reaction",
                self.platform
                    .add_reaction(&event.conversation.channel, &event.message_ts, name),
            )
            .await;
        }

        let history = match self.fetch_history(event).await {
            Ok(history) => history,
            Err(error) => return self.fail(event, FailedStage::FetchingHistory, error).await,
        };

        self.transition(event, ProcessingState::Assembling);
        let window = self.assembler.assemble(
            &self.config.system_instructions,
            history.parent.as_ref(),
            &history.replies,
            event,
        );
        debug!(
            event_id = %event.event_id,
            entries = window.len(),
            history = window.history_len(),
            has_parent = window.has_parent(),
            "context assembled"
        );

        self.transition(event, ProcessingState::InvokingLlm);
        let reply = match self.invoke_llm(window.into_llm_messages()).await {
            Ok(reply) => reply,
            Err(error) => return self.fail(event, FailedStage::InvokingLlm, error).await,
        };

        self.transition(event, ProcessingState::Posting);
        let thread_ts = event
            .conversation
            .reply_thread_ts(&event.message_ts, self.config.reply_in_thread);
        let posted = match self
            .platform
            .post_message(&event.conversation.channel, thread_ts.as_deref(), &reply)
            .await
        {
            Ok(posted) => posted,
            Err(error) => {
                self.transition(event, ProcessingState::Failed);
                return EventOutcome::Failed {
                    stage: FailedStage::Posting,
                    error,
                };
            }
        };

        if let Some(name) = &self.config.feedback.in_progress_reaction {
            self.cosmetic(
                "remove_reaction",
                self.platform
                    .remove_reaction(&event.conversation.channel, &event.message_ts, name),
            )
            .await;
        }

        self.transition(event, ProcessingState::Done);
        EventOutcome::Replied {
            reply_ts: posted.ts,
        }
    }

    fn ignore_reason(&self, event: &IncomingEvent) -> Option<IgnoreReason> {
        if self
            .config
            .identity
            .is_self(&event.author_id, event.bot_id.as_deref())
        {
            return Some(IgnoreReason::OwnMessage);
        }
        if event.author_is_bot && !self.config.include_other_bots {
            return Some(IgnoreReason::OtherBot);
        }

        let addressed = match event.kind {
            EventKind::AppMention => true,
            EventKind::Message => {
                event.is_direct_mention
                    || event.conversation.is_thread()
                    || self.config.respond_to_all_messages
            }
        };
        if !addressed {
            return Some(IgnoreReason::NotAddressed);
        }

        if self.assembler.strip_mentions(&event.text).is_empty() {
            return Some(IgnoreReason::EmptyText);
        }
        None
    }

    async fn fetch_history(&self, event: &IncomingEvent) -> Result<ThreadContext> {
        if !event.conversation.is_thread() {
            return Ok(ThreadContext::default());
        }
        self.transition(event, ProcessingState::FetchingHistory);

        let fetcher = &self.fetcher;
        let conversation = &event.conversation;
        let exclude_ts = event.message_ts.as_str();
        let max_count = self.config.max_thread_fetch;

        self.config
            .fetch_retry
            .run("fetch_history", move |attempt| {
                debug!(attempt, "fetching thread history");
                fetcher.fetch(conversation, max_count, exclude_ts)
            })
            .await
    }

    async fn invoke_llm(&self, messages: Vec<crate::llm::LlmMessage>) -> Result<String> {
        let timeout = self.config.llm_timeout;
        let response =
            match tokio::time::timeout(timeout, self.llm.chat_completion(messages, &self.call_config))
                .await
            {
                Ok(result) => result?,
                Err(_) => {
                    return Err(BotError::provider(format!(
                        "completion timed out after {:?}",
                        timeout
                    )))
                }
            };

        debug!(
            model = response.metadata.model.as_deref().unwrap_or(""),
            total_tokens = response.metadata.total_tokens,
            finish_reason = response.metadata.finish_reason.as_deref().unwrap_or(""),
            "completion received"
        );

        let text = response.text.trim();
        if text.is_empty() {
            return Err(BotError::provider("empty completion"));
        }
        Ok(text.to_string())
    }

    /// Leave a visible failure signal for fetch and LLM failures
    async fn fail(&self, event: &IncomingEvent, stage: FailedStage, error: BotError) -> EventOutcome {
        self.transition(event, ProcessingState::Failed);

        let channel = event.conversation.channel.as_str();
        let feedback = &self.config.feedback;

        if let Some(name) = &feedback.in_progress_reaction {
            self.cosmetic(
                "remove_reaction",
                self.platform.remove_reaction(channel, &event.message_ts, name),
            )
            .await;
        }
        if let Some(name) = &feedback.failure_reaction {
            self.cosmetic(
                "add_reaction",
                self.platform.add_reaction(channel, &event.message_ts, name),
            )
            .await;
        }
        if let Some(text) = &feedback.failure_message {
            let thread_ts = event.conversation.reply_thread_ts(&event.message_ts, true);
            self.cosmetic(
                "post_failure_message",
                self.platform.post_message(channel, thread_ts.as_deref(), text),
            )
            .await;
        }

        EventOutcome::Failed { stage, error }
    }

    /// Await a feedback call whose failure must not affect the outcome
    async fn cosmetic<T>(&self, call: &str, fut: impl std::future::Future<Output = Result<T>>) {
        if let Err(e) = fut.await {
            warn!(call, error = %e, "feedback call failed");
        }
    }

    fn transition(&self, event: &IncomingEvent, state: ProcessingState) {
        debug!(event_id = %event.event_id, state = %state, "state transition");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FeedbackConfig;
    use crate::event::{BotIdentity, ConversationRef, HistoryMessage};
    use crate::memory::{PlatformCall, RecordingPlatform, ScriptedLlmDriver};
    use crate::retry::RetryPolicy;
    use chrono::Utc;
    use std::time::Duration;

    fn config() -> BotConfig {
        BotConfig::default()
            .with_system_instructions("You are helpful.")
            .with_identity(BotIdentity::new(Some("UBOT".into()), Some("BBOT".into())))
            .with_fetch_retry(RetryPolicy::fixed(Duration::ZERO, 3))
    }

    fn mention(conversation: ConversationRef, ts: &str) -> IncomingEvent {
        IncomingEvent {
            event_id: format!("{}:{}", conversation.channel, ts),
            delivery_id: Some("Ev01".to_string()),
            kind: EventKind::AppMention,
            conversation,
            message_ts: ts.to_string(),
            author_id: "U1".to_string(),
            author_is_bot: false,
            bot_id: None,
            text: "<@UBOT> what is the status?".to_string(),
            is_direct_mention: true,
            received_at: Utc::now(),
        }
    }

    fn orchestrator(
        config: BotConfig,
        platform: Arc<RecordingPlatform>,
        llm: Arc<ScriptedLlmDriver>,
    ) -> ResponseOrchestrator {
        ResponseOrchestrator::new(OrchestratorParts {
            dedup: DedupCoordinator::in_memory(config.dedup_ttl),
            config,
            platform,
            llm,
        })
    }

    #[tokio::test]
    async fn test_direct_mention_replies_in_channel() {
        let platform = Arc::new(RecordingPlatform::new());
        let llm = Arc::new(ScriptedLlmDriver::replying("All green."));
        let orch = orchestrator(config(), platform.clone(), llm.clone());

        let outcome = orch
            .handle(&mention(ConversationRef::channel("C1"), "200.000000"))
            .await;

        assert!(outcome.is_replied());
        assert_eq!(platform.fetch_calls(), 0);
        assert_eq!(
            platform.calls(),
            vec![
                PlatformCall::AddReaction {
                    channel: "C1".into(),
                    ts: "200.000000".into(),
                    name: "eyes".into(),
                },
                PlatformCall::Post {
                    channel: "C1".into(),
                    thread_ts: None,
                    text: "All green.".into(),
                },
                PlatformCall::RemoveReaction {
                    channel: "C1".into(),
                    ts: "200.000000".into(),
                    name: "eyes".into(),
                },
            ]
        );

        let request = &llm.requests()[0];
        assert_eq!(request.len(), 2);
        assert_eq!(request[1].content, "what is the status?");
    }

    #[tokio::test]
    async fn test_thread_reply_uses_history() {
        let platform = Arc::new(
            RecordingPlatform::new()
                .with_thread(
                    "C1",
                    "100.000000",
                    vec![
                        HistoryMessage::reply("100.000000", "U1", "deploy failed"),
                        HistoryMessage::reply("101.000000", "UBOT", "Which service?").from_bot("BBOT"),
                        HistoryMessage::reply("102.000000", "U1", "api"),
                    ],
                )
                .with_message("C1", HistoryMessage::reply("100.000000", "U1", "deploy failed")),
        );
        let llm = Arc::new(ScriptedLlmDriver::replying("Check the logs."));
        let orch = orchestrator(config(), platform.clone(), llm.clone());

        let outcome = orch
            .handle(&mention(ConversationRef::thread("C1", "100.000000"), "103.000000"))
            .await;

        assert!(outcome.is_replied());
        let contents: Vec<String> = llm.requests()[0].iter().map(|m| m.content.clone()).collect();
        assert_eq!(
            contents,
            vec![
                "You are helpful.",
                "deploy failed",
                "Which service?",
                "api",
                "what is the status?"
            ]
        );
        assert!(platform.posts().iter().any(|c| matches!(
            c,
            PlatformCall::Post { thread_ts: Some(ts), .. } if ts == "100.000000"
        )));
    }

    fn other_bot_message() -> IncomingEvent {
        IncomingEvent {
            kind: EventKind::Message,
            author_id: "UOTHER".to_string(),
            author_is_bot: true,
            bot_id: Some("BOTHER".to_string()),
            text: "automated alert".to_string(),
            is_direct_mention: false,
            ..mention(ConversationRef::thread("C1", "100.000000"), "104.000000")
        }
    }

    #[tokio::test]
    async fn test_other_bot_in_thread_is_ignored() {
        let platform = Arc::new(RecordingPlatform::new());
        let llm = Arc::new(ScriptedLlmDriver::replying("ok"));
        let orch = orchestrator(config(), platform.clone(), llm.clone());

        let outcome = orch.handle(&other_bot_message()).await;

        assert!(matches!(outcome, EventOutcome::Ignored(IgnoreReason::OtherBot)));
        assert!(platform.calls().is_empty());
        assert!(llm.requests().is_empty());
    }

    #[tokio::test]
    async fn test_other_bot_answered_when_bots_included() {
        let platform = Arc::new(
            RecordingPlatform::new()
                .with_thread(
                    "C1",
                    "100.000000",
                    vec![HistoryMessage::reply("100.000000", "U1", "watch the deploy")],
                )
                .with_message("C1", HistoryMessage::reply("100.000000", "U1", "watch the deploy")),
        );
        let llm = Arc::new(ScriptedLlmDriver::replying("ok"));
        let orch = orchestrator(
            config().with_include_other_bots(true),
            platform.clone(),
            llm.clone(),
        );

        let outcome = orch.handle(&other_bot_message()).await;

        assert!(outcome.is_replied());
        assert_eq!(llm.requests().len(), 1);
        assert!(!platform.posts().is_empty());
    }

    #[tokio::test]
    async fn test_second_delivery_is_rejected() {
        let platform = Arc::new(RecordingPlatform::new());
        let orch = orchestrator(
            config(),
            platform.clone(),
            Arc::new(ScriptedLlmDriver::replying("ok")),
        );
        let event = mention(ConversationRef::channel("C1"), "200.000000");

        assert!(orch.handle(&event).await.is_replied());
        assert!(matches!(
            orch.handle(&event).await,
            EventOutcome::Rejected(RejectReason::Duplicate)
        ));
        assert_eq!(platform.posts().len(), 1);
    }

    #[tokio::test]
    async fn test_own_message_is_ignored() {
        let platform = Arc::new(RecordingPlatform::new());
        let orch = orchestrator(
            config(),
            platform.clone(),
            Arc::new(ScriptedLlmDriver::replying("ok")),
        );
        let mut event = mention(ConversationRef::channel("C1"), "200.000000");
        event.author_id = "UBOT".into();

        assert!(matches!(
            orch.handle(&event).await,
            EventOutcome::Ignored(IgnoreReason::OwnMessage)
        ));
        assert!(platform.calls().is_empty());
    }

    #[tokio::test]
    async fn test_unaddressed_top_level_message_is_ignored() {
        let platform = Arc::new(RecordingPlatform::new());
        let orch = orchestrator(
            config(),
            platform.clone(),
            Arc::new(ScriptedLlmDriver::replying("ok")),
        );
        let mut event = mention(ConversationRef::channel("C1"), "200.000000");
        event.kind = EventKind::Message;
        event.is_direct_mention = false;
        event.text = "lunch?".into();

        assert!(matches!(
            orch.handle(&event).await,
            EventOutcome::Ignored(IgnoreReason::NotAddressed)
        ));
        assert!(platform.calls().is_empty());
    }

    #[tokio::test]
    async fn test_bare_mention_is_ignored() {
        let orch = orchestrator(
            config(),
            Arc::new(RecordingPlatform::new()),
            Arc::new(ScriptedLlmDriver::replying("ok")),
        );
        let mut event = mention(ConversationRef::channel("C1"), "200.000000");
        event.text = "  <@UBOT> ".into();

        assert!(matches!(
            orch.handle(&event).await,
            EventOutcome::Ignored(IgnoreReason::EmptyText)
        ));
    }

    #[tokio::test]
    async fn test_permanent_fetch_error_is_not_retried() {
        let platform = Arc::new(
            RecordingPlatform::new().fail_fetch_with(|| BotError::permanent("thread_not_found")),
        );
        let orch = orchestrator(
            config().with_feedback(FeedbackConfig::silent()),
            platform.clone(),
            Arc::new(ScriptedLlmDriver::replying("ok")),
        );

        let outcome = orch
            .handle(&mention(ConversationRef::thread("C1", "100.000000"), "103.000000"))
            .await;

        assert_eq!(outcome.failed_stage(), Some(FailedStage::FetchingHistory));
        assert_eq!(platform.fetch_calls(), 1);
        assert!(platform.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_llm_timeout_is_provider_failure() {
        let platform = Arc::new(RecordingPlatform::new());
        let llm = Arc::new(ScriptedLlmDriver::replying("late").with_delay(Duration::from_secs(120)));
        let orch = orchestrator(config(), platform.clone(), llm);

        let outcome = orch
            .handle(&mention(ConversationRef::channel("C1"), "200.000000"))
            .await;

        match outcome {
            EventOutcome::Failed { stage, error } => {
                assert_eq!(stage, FailedStage::InvokingLlm);
                assert!(matches!(error, BotError::Provider(_)));
            }
            other => panic!("expected failure, got {:?}", other),
        }
        assert!(platform.posts().is_empty());
        assert_eq!(platform.added_reactions(), vec!["eyes", "warning"]);
    }

    #[test]
    fn test_terminal_states() {
        assert!(ProcessingState::Done.is_terminal());
        assert!(ProcessingState::Rejected.is_terminal());
        assert!(ProcessingState::Failed.is_terminal());
        assert!(!ProcessingState::Posting.is_terminal());
        assert_eq!(ProcessingState::InvokingLlm.to_string(), "invoking_llm");
    }
}
