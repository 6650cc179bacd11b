// In-memory implementations of the core traits
//
// InMemoryClaimStore is the production fallback for single-worker deployments.
// The remaining types are test doubles:
// - FailingClaimStore simulates an unreachable shared store
// - RecordingPlatform serves scripted history and records every write
// - ScriptedLlmDriver returns canned completions and records requests

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::error::{BotError, Result};
use crate::event::{compare_ts, HistoryMessage};
use crate::llm::{LlmCallConfig, LlmDriver, LlmMessage, LlmResponse};
use crate::traits::{ChatPlatform, ClaimStore, PostedMessage, StoreError};

// ============================================================================
// InMemoryClaimStore
// ============================================================================

/// In-process claim store
///
/// Records expire after their TTL and are purged lazily on the next claim, so
/// memory stays bounded by the number of events seen within one TTL window.
#[derive(Debug, Default)]
pub struct InMemoryClaimStore {
    claims: Mutex<HashMap<String, Claim>>,
}

#[derive(Debug)]
struct Claim {
    #[allow(dead_code)]
    owner: String,
    expires_at: Instant,
}

impl InMemoryClaimStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live claims
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.claims
            .lock()
            .values()
            .filter(|c| c.expires_at > now)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ClaimStore for InMemoryClaimStore {
    async fn set_if_absent(
        &self,
        key: &str,
        owner: &str,
        ttl: Duration,
    ) -> std::result::Result<bool, StoreError> {
        let now = Instant::now();
        let mut claims = self.claims.lock();
        claims.retain(|_, c| c.expires_at > now);

        if claims.contains_key(key) {
            return Ok(false);
        }
        claims.insert(
            key.to_string(),
            Claim {
                owner: owner.to_string(),
                expires_at: now + ttl,
            },
        );
        Ok(true)
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

/// Claim store that is never reachable
#[derive(Debug, Default, Clone, Copy)]
pub struct FailingClaimStore;

#[async_trait]
impl ClaimStore for FailingClaimStore {
    async fn set_if_absent(
        &self,
        _key: &str,
        _owner: &str,
        _ttl: Duration,
    ) -> std::result::Result<bool, StoreError> {
        Err(StoreError::Connection("connection refused".to_string()))
    }

    fn backend(&self) -> &'static str {
        "failing"
    }
}

// ============================================================================
// RecordingPlatform
// ============================================================================

/// A write made against the platform
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformCall {
    Post {
        channel: String,
        thread_ts: Option<String>,
        text: String,
    },
    AddReaction {
        channel: String,
        ts: String,
        name: String,
    },
    RemoveReaction {
        channel: String,
        ts: String,
        name: String,
    },
}

type ErrorFactory = Box<dyn Fn() -> BotError + Send + Sync>;

struct FetchFailure {
    make: ErrorFactory,
    /// Remaining failing calls; `None` fails forever
    remaining: Mutex<Option<u32>>,
}

/// Chat platform double with scripted history
#[derive(Default)]
pub struct RecordingPlatform {
    threads: HashMap<(String, String), Vec<HistoryMessage>>,
    messages: HashMap<(String, String), HistoryMessage>,
    fetch_failure: Option<FetchFailure>,
    fetch_delay: Option<Duration>,
    fail_posts: bool,
    fetch_calls: AtomicU32,
    next_ts: AtomicU64,
    calls: Mutex<Vec<PlatformCall>>,
}

impl RecordingPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `messages` for the thread rooted at `thread_ts`
    pub fn with_thread(
        mut self,
        channel: &str,
        thread_ts: &str,
        messages: Vec<HistoryMessage>,
    ) -> Self {
        self.threads
            .insert((channel.to_string(), thread_ts.to_string()), messages);
        self
    }

    /// Serve a single message by its ts
    pub fn with_message(mut self, channel: &str, message: HistoryMessage) -> Self {
        self.messages
            .insert((channel.to_string(), message.ts.clone()), message);
        self
    }

    /// Fail every history call with the produced error
    pub fn fail_fetch_with(
        mut self,
        make: impl Fn() -> BotError + Send + Sync + 'static,
    ) -> Self {
        self.fetch_failure = Some(FetchFailure {
            make: Box::new(make),
            remaining: Mutex::new(None),
        });
        self
    }

    /// Fail the first `times` history calls with the produced error
    pub fn fail_fetch_times(
        mut self,
        times: u32,
        make: impl Fn() -> BotError + Send + Sync + 'static,
    ) -> Self {
        self.fetch_failure = Some(FetchFailure {
            make: Box::new(make),
            remaining: Mutex::new(Some(times)),
        });
        self
    }

    /// Delay every history call
    pub fn with_fetch_delay(mut self, delay: Duration) -> Self {
        self.fetch_delay = Some(delay);
        self
    }

    /// Reject every post
    pub fn fail_posts(mut self) -> Self {
        self.fail_posts = true;
        self
    }

    /// Number of history calls made
    pub fn fetch_calls(&self) -> u32 {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    /// Every write, in order
    pub fn calls(&self) -> Vec<PlatformCall> {
        self.calls.lock().clone()
    }

    /// Posted messages (including rejected attempts)
    pub fn posts(&self) -> Vec<PlatformCall> {
        self.calls()
            .into_iter()
            .filter(|c| matches!(c, PlatformCall::Post { .. }))
            .collect()
    }

    /// Names of reactions added
    pub fn added_reactions(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                PlatformCall::AddReaction { name, .. } => Some(name),
                _ => None,
            })
            .collect()
    }

    async fn before_fetch(&self) -> Result<()> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.fetch_delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(failure) = &self.fetch_failure {
            let mut remaining = failure.remaining.lock();
            match remaining.as_mut() {
                None => return Err((failure.make)()),
                Some(n) if *n > 0 => {
                    *n -= 1;
                    return Err((failure.make)());
                }
                Some(_) => {}
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ChatPlatform for RecordingPlatform {
    async fn thread_replies(
        &self,
        channel: &str,
        thread_ts: &str,
        limit: usize,
    ) -> Result<Vec<HistoryMessage>> {
        self.before_fetch().await?;
        let mut messages = self
            .threads
            .get(&(channel.to_string(), thread_ts.to_string()))
            .cloned()
            .unwrap_or_default();
        messages.sort_by(|a, b| compare_ts(&a.ts, &b.ts));
        messages.truncate(limit);
        Ok(messages)
    }

    async fn message(&self, channel: &str, ts: &str) -> Result<Option<HistoryMessage>> {
        self.before_fetch().await?;
        Ok(self
            .messages
            .get(&(channel.to_string(), ts.to_string()))
            .cloned())
    }

    async fn post_message(
        &self,
        channel: &str,
        thread_ts: Option<&str>,
        text: &str,
    ) -> Result<PostedMessage> {
        self.calls.lock().push(PlatformCall::Post {
            channel: channel.to_string(),
            thread_ts: thread_ts.map(str::to_string),
            text: text.to_string(),
        });
        if self.fail_posts {
            return Err(BotError::post("channel_is_archived"));
        }
        let n = self.next_ts.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(PostedMessage {
            channel: channel.to_string(),
            ts: format!("9000000000.{:06}", n),
        })
    }

    async fn add_reaction(&self, channel: &str, ts: &str, name: &str) -> Result<()> {
        self.calls.lock().push(PlatformCall::AddReaction {
            channel: channel.to_string(),
            ts: ts.to_string(),
            name: name.to_string(),
        });
        Ok(())
    }

    async fn remove_reaction(&self, channel: &str, ts: &str, name: &str) -> Result<()> {
        self.calls.lock().push(PlatformCall::RemoveReaction {
            channel: channel.to_string(),
            ts: ts.to_string(),
            name: name.to_string(),
        });
        Ok(())
    }
}

// ============================================================================
// ScriptedLlmDriver
// ============================================================================

/// LLM driver double returning canned completions
///
/// Scripted replies are consumed in order; once exhausted, the fallback reply
/// is returned.
pub struct ScriptedLlmDriver {
    script: Mutex<VecDeque<Result<String>>>,
    fallback: std::result::Result<String, String>,
    delay: Option<Duration>,
    requests: Mutex<Vec<Vec<LlmMessage>>>,
}

impl ScriptedLlmDriver {
    /// Always reply with `text`
    pub fn replying(text: impl Into<String>) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Ok(text.into()),
            delay: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Always fail with a provider error
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            fallback: Err(message.into()),
            ..Self::replying("")
        }
    }

    /// Queue a one-off result ahead of the fallback
    pub fn then(self, result: Result<String>) -> Self {
        self.script.lock().push_back(result);
        self
    }

    /// Delay every completion
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Message lists received, one per call
    pub fn requests(&self) -> Vec<Vec<LlmMessage>> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl LlmDriver for ScriptedLlmDriver {
    async fn chat_completion(
        &self,
        messages: Vec<LlmMessage>,
        config: &LlmCallConfig,
    ) -> Result<LlmResponse> {
        self.requests.lock().push(messages);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let next = self.script.lock().pop_front();
        let text = match next {
            Some(result) => result?,
            None => self.fallback.clone().map_err(BotError::provider)?,
        };

        Ok(LlmResponse {
            text,
            metadata: crate::llm::LlmCompletionMetadata {
                model: Some(config.model.clone()),
                finish_reason: Some("stop".to_string()),
                ..Default::default()
            },
        })
    }
}
