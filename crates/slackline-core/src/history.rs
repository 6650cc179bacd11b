// History fetcher
//
// Retrieves the parent and replies of the thread an event belongs to. Replies and
// the parent are two separate platform calls, each bounded by the fetch timeout.
// A top-level event has no history: its context is the event alone.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::error::{BotError, Result};
use crate::event::{compare_ts, ConversationRef, HistoryMessage, HistoryRole};
use crate::traits::ChatPlatform;

/// History retrieved for one conversation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ThreadContext {
    /// Thread root, if the conversation is a thread and the root is readable
    pub parent: Option<HistoryMessage>,
    /// Replies ordered oldest first, excluding the root and the triggering event
    pub replies: Vec<HistoryMessage>,
}

impl ThreadContext {
    pub fn is_empty(&self) -> bool {
        self.parent.is_none() && self.replies.is_empty()
    }
}

/// Reads thread history through a chat platform
#[derive(Clone)]
pub struct HistoryFetcher {
    platform: Arc<dyn ChatPlatform>,
    fetch_timeout: Duration,
}

impl HistoryFetcher {
    pub fn new(platform: Arc<dyn ChatPlatform>, fetch_timeout: Duration) -> Self {
        Self {
            platform,
            fetch_timeout,
        }
    }

    /// Fetch up to `max_count` replies and the parent of `conversation`.
    ///
    /// `exclude_ts` is the triggering message, which is never part of history.
    pub async fn fetch(
        &self,
        conversation: &ConversationRef,
        max_count: usize,
        exclude_ts: &str,
    ) -> Result<ThreadContext> {
        let Some(thread_ts) = conversation.thread_ts.as_deref() else {
            return Ok(ThreadContext::default());
        };
        let channel = conversation.channel.as_str();

        let raw = self
            .bounded(
                "thread_replies",
                self.platform.thread_replies(channel, thread_ts, max_count),
            )
            .await?;

        let mut replies: Vec<HistoryMessage> = raw
            .into_iter()
            .filter(|m| m.ts != thread_ts && m.ts != exclude_ts)
            .map(|m| m.with_role(HistoryRole::ThreadReply))
            .collect();
        replies.sort_by(|a, b| compare_ts(&a.ts, &b.ts));

        let parent = if thread_ts == exclude_ts {
            None
        } else {
            self.bounded("parent_message", self.platform.message(channel, thread_ts))
                .await?
                .map(|m| m.with_role(HistoryRole::Parent))
        };

        debug!(
            channel,
            thread_ts,
            replies = replies.len(),
            has_parent = parent.is_some(),
            "fetched thread history"
        );

        Ok(ThreadContext { parent, replies })
    }

    async fn bounded<T>(&self, call: &str, fut: impl Future<Output = Result<T>>) -> Result<T> {
        match tokio::time::timeout(self.fetch_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(BotError::transient(format!(
                "{} timed out after {:?}",
                call, self.fetch_timeout
            ))),
        }
    }
}
