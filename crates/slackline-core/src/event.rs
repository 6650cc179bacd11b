// Inbound events and retrieved history
//
// These types are transport-agnostic: the Slack crate builds them from Events API
// payloads and Web API responses, the core only reads them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Identifies a channel and, when present, a thread root
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationRef {
    /// Channel identifier
    pub channel: String,
    /// Timestamp of the thread root, if the conversation is a thread
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_ts: Option<String>,
}

impl ConversationRef {
    /// A top-level channel conversation
    pub fn channel(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            thread_ts: None,
        }
    }

    /// A conversation inside a thread
    pub fn thread(channel: impl Into<String>, thread_ts: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            thread_ts: Some(thread_ts.into()),
        }
    }

    pub fn is_thread(&self) -> bool {
        self.thread_ts.is_some()
    }

    /// Thread to post the reply into.
    ///
    /// In-thread events are always answered in their thread. Top-level events are
    /// answered in the channel, or in a new thread rooted at the event when
    /// `open_thread` is set.
    pub fn reply_thread_ts(&self, event_ts: &str, open_thread: bool) -> Option<String> {
        match &self.thread_ts {
            Some(ts) => Some(ts.clone()),
            None if open_thread => Some(event_ts.to_string()),
            None => None,
        }
    }
}

impl std::fmt::Display for ConversationRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.thread_ts {
            Some(ts) => write!(f, "{}/{}", self.channel, ts),
            None => write!(f, "{}", self.channel),
        }
    }
}

/// Kinds of inbound events the core acts on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A plain channel or thread message
    Message,
    /// A message that mentions the bot
    AppMention,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventKind::Message => write!(f, "message"),
            EventKind::AppMention => write!(f, "app_mention"),
        }
    }
}

/// A single inbound chat message or mention
///
/// Immutable once received. `event_id` identifies the logical event and is the
/// dedup key; `delivery_id` is the transport's envelope id, kept for logging.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncomingEvent {
    pub event_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery_id: Option<String>,
    pub kind: EventKind,
    pub conversation: ConversationRef,
    /// Timestamp of the message itself
    pub message_ts: String,
    pub author_id: String,
    pub author_is_bot: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bot_id: Option<String>,
    pub text: String,
    pub is_direct_mention: bool,
    pub received_at: DateTime<Utc>,
}

/// Position of a retrieved message within its thread
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryRole {
    Parent,
    ThreadReply,
}

/// A single retrieved prior message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryMessage {
    pub ts: String,
    pub author_id: String,
    pub author_is_bot: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bot_id: Option<String>,
    pub text: String,
    pub role: HistoryRole,
}

impl HistoryMessage {
    /// A reply authored by a person
    pub fn reply(ts: impl Into<String>, author_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            ts: ts.into(),
            author_id: author_id.into(),
            author_is_bot: false,
            bot_id: None,
            text: text.into(),
            role: HistoryRole::ThreadReply,
        }
    }

    /// Mark the message as authored by a bot
    pub fn from_bot(mut self, bot_id: impl Into<String>) -> Self {
        self.author_is_bot = true;
        self.bot_id = Some(bot_id.into());
        self
    }

    /// Re-tag the message with a role
    pub fn with_role(mut self, role: HistoryRole) -> Self {
        self.role = role;
        self
    }
}

/// Identity of the bot itself on the chat platform
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BotIdentity {
    /// User id the bot posts as (used in `<@U...>` mentions)
    #[serde(default)]
    pub user_id: Option<String>,
    /// Bot id attached to the bot's own messages
    #[serde(default)]
    pub bot_id: Option<String>,
}

impl BotIdentity {
    pub fn new(user_id: Option<String>, bot_id: Option<String>) -> Self {
        Self { user_id, bot_id }
    }

    /// Whether the given author is the bot itself
    pub fn is_self(&self, author_id: &str, bot_id: Option<&str>) -> bool {
        let by_user = self.user_id.as_deref() == Some(author_id);
        let by_bot = match (self.bot_id.as_deref(), bot_id) {
            (Some(own), Some(other)) => own == other,
            _ => false,
        };
        by_user || by_bot
    }

    /// Mention token for the bot user, e.g. `<@U123>`
    pub fn mention_token(&self) -> Option<String> {
        self.user_id.as_ref().map(|id| format!("<@{}>", id))
    }
}

/// Compare platform timestamps of the form `"<secs>.<fraction>"`.
///
/// Seconds and fraction are compared numerically; unparseable values sort by the
/// raw string after all parseable ones.
pub fn compare_ts(a: &str, b: &str) -> Ordering {
    match (parse_ts(a), parse_ts(b)) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.cmp(b),
    }
}

fn parse_ts(ts: &str) -> Option<(u64, u64)> {
    let (secs, frac) = match ts.split_once('.') {
        Some((s, f)) => (s, f),
        None => (ts, "0"),
    };
    // Microsecond precision: extra digits are dropped, short fractions
    // right-padded so "1.5" and "1.500000" compare equal
    let frac: String = frac.chars().take(6).collect();
    let frac = format!("{:0<6}", frac);
    Some((secs.parse().ok()?, frac.parse().ok()?))
}
