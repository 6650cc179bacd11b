// Events API payload parsing
//
// Turns the JSON body of an Events API request into one of:
// - a url_verification challenge to echo
// - an IncomingEvent the orchestrator can act on
// - an ignored payload (unsupported type, message subtype, missing fields)
//
// The logical event id is "{channel}:{ts}". Slack delivers both a `message` and
// an `app_mention` event for one mention, with different envelope ids; keying
// on the message itself makes the pair dedup to a single reply.

use chrono::Utc;
use serde::Deserialize;
use thiserror::Error;

use slackline_core::event::{ConversationRef, EventKind, IncomingEvent};

/// Message subtypes that still carry a user-authored message
const ANSWERABLE_SUBTYPES: &[&str] = &["thread_broadcast", "file_share"];

#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("malformed payload: {0}")]
    Malformed(String),
}

/// What an Events API request asks of the server
#[derive(Debug, Clone, PartialEq)]
pub enum InboundPayload {
    /// Echo the challenge back
    UrlVerification { challenge: String },
    /// An event for the orchestrator
    Event(IncomingEvent),
    /// Acknowledge and drop
    Ignored { reason: String },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Envelope {
    UrlVerification {
        challenge: String,
    },
    EventCallback {
        event_id: Option<String>,
        event: serde_json::Value,
        #[serde(default)]
        authorizations: Vec<Authorization>,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct Authorization {
    #[serde(default)]
    user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    subtype: Option<String>,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    channel_type: Option<String>,
    #[serde(default)]
    user: Option<String>,
    #[serde(default)]
    bot_id: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    ts: Option<String>,
    #[serde(default)]
    thread_ts: Option<String>,
}

/// Parse an Events API request body.
///
/// `bot_user_id` is the bot's own user id, used to detect mentions in plain
/// message events; when absent the first authorization in the payload is used.
pub fn parse_payload(
    body: &[u8],
    bot_user_id: Option<&str>,
) -> Result<InboundPayload, PayloadError> {
    let envelope: Envelope =
        serde_json::from_slice(body).map_err(|e| PayloadError::Malformed(e.to_string()))?;

    match envelope {
        Envelope::UrlVerification { challenge } => {
            Ok(InboundPayload::UrlVerification { challenge })
        }
        Envelope::EventCallback {
            event_id,
            event,
            authorizations,
        } => {
            let raw: RawEvent = serde_json::from_value(event)
                .map_err(|e| PayloadError::Malformed(e.to_string()))?;
            let bot_user_id = bot_user_id
                .map(str::to_string)
                .or_else(|| authorizations.into_iter().find_map(|a| a.user_id));
            Ok(convert(raw, event_id, bot_user_id.as_deref()))
        }
        Envelope::Other => Ok(ignored("unsupported envelope type")),
    }
}

fn ignored(reason: impl Into<String>) -> InboundPayload {
    InboundPayload::Ignored {
        reason: reason.into(),
    }
}

fn convert(
    raw: RawEvent,
    delivery_id: Option<String>,
    bot_user_id: Option<&str>,
) -> InboundPayload {
    let kind = match raw.kind.as_str() {
        "message" => EventKind::Message,
        "app_mention" => EventKind::AppMention,
        other => return ignored(format!("unsupported event type {}", other)),
    };

    if let Some(subtype) = raw.subtype.as_deref() {
        if !ANSWERABLE_SUBTYPES.contains(&subtype) {
            return ignored(format!("message subtype {}", subtype));
        }
    }

    let (Some(channel), Some(ts)) = (raw.channel, raw.ts) else {
        return ignored("event without channel or ts");
    };
    let Some(author_id) = raw.user.or_else(|| raw.bot_id.clone()) else {
        return ignored("event without author");
    };

    let text = raw.text.unwrap_or_default();
    let mentions_bot = bot_user_id
        .map(|id| text.contains(&format!("<@{}>", id)))
        .unwrap_or(false);
    let is_direct_mention = kind == EventKind::AppMention
        || mentions_bot
        || raw.channel_type.as_deref() == Some("im");

    // A thread root carries thread_ts == ts; it is a top-level message
    let thread_ts = raw.thread_ts.filter(|t| *t != ts);
    let conversation = match thread_ts {
        Some(root) => ConversationRef::thread(channel, root),
        None => ConversationRef::channel(channel),
    };

    InboundPayload::Event(IncomingEvent {
        event_id: format!("{}:{}", conversation.channel, ts),
        delivery_id,
        kind,
        conversation,
        message_ts: ts,
        author_id,
        author_is_bot: raw.bot_id.is_some(),
        bot_id: raw.bot_id,
        text,
        is_direct_mention,
        received_at: Utc::now(),
    })
}
