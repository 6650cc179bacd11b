// Slack error types
//
// SlackError keeps what the Web API reported; call sites map it into the core
// taxonomy with `into_fetch_error` or `into_post_error`.

use slackline_core::error::BotError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SlackError {
    /// Request never completed (DNS, connect, TLS, timeout)
    #[error("network error: {0}")]
    Network(String),

    /// Non-2xx HTTP status
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// `ok: false` with an API error code
    #[error("slack API error: {0}")]
    Api(String),

    /// Response body could not be decoded
    #[error("decode error: {0}")]
    Decode(String),
}

impl SlackError {
    /// API error code, if Slack returned one
    pub fn code(&self) -> Option<&str> {
        match self {
            SlackError::Api(code) => Some(code.as_str()),
            _ => None,
        }
    }

    /// Whether retrying the same call may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            SlackError::Network(_) => true,
            SlackError::Http { status, .. } => *status == 429 || *status >= 500,
            SlackError::Api(code) => matches!(
                code.as_str(),
                "ratelimited" | "internal_error" | "fatal_error" | "service_unavailable" | "request_timeout"
            ),
            SlackError::Decode(_) => false,
        }
    }

    /// Map a history-call failure into the core taxonomy
    ///
    /// Everything that is not transient (`channel_not_found`, `not_in_channel`,
    /// `invalid_auth`, 4xx, undecodable bodies) is permanent for this event.
    pub fn into_fetch_error(self) -> BotError {
        if self.is_transient() {
            BotError::transient(self.to_string())
        } else {
            BotError::permanent(self.to_string())
        }
    }

    /// Map a write-call failure into the core taxonomy
    pub fn into_post_error(self) -> BotError {
        BotError::post(self.to_string())
    }
}

impl From<reqwest::Error> for SlackError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            SlackError::Decode(e.to_string())
        } else {
            SlackError::Network(e.to_string())
        }
    }
}
