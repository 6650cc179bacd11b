// Slack Web API client
//
// Implements ChatPlatform with:
// - conversations.replies for thread history and single messages
// - chat.postMessage for replies
// - reactions.add / reactions.remove for visual feedback
// - auth.test to discover the bot's own identity at startup

use std::collections::VecDeque;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use slackline_core::error::Result;
use slackline_core::event::{BotIdentity, HistoryMessage, HistoryRole};
use slackline_core::traits::{ChatPlatform, PostedMessage};

use crate::error::SlackError;

pub const DEFAULT_API_BASE_URL: &str = "https://slack.com/api";

/// Page size cap for conversations.replies
const MAX_PAGE_SIZE: usize = 1000;

/// Slack Web API client authenticated with a bot token
#[derive(Clone)]
pub struct SlackClient {
    client: Client,
    token: String,
    base_url: String,
}

impl SlackClient {
    pub fn new(token: impl Into<String>) -> Self {
        Self::with_base_url(token, DEFAULT_API_BASE_URL)
    }

    /// Create a client for a custom API root (used by tests)
    pub fn with_base_url(token: impl Into<String>, base_url: impl AsRef<str>) -> Self {
        Self {
            client: Client::new(),
            token: token.into(),
            base_url: base_url.as_ref().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, method: &str) -> String {
        format!("{}/{}", self.base_url, method)
    }

    async fn get<T: DeserializeOwned>(
        &self,
        method: &str,
        query: &[(&str, String)],
    ) -> std::result::Result<T, SlackError> {
        let response = self
            .client
            .get(self.url(method))
            .bearer_auth(&self.token)
            .query(query)
            .send()
            .await?;
        Self::decode(method, response).await
    }

    async fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        method: &str,
        body: &B,
    ) -> std::result::Result<T, SlackError> {
        let response = self
            .client
            .post(self.url(method))
            .bearer_auth(&self.token)
            .json(body)
            .send()
            .await?;
        Self::decode(method, response).await
    }

    async fn decode<T: DeserializeOwned>(
        method: &str,
        response: reqwest::Response,
    ) -> std::result::Result<T, SlackError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(method, status = status.as_u16(), "Slack API HTTP error");
            return Err(SlackError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let text = response.text().await?;
        let envelope: ApiEnvelope =
            serde_json::from_str(&text).map_err(|e| SlackError::Decode(e.to_string()))?;
        if !envelope.ok {
            let code = envelope.error.unwrap_or_else(|| "unknown_error".to_string());
            debug!(method, error = %code, "Slack API returned ok=false");
            return Err(SlackError::Api(code));
        }
        serde_json::from_str(&text).map_err(|e| SlackError::Decode(e.to_string()))
    }

    /// The newest `limit` messages of a thread, oldest first
    ///
    /// Slack pages a thread from its root forward, so every page is read and
    /// only the trailing window is kept.
    pub async fn conversation_replies(
        &self,
        channel: &str,
        ts: &str,
        limit: usize,
    ) -> std::result::Result<Vec<SlackMessage>, SlackError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut tail: VecDeque<SlackMessage> = VecDeque::with_capacity(limit.min(MAX_PAGE_SIZE));
        let mut cursor: Option<String> = None;

        loop {
            let page = self
                .replies_page(channel, ts, MAX_PAGE_SIZE, cursor.as_deref())
                .await?;
            for message in page.messages {
                tail.push_back(message);
                if tail.len() > limit {
                    tail.pop_front();
                }
            }

            cursor = page
                .response_metadata
                .and_then(|m| m.next_cursor)
                .filter(|c| !c.is_empty());
            if !page.has_more || cursor.is_none() {
                break;
            }
        }

        Ok(tail.into())
    }

    async fn replies_page(
        &self,
        channel: &str,
        ts: &str,
        limit: usize,
        cursor: Option<&str>,
    ) -> std::result::Result<RepliesResponse, SlackError> {
        let mut query = vec![
            ("channel", channel.to_string()),
            ("ts", ts.to_string()),
            ("limit", limit.to_string()),
        ];
        if let Some(c) = cursor {
            query.push(("cursor", c.to_string()));
        }
        self.get("conversations.replies", &query).await
    }

    /// Identity of the token's bot user
    pub async fn auth_test(&self) -> std::result::Result<BotIdentity, SlackError> {
        let response: AuthTestResponse = self.post("auth.test", &serde_json::json!({})).await?;
        Ok(BotIdentity::new(response.user_id, response.bot_id))
    }

    async fn reaction(&self, method: &str, channel: &str, ts: &str, name: &str) -> Result<()> {
        let body = ReactionRequest {
            channel,
            timestamp: ts,
            name,
        };
        match self.post::<_, serde_json::Value>(method, &body).await {
            Ok(_) => Ok(()),
            // Adding twice or removing a missing reaction leaves the desired state
            Err(SlackError::Api(code)) if code == "already_reacted" || code == "no_reaction" => {
                Ok(())
            }
            Err(e) => Err(e.into_post_error()),
        }
    }
}

impl std::fmt::Debug for SlackClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlackClient")
            .field("base_url", &self.base_url)
            .field("token", &"[REDACTED]")
            .finish()
    }
}

#[async_trait]
impl ChatPlatform for SlackClient {
    async fn thread_replies(
        &self,
        channel: &str,
        thread_ts: &str,
        limit: usize,
    ) -> Result<Vec<HistoryMessage>> {
        let messages = self
            .conversation_replies(channel, thread_ts, limit)
            .await
            .map_err(SlackError::into_fetch_error)?;

        Ok(messages
            .into_iter()
            .map(|m| m.into_history(HistoryRole::ThreadReply))
            .collect())
    }

    async fn message(&self, channel: &str, ts: &str) -> Result<Option<HistoryMessage>> {
        // The root is always the first message of the first page
        match self.replies_page(channel, ts, 1, None).await {
            Ok(page) => Ok(page
                .messages
                .into_iter()
                .find(|m| m.ts == ts)
                .map(|m| m.into_history(HistoryRole::Parent))),
            // The root was deleted; the thread is still answerable without it
            Err(SlackError::Api(code)) if code == "thread_not_found" || code == "message_not_found" => {
                debug!(channel, ts, error = %code, "thread root not found");
                Ok(None)
            }
            Err(e) => Err(e.into_fetch_error()),
        }
    }

    async fn post_message(
        &self,
        channel: &str,
        thread_ts: Option<&str>,
        text: &str,
    ) -> Result<PostedMessage> {
        let body = PostMessageRequest {
            channel,
            text,
            thread_ts,
        };
        let response: PostMessageResponse = self
            .post("chat.postMessage", &body)
            .await
            .map_err(SlackError::into_post_error)?;

        Ok(PostedMessage {
            channel: response.channel.unwrap_or_else(|| channel.to_string()),
            ts: response.ts,
        })
    }

    async fn add_reaction(&self, channel: &str, ts: &str, name: &str) -> Result<()> {
        self.reaction("reactions.add", channel, ts, name).await
    }

    async fn remove_reaction(&self, channel: &str, ts: &str, name: &str) -> Result<()> {
        self.reaction("reactions.remove", channel, ts, name).await
    }
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Deserialize)]
struct ApiEnvelope {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
}

/// A message as returned by the Web API
#[derive(Debug, Clone, Deserialize)]
pub struct SlackMessage {
    pub ts: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub bot_id: Option<String>,
    #[serde(default)]
    pub subtype: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub thread_ts: Option<String>,
}

impl SlackMessage {
    pub fn is_bot(&self) -> bool {
        self.bot_id.is_some() || self.subtype.as_deref() == Some("bot_message")
    }

    pub fn into_history(self, role: HistoryRole) -> HistoryMessage {
        let author_is_bot = self.is_bot();
        HistoryMessage {
            author_id: self
                .user
                .or_else(|| self.bot_id.clone())
                .unwrap_or_default(),
            author_is_bot,
            bot_id: self.bot_id,
            text: self.text.unwrap_or_default(),
            ts: self.ts,
            role,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RepliesResponse {
    #[serde(default)]
    messages: Vec<SlackMessage>,
    #[serde(default)]
    has_more: bool,
    #[serde(default)]
    response_metadata: Option<ResponseMetadata>,
}

#[derive(Debug, Deserialize)]
struct ResponseMetadata {
    #[serde(default)]
    next_cursor: Option<String>,
}

#[derive(Debug, Serialize)]
struct PostMessageRequest<'a> {
    channel: &'a str,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    thread_ts: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct PostMessageResponse {
    #[serde(default)]
    channel: Option<String>,
    ts: String,
}

#[derive(Debug, Serialize)]
struct ReactionRequest<'a> {
    channel: &'a str,
    timestamp: &'a str,
    name: &'a str,
}

#[derive(Debug, Deserialize)]
struct AuthTestResponse {
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    bot_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use slackline_core::error::BotError;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn client() -> (MockServer, SlackClient) {
        let server = MockServer::start().await;
        let client = SlackClient::with_base_url("xoxb-test", server.uri());
        (server, client)
    }

    #[tokio::test]
    async fn test_thread_replies_maps_messages() {
        let (server, client) = client().await;
        Mock::given(method("GET"))
            .and(path("/conversations.replies"))
            .and(header("authorization", "Bearer xoxb-test"))
            .and(query_param("channel", "C1"))
            .and(query_param("ts", "100.000000"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true,
                "messages": [
                    { "type": "message", "user": "U1", "text": "root", "ts": "100.000000", "thread_ts": "100.000000" },
                    { "type": "message", "bot_id": "B9", "subtype": "bot_message", "text": "alert", "ts": "101.000000" },
                    { "type": "message", "user": "U2", "text": "reply", "ts": "102.000000" }
                ],
                "has_more": false
            })))
            .mount(&server)
            .await;

        let messages = client.thread_replies("C1", "100.000000", 200).await.unwrap();

        assert_eq!(messages.len(), 3);
        assert_eq!(messages[1].author_id, "B9");
        assert!(messages[1].author_is_bot);
        assert_eq!(messages[1].bot_id.as_deref(), Some("B9"));
        assert!(!messages[2].author_is_bot);
        assert_eq!(messages[2].role, HistoryRole::ThreadReply);
    }

    #[tokio::test]
    async fn test_thread_replies_follows_cursor() {
        let (server, client) = client().await;
        Mock::given(method("GET"))
            .and(path("/conversations.replies"))
            .and(query_param("cursor", "page2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true,
                "messages": [{ "user": "U2", "text": "two", "ts": "102.000000" }],
                "has_more": false
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/conversations.replies"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true,
                "messages": [{ "user": "U1", "text": "one", "ts": "101.000000" }],
                "has_more": true,
                "response_metadata": { "next_cursor": "page2" }
            })))
            .mount(&server)
            .await;

        let messages = client.thread_replies("C1", "100.000000", 10).await.unwrap();

        let texts: Vec<&str> = messages.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["one", "two"]);
    }

    #[tokio::test]
    async fn test_thread_replies_keeps_newest_messages() {
        let (server, client) = client().await;
        Mock::given(method("GET"))
            .and(path("/conversations.replies"))
            .and(query_param("cursor", "c1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true,
                "messages": [
                    { "user": "U1", "text": "m3", "ts": "103.000000" },
                    { "user": "U2", "text": "m4", "ts": "104.000000" }
                ],
                "has_more": false
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/conversations.replies"))
            .and(query_param("limit", "1000"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true,
                "messages": [
                    { "user": "U1", "text": "root", "ts": "100.000000" },
                    { "user": "U2", "text": "m1", "ts": "101.000000" },
                    { "user": "U1", "text": "m2", "ts": "102.000000" }
                ],
                "has_more": true,
                "response_metadata": { "next_cursor": "c1" }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let messages = client.thread_replies("C1", "100.000000", 3).await.unwrap();

        let texts: Vec<&str> = messages.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["m2", "m3", "m4"]);
    }

    #[tokio::test]
    async fn test_thread_not_found_is_permanent() {
        let (server, client) = client().await;
        Mock::given(method("GET"))
            .and(path("/conversations.replies"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "ok": false, "error": "channel_not_found" })),
            )
            .mount(&server)
            .await;

        let err = client.thread_replies("C404", "1.0", 10).await.unwrap_err();

        assert!(matches!(err, BotError::PermanentFetch(_)));
    }

    #[tokio::test]
    async fn test_rate_limit_is_transient() {
        let (server, client) = client().await;
        Mock::given(method("GET"))
            .and(path("/conversations.replies"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "1"))
            .mount(&server)
            .await;

        let err = client.thread_replies("C1", "1.0", 10).await.unwrap_err();

        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_message_returns_parent() {
        let (server, client) = client().await;
        Mock::given(method("GET"))
            .and(path("/conversations.replies"))
            .and(query_param("limit", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true,
                "messages": [{ "user": "U1", "text": "root", "ts": "100.000000" }],
                "has_more": true,
                "response_metadata": { "next_cursor": "more" }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let parent = client.message("C1", "100.000000").await.unwrap().unwrap();

        assert_eq!(parent.text, "root");
        assert_eq!(parent.role, HistoryRole::Parent);
    }

    #[tokio::test]
    async fn test_deleted_parent_is_none() {
        let (server, client) = client().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "ok": false, "error": "thread_not_found" })),
            )
            .mount(&server)
            .await;

        assert_eq!(client.message("C1", "100.000000").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_post_message_in_thread() {
        let (server, client) = client().await;
        Mock::given(method("POST"))
            .and(path("/chat.postMessage"))
            .and(body_partial_json(json!({
                "channel": "C1",
                "text": "hello",
                "thread_ts": "100.000000"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true,
                "channel": "C1",
                "ts": "105.000000",
                "message": { "text": "hello" }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let posted = client
            .post_message("C1", Some("100.000000"), "hello")
            .await
            .unwrap();

        assert_eq!(posted.ts, "105.000000");
    }

    #[tokio::test]
    async fn test_post_failure_is_post_error() {
        let (server, client) = client().await;
        Mock::given(method("POST"))
            .and(path("/chat.postMessage"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "ok": false, "error": "channel_is_archived" })),
            )
            .mount(&server)
            .await;

        let err = client.post_message("C1", None, "hello").await.unwrap_err();

        assert!(matches!(err, BotError::Post(_)));
    }

    #[tokio::test]
    async fn test_duplicate_reaction_is_ok() {
        let (server, client) = client().await;
        Mock::given(method("POST"))
            .and(path("/reactions.add"))
            .and(body_partial_json(json!({ "name": "eyes", "timestamp": "1.0" })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "ok": false, "error": "already_reacted" })),
            )
            .mount(&server)
            .await;

        assert!(client.add_reaction("C1", "1.0", "eyes").await.is_ok());
    }

    #[tokio::test]
    async fn test_auth_test_returns_identity() {
        let (server, client) = client().await;
        Mock::given(method("POST"))
            .and(path("/auth.test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true,
                "user_id": "UBOT",
                "bot_id": "BBOT",
                "team": "Acme"
            })))
            .mount(&server)
            .await;

        let identity = client.auth_test().await.unwrap();

        assert_eq!(identity.user_id.as_deref(), Some("UBOT"));
        assert_eq!(identity.bot_id.as_deref(), Some("BBOT"));
    }
}
