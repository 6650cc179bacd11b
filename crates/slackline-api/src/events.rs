// Slack Events API endpoint
//
// Requests are authenticated before the body is parsed. Supported events are
// acknowledged at once and handled on a spawned task; Slack redelivers any
// request not acknowledged within 3 seconds.

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde_json::json;
use tracing::{debug, info, warn};

use slackline_slack::events::{parse_payload, InboundPayload};

use crate::state::AppState;

const TIMESTAMP_HEADER: &str = "x-slack-request-timestamp";
const SIGNATURE_HEADER: &str = "x-slack-signature";
const RETRY_NUM_HEADER: &str = "x-slack-retry-num";
const RETRY_REASON_HEADER: &str = "x-slack-retry-reason";

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/slack/events", post(slack_events))
        .with_state(state)
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// POST /slack/events
async fn slack_events(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    if let Err(e) = state.verifier.verify(
        header(&headers, TIMESTAMP_HEADER),
        header(&headers, SIGNATURE_HEADER),
        &body,
    ) {
        warn!(error = %e, "Rejected unsigned Slack request");
        return StatusCode::UNAUTHORIZED.into_response();
    }

    if let Some(retry_num) = header(&headers, RETRY_NUM_HEADER) {
        info!(
            retry_num,
            reason = header(&headers, RETRY_REASON_HEADER).unwrap_or("unknown"),
            "Slack redelivery"
        );
    }

    let payload = match parse_payload(&body, state.bot_user_id.as_deref()) {
        Ok(payload) => payload,
        Err(e) => {
            warn!(error = %e, "Malformed Slack payload");
            return (StatusCode::BAD_REQUEST, Json(json!({ "error": e.to_string() })))
                .into_response();
        }
    };

    match payload {
        InboundPayload::UrlVerification { challenge } => {
            info!("Answered URL verification");
            Json(json!({ "challenge": challenge })).into_response()
        }
        InboundPayload::Event(event) => {
            debug!(
                event_id = %event.event_id,
                delivery_id = event.delivery_id.as_deref().unwrap_or(""),
                "Event accepted"
            );
            let orchestrator = state.orchestrator.clone();
            tokio::spawn(async move {
                orchestrator.handle(&event).await;
            });
            StatusCode::OK.into_response()
        }
        InboundPayload::Ignored { reason } => {
            debug!(%reason, "Event dropped");
            StatusCode::OK.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use axum::{body::Body, http::Request};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use slackline_core::config::BotConfig;
    use slackline_core::dedup::DedupCoordinator;
    use slackline_core::event::BotIdentity;
    use slackline_core::memory::{PlatformCall, RecordingPlatform, ScriptedLlmDriver};
    use slackline_core::orchestrator::{OrchestratorParts, ResponseOrchestrator};
    use slackline_slack::signature::SignatureVerifier;

    const SECRET: &str = "test-signing-secret";

    struct Harness {
        router: Router,
        platform: Arc<RecordingPlatform>,
    }

    fn harness() -> Harness {
        let platform = Arc::new(RecordingPlatform::new());
        let config = BotConfig::default()
            .with_identity(BotIdentity::new(Some("UBOT".into()), Some("BBOT".into())));
        let orchestrator = ResponseOrchestrator::new(OrchestratorParts {
            dedup: DedupCoordinator::in_memory(config.dedup_ttl),
            config,
            platform: platform.clone(),
            llm: Arc::new(ScriptedLlmDriver::replying("Hello from the bot")),
        });
        let state = AppState::new(Arc::new(orchestrator), SignatureVerifier::new(SECRET));

        Harness {
            router: routes(state),
            platform,
        }
    }

    fn now() -> String {
        unix_now().to_string()
    }

    fn unix_now() -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_secs()
    }

    fn signed(body: &str, timestamp: &str) -> Request<Body> {
        let signature = SignatureVerifier::new(SECRET).sign(timestamp, body.as_bytes());
        Request::builder()
            .method("POST")
            .uri("/slack/events")
            .header("content-type", "application/json")
            .header(TIMESTAMP_HEADER, timestamp)
            .header(SIGNATURE_HEADER, signature)
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn mention(envelope_id: &str) -> String {
        json!({
            "type": "event_callback",
            "event_id": envelope_id,
            "authorizations": [{ "user_id": "UBOT" }],
            "event": {
                "type": "app_mention",
                "user": "U1",
                "text": "<@UBOT> what's up?",
                "ts": "1700000000.000100",
                "channel": "C1"
            }
        })
        .to_string()
    }

    async fn wait_for_posts(platform: &RecordingPlatform, count: usize) {
        for _ in 0..200 {
            if platform.posts().len() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn test_url_verification_echoes_challenge() {
        let h = harness();
        let body = r#"{"type":"url_verification","token":"t","challenge":"abc123"}"#;

        let response = h.router.oneshot(signed(body, &now())).await.unwrap();

        assert_eq!(response.status(), 200);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["challenge"], "abc123");
    }

    #[tokio::test]
    async fn test_unsigned_request_is_unauthorized() {
        let h = harness();
        let request = Request::builder()
            .method("POST")
            .uri("/slack/events")
            .header(TIMESTAMP_HEADER, now())
            .header(SIGNATURE_HEADER, "v0=deadbeef")
            .body(Body::from(mention("Ev1")))
            .unwrap();

        let response = h.router.oneshot(request).await.unwrap();

        assert_eq!(response.status(), 401);
        assert!(h.platform.calls().is_empty());
    }

    #[tokio::test]
    async fn test_stale_request_is_unauthorized() {
        let h = harness();
        let stale = (unix_now() - 600).to_string();

        let response = h.router.oneshot(signed(&mention("Ev1"), &stale)).await.unwrap();

        assert_eq!(response.status(), 401);
    }

    #[tokio::test]
    async fn test_malformed_body_is_bad_request() {
        let h = harness();

        let response = h.router.oneshot(signed("{not json", &now())).await.unwrap();

        assert_eq!(response.status(), 400);
    }

    #[tokio::test]
    async fn test_mention_is_acknowledged_then_answered() {
        let h = harness();

        let response = h
            .router
            .oneshot(signed(&mention("Ev1"), &now()))
            .await
            .unwrap();
        assert_eq!(response.status(), 200);

        wait_for_posts(&h.platform, 1).await;
        match h.platform.posts().as_slice() {
            [PlatformCall::Post { channel, text, .. }] => {
                assert_eq!(channel, "C1");
                assert_eq!(text, "Hello from the bot");
            }
            other => panic!("expected one post, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_redelivered_event_is_answered_once() {
        let h = harness();

        for envelope_id in ["Ev1", "Ev2"] {
            let response = h
                .router
                .clone()
                .oneshot(signed(&mention(envelope_id), &now()))
                .await
                .unwrap();
            assert_eq!(response.status(), 200);
        }

        wait_for_posts(&h.platform, 1).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(h.platform.posts().len(), 1);
    }

    #[tokio::test]
    async fn test_edit_is_acknowledged_and_dropped() {
        let h = harness();
        let body = json!({
            "type": "event_callback",
            "event_id": "Ev9",
            "event": {
                "type": "message",
                "subtype": "message_changed",
                "channel": "C1",
                "ts": "1700000000.000300"
            }
        })
        .to_string();

        let response = h.router.oneshot(signed(&body, &now())).await.unwrap();

        assert_eq!(response.status(), 200);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(h.platform.calls().is_empty());
    }
}
