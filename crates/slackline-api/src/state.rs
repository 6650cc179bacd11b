// Shared state for route handlers

use std::sync::Arc;

use slackline_core::orchestrator::ResponseOrchestrator;
use slackline_slack::signature::SignatureVerifier;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<ResponseOrchestrator>,
    pub verifier: SignatureVerifier,
    /// Bot user id for mention detection in plain message events
    pub bot_user_id: Option<String>,
}

impl AppState {
    pub fn new(orchestrator: Arc<ResponseOrchestrator>, verifier: SignatureVerifier) -> Self {
        let bot_user_id = orchestrator.config().identity.user_id.clone();
        Self {
            orchestrator,
            verifier,
            bot_user_id,
        }
    }
}
