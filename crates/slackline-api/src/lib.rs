// Slackline HTTP server
//
// Routes:
// - GET  /status        liveness probe
// - POST /slack/events  Events API endpoint (signed requests only)

pub mod events;
pub mod state;
pub mod status;

use axum::Router;
use tower_http::trace::TraceLayer;

pub use state::AppState;

/// Full application router with request tracing
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(status::routes())
        .merge(events::routes(state))
        .layer(TraceLayer::new_for_http())
}
