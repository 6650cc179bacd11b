// Liveness endpoint

use axum::{routing::get, Json, Router};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
    pub version: &'static str,
}

pub fn routes() -> Router {
    Router::new().route("/status", get(status))
}

/// GET /status
async fn status() -> Json<StatusResponse> {
    Json(StatusResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}
