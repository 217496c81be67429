use axum::{Router, http::StatusCode, routing::get};

use crate::AppState;

mod artifact;

pub fn build_router() -> Router<AppState> {
    Router::new()
        .route("/healthcheck", get(healthcheck))
        .route("/", get(artifact::get_artifact))
}

async fn healthcheck() -> StatusCode { StatusCode::NO_CONTENT }
