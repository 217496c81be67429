pub mod config;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};

pub enum AppError {
    MissingParameter(&'static str),
    InvalidParameter(&'static str),
    Upstream(anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            Self::MissingParameter(name) => {
                (StatusCode::BAD_REQUEST, format!("No '{name}' query parameter supplied"))
                    .into_response()
            }
            Self::InvalidParameter(name) => {
                (StatusCode::BAD_REQUEST, format!("Invalid '{name}' query parameter supplied"))
                    .into_response()
            }
            Self::Upstream(err) => {
                tracing::error!("{:?}", err);
                let body = format!("Error parsing circleci response: {err}");
                (StatusCode::INTERNAL_SERVER_ERROR, body).into_response()
            }
        }
    }
}

impl<E: Into<anyhow::Error>> From<E> for AppError {
    fn from(err: E) -> Self { Self::Upstream(err.into()) }
}
