use axum::{
    extract::{Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use circleci_artifacts_circleci::{BuildFilter, ResolveOptions};
use circleci_artifacts_core::AppError;

use crate::AppState;

/// Query pairs in request order, so repeated keys can be rejected with our own message.
type QueryPairs = Vec<(String, String)>;

/// Redirects to the newest artifact matching the query.
pub async fn get_artifact(
    State(state): State<AppState>,
    Query(pairs): Query<QueryPairs>,
) -> Result<Response, AppError> {
    let project = param(&pairs, "project")?.ok_or(AppError::MissingParameter("project"))?;
    let token = param(&pairs, "token")?.ok_or(AppError::MissingParameter("token"))?;
    let has_artifacts = match param(&pairs, "hasArtifacts")?.as_deref() {
        None => None,
        Some("true") => Some(true),
        Some("false") => Some(false),
        Some(_) => return Err(AppError::InvalidParameter("hasArtifacts")),
    };
    let options = ResolveOptions {
        filename: param(&pairs, "filename")?,
        filter: BuildFilter {
            branch: param(&pairs, "branch")?,
            has_artifacts,
            job_name: param(&pairs, "jobName")?,
        },
    };
    let url = state.circleci.resolve(&project, &token, &options).await?;
    Ok((StatusCode::FOUND, [(header::LOCATION, url)]).into_response())
}

/// Looks up a single-valued parameter. Empty values count as absent.
fn param(pairs: &QueryPairs, name: &'static str) -> Result<Option<String>, AppError> {
    let mut values = pairs.iter().filter(|(key, _)| key == name).map(|(_, value)| value);
    let value = values.next();
    if values.next().is_some() {
        return Err(AppError::InvalidParameter(name));
    }
    Ok(value.filter(|v| !v.is_empty()).cloned())
}
