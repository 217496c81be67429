pub mod models;

use circleci_artifacts_core::config::CircleCiConfig;
use reqwest::{StatusCode, header};
use serde::de::DeserializeOwned;
use thiserror::Error;
use url::Url;

use crate::models::{Artifact, Build};

#[derive(Error, Debug)]
pub enum CircleCiError {
    #[error("Non-200 status code received: {status}, {reason}")]
    UpstreamStatus { status: u16, reason: String },
    #[error("0 length response received")]
    EmptyResponse,
    #[error(transparent)]
    Parse(#[from] serde_json::Error),
    #[error(transparent)]
    Request(#[from] reqwest::Error),
    #[error("Invalid CircleCI base URL {0}")]
    InvalidBaseUrl(Url),
    #[error("Invalid project '{0}', expected owner/repo")]
    InvalidProject(String),
    #[error("Empty build list received from circle api")]
    EmptyBuildList,
    #[error("Unable to find build matching parameters")]
    NoMatchingBuild,
    #[error("0 length artifacts response received")]
    EmptyArtifactList,
}

pub type Result<T, E = CircleCiError> = std::result::Result<T, E>;

/// Constraints on which build is selected. Unset fields match any build.
#[derive(Debug, Clone, Default)]
pub struct BuildFilter {
    pub branch: Option<String>,
    pub has_artifacts: Option<bool>,
    pub job_name: Option<String>,
}

impl BuildFilter {
    pub fn matches(&self, build: &Build) -> bool {
        build.status.is_usable()
            && self.branch.as_ref().is_none_or(|branch| build.branch.as_ref() == Some(branch))
            && self.has_artifacts.is_none_or(|has_artifacts| has_artifacts == build.has_artifacts)
            && self.job_name.as_ref().is_none_or(|job_name| {
                build.workflows.as_ref().and_then(|w| w.job_name.as_ref()) == Some(job_name)
            })
    }
}

#[derive(Debug, Clone, Default)]
pub struct ResolveOptions {
    /// Substring of the artifact path to prefer.
    pub filename: Option<String>,
    pub filter: BuildFilter,
}

/// Returns the build number of the first (newest) build accepted by `filter`.
pub fn select_build(builds: &[Build], filter: &BuildFilter) -> Result<u64> {
    if builds.is_empty() {
        return Err(CircleCiError::EmptyBuildList);
    }
    builds
        .iter()
        .find(|build| filter.matches(build))
        .map(|build| build.build_num)
        .ok_or(CircleCiError::NoMatchingBuild)
}

/// Returns the first artifact whose path contains `filename`, or the first artifact
/// when there is no filename or nothing contains it.
pub fn select_artifact<'a>(
    artifacts: &'a [Artifact],
    filename: Option<&str>,
) -> Result<&'a Artifact> {
    let first = artifacts.first().ok_or(CircleCiError::EmptyArtifactList)?;
    Ok(filename
        .and_then(|filename| artifacts.iter().find(|artifact| artifact.path.contains(filename)))
        .unwrap_or(first))
}

#[derive(Clone)]
pub struct CircleCi {
    client: reqwest::Client,
    base_url: Url,
    vcs: String,
}

impl CircleCi {
    pub fn new(config: &CircleCiConfig) -> Result<Self> {
        if config.base_url.cannot_be_a_base() {
            return Err(CircleCiError::InvalidBaseUrl(config.base_url.clone()));
        }
        let client = reqwest::Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client, base_url: config.base_url.clone(), vcs: config.vcs.clone() })
    }

    /// Resolves the download URL of the newest artifact matching `options`.
    pub async fn resolve(
        &self,
        project: &str,
        token: &str,
        options: &ResolveOptions,
    ) -> Result<String> {
        let build_num = self.latest_build_num(project, token, &options.filter).await?;
        let artifact = self.artifact(project, token, build_num, options.filename.as_deref()).await?;
        tracing::info!("Resolved {} build #{} artifact {}", project, build_num, artifact.path);
        Ok(artifact.url)
    }

    pub async fn latest_build_num(
        &self,
        project: &str,
        token: &str,
        filter: &BuildFilter,
    ) -> Result<u64> {
        let url = self.project_url(project, token, &[])?;
        let builds: Vec<Build> = self.fetch_json(url).await?;
        select_build(&builds, filter)
    }

    pub async fn artifact(
        &self,
        project: &str,
        token: &str,
        build_num: u64,
        filename: Option<&str>,
    ) -> Result<Artifact> {
        let build_num = build_num.to_string();
        let url = self.project_url(project, token, &[&build_num, "artifacts"])?;
        let artifacts: Vec<Artifact> = self.fetch_json(url).await?;
        select_artifact(&artifacts, filename).cloned()
    }

    /// Performs a single GET and decodes the fully buffered JSON body.
    /// Transport errors are stripped of the URL, which carries the token.
    pub async fn fetch_json<T: DeserializeOwned>(&self, url: Url) -> Result<T> {
        tracing::debug!("GET {}", url.path());
        let response = self
            .client
            .get(url)
            .header(header::ACCEPT, mime::APPLICATION_JSON.as_ref())
            .send()
            .await
            .map_err(reqwest::Error::without_url)?;
        let status = response.status();
        if status != StatusCode::OK {
            return Err(CircleCiError::UpstreamStatus {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or_default().to_string(),
            });
        }
        let body = response.bytes().await.map_err(reqwest::Error::without_url)?;
        if body.is_empty() {
            return Err(CircleCiError::EmptyResponse);
        }
        Ok(serde_json::from_slice(&body)?)
    }

    fn project_url(&self, project: &str, token: &str, tail: &[&str]) -> Result<Url> {
        let (owner, repo) = project
            .split_once('/')
            .filter(|(owner, repo)| !owner.is_empty() && !repo.is_empty() && !repo.contains('/'))
            .ok_or_else(|| CircleCiError::InvalidProject(project.to_string()))?;
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| CircleCiError::InvalidBaseUrl(self.base_url.clone()))?
            .pop_if_empty()
            .extend(["api", "v1.1", "project", self.vcs.as_str(), owner, repo])
            .extend(tail);
        url.query_pairs_mut().append_pair("circle-token", token);
        Ok(url)
    }
}
