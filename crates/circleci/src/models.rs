use serde::Deserialize;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildStatus {
    Success,
    Fixed,
    Failed,
    #[default]
    #[serde(other)]
    Other,
}

impl BuildStatus {
    /// Whether a build in this state is eligible for artifact lookup.
    pub fn is_usable(self) -> bool { matches!(self, Self::Success | Self::Fixed) }
}

/// A build as returned by `GET /api/v1.1/project/{vcs}/{owner}/{repo}`.
#[derive(Debug, Clone, Deserialize)]
pub struct Build {
    pub build_num: u64,
    #[serde(default, deserialize_with = "status_or_other")]
    pub status: BuildStatus,
    #[serde(default)]
    pub branch: Option<String>,
    #[serde(default)]
    pub has_artifacts: bool,
    #[serde(default)]
    pub workflows: Option<Workflow>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Workflow {
    #[serde(default)]
    pub job_name: Option<String>,
}

/// An artifact as returned by `GET .../{build_num}/artifacts`.
#[derive(Debug, Clone, Deserialize)]
pub struct Artifact {
    pub path: String,
    pub url: String,
}

// CircleCI reports `"status": null` for builds that have not started.
fn status_or_other<'de, D>(deserializer: D) -> Result<BuildStatus, D::Error>
where D: serde::Deserializer<'de> {
    Ok(Option::<BuildStatus>::deserialize(deserializer)?.unwrap_or_default())
}
