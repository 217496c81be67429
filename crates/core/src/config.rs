use std::{fs::File, io::BufReader, path::Path};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use url::Url;

pub const DEFAULT_CONFIG_PATH: &str = "config.yml";

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub circleci: CircleCiConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    /// Inbound request timeout. Upstream calls have no timeout of their own.
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self { Self { port: 3000, request_timeout_secs: 120 } }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CircleCiConfig {
    pub base_url: Url,
    pub vcs: String,
}

impl Default for CircleCiConfig {
    fn default() -> Self {
        Self {
            base_url: Url::parse("https://circleci.com").expect("valid default URL"),
            vcs: "github".to_string(),
        }
    }
}

impl Config {
    /// Loads the config from `path`, falling back to defaults when the file does not exist.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No config file at {}, using defaults", path.display());
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to open {}", path.display()));
            }
        };
        serde_yaml::from_reader(BufReader::new(file))
            .with_context(|| format!("Failed to parse {}", path.display()))
    }
}
