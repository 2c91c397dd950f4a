use crate::secret_string::SecretString;
use anyhow::{Context, Result};
use regex::Regex;
use serde::Deserialize;
use std::{env, fs, path::Path};
use tracing::info;

#[derive(Debug, Deserialize)]
pub struct Config {
    pub webserver: Webserver,
    /// Bearer token that webhook senders must provide in the Authorization header.
    pub auth_token: SecretString,
    pub mappings: Vec<ImageMapping>,
}

#[derive(Debug, Deserialize)]
pub struct Webserver {
    pub port: u16,
}

/// Correlates a pushed container image name to a Kubernetes deployment and
/// namespace, so we know what to update for a given image.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ImageMapping {
    #[serde(rename = "image")]
    pub image_name: String,
    #[serde(rename = "deployment")]
    pub deployment_name: String,
    pub namespace: String,
    /// Providers this mapping accepts events from. Empty means any provider.
    #[serde(default)]
    pub providers: Vec<String>,
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    info!("Loading config from file {}", path.as_ref().display());
    let yaml_str = fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

    let expanded = expand_env_vars(&yaml_str)?;

    let config = serde_yaml_ng::from_str(&expanded)
        .context("Failed to parse YAML config after environment variable expansion")?;

    Ok(config)
}

/// Replaces `${VAR}` placeholders with environment variables values.
/// Returns an error if any env var is missing or regex fails.
fn expand_env_vars(input: &str) -> Result<String> {
    let re =
        Regex::new(r"\$\{([^}]+)}").context("Invalid regex pattern for env var substitution")?;

    let result = re.replace_all(input, |caps: &regex::Captures| {
        let var_name = &caps[1];
        env::var(var_name).unwrap_or_else(|_| panic!("Missing environment variable: {}", var_name))
    });

    Ok(result.into_owned())
}
