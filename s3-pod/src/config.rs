use std::path::Path;

use anyhow::{Context, Result};
use clap::Args;
use serde::Deserialize;

use pod_storage::{S3Config, StorageConfig};

/// Configuration file structure for pod.toml
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub storage: StorageConfig,
    pub s3: S3Config,
}

impl AppConfig {
    /// Load the configuration from a TOML file
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// Loads `path` when given, falls back to the defaults otherwise.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from_file(path),
            None => Ok(Self::default()),
        }
    }
}

/// Command line flags taking precedence over the config file.
#[derive(Args, Debug, Default)]
pub struct Overrides {
    #[arg(long, global = true, help = "Base URL of resource identifiers")]
    pub base_url: Option<String>,

    #[arg(long, global = true, help = "Bucket holding the pod")]
    pub bucket: Option<String>,

    #[arg(long, global = true, help = "S3 endpoint, e.g. http://localhost:9000 for MinIO")]
    pub endpoint: Option<String>,

    #[arg(long, global = true, display_order = 1000, help = "S3 access key")]
    pub access_key: Option<String>,

    #[arg(long, global = true, display_order = 1000, help = "S3 secret key")]
    pub secret_key: Option<String>,
}

impl Overrides {
    pub fn apply(&self, config: &mut AppConfig) {
        if let Some(base_url) = &self.base_url {
            config.storage.base_url = base_url.clone();
        }
        if let Some(bucket) = &self.bucket {
            config.storage.bucket = bucket.clone();
        }
        if let Some(endpoint) = &self.endpoint {
            config.s3.endpoint = Some(endpoint.clone());
        }
        if let Some(access_key) = &self.access_key {
            config.s3.access_key = Some(access_key.clone());
        }
        if let Some(secret_key) = &self.secret_key {
            config.s3.secret_key = Some(secret_key.clone());
        }
    }
}
