use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::common::lock::with_lock;
use crate::common::paths;
use crate::install::platform::Platform;

pub const DEFAULT_REGISTRY_URL: &str = "https://registry.agentpkg.dev/index.json";
pub const DEFAULT_RAW_CONTENT_BASE: &str = "https://raw.githubusercontent.com";
pub const DEFAULT_MONOREPO: &str = "agentpkg/registry";

/// User configuration stored in `config.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AgentpkgConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_platform: Option<Platform>,
    pub registry_url: String,
    pub raw_content_base: String,
    /// `owner/repo` of the shared package monorepo
    pub monorepo: String,
    pub monorepo_branch: String,
    pub cache_ttl_secs: u64,
    pub request_timeout_secs: u64,
    pub max_archive_bytes: u64,
}

impl Default for AgentpkgConfig {
    fn default() -> Self {
        Self {
            default_platform: None,
            registry_url: DEFAULT_REGISTRY_URL.to_string(),
            raw_content_base: DEFAULT_RAW_CONTENT_BASE.to_string(),
            monorepo: DEFAULT_MONOREPO.to_string(),
            monorepo_branch: "main".to_string(),
            cache_ttl_secs: 300,
            request_timeout_secs: 15,
            max_archive_bytes: 50 * 1024 * 1024,
        }
    }
}

impl AgentpkgConfig {
    pub fn config_path() -> Result<PathBuf> {
        paths::config_file_path()
    }

    pub fn load() -> Result<Self> {
        Self::load_from_path(Self::config_path()?)
    }

    /// Missing files yield defaults; nothing is written on load.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str(&content).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn save_to_path(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating config directory {}", parent.display()))?;
        }
        let content = serde_json::to_string_pretty(self).context("serializing config")?;
        fs::write(path, content + "\n")
            .with_context(|| format!("writing config {}", path.display()))?;
        Ok(())
    }

    /// Read-modify-write of the config file under its lock.
    pub async fn update_at<F>(path: &Path, change: F) -> Result<Self>
    where
        F: FnOnce(&mut Self),
    {
        with_lock(path, || async {
            let mut config = Self::load_from_path(path)?;
            change(&mut config);
            config.save_to_path(path)?;
            Ok::<_, anyhow::Error>(config)
        })
        .await
    }

    pub async fn set_default_platform(platform: Option<Platform>) -> Result<Self> {
        let path = Self::config_path()?;
        Self::update_at(&path, |config| config.default_platform = platform).await
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}
