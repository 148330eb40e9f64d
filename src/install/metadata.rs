use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use super::Platform;
use crate::manifest::{PackageManifest, PackageType};

/// Sidecar file written inside every installed package directory
pub const METADATA_FILE: &str = ".agentpkg.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageMetadata {
    pub name: String,
    pub version: String,
    #[serde(rename = "type")]
    pub package_type: PackageType,
    pub installed_at: DateTime<Utc>,
}

impl PackageMetadata {
    pub fn for_manifest(manifest: &PackageManifest) -> Self {
        Self {
            name: manifest.name.clone(),
            version: manifest.version.clone(),
            package_type: manifest.package_type.clone(),
            installed_at: Utc::now(),
        }
    }

    pub fn write_to(&self, package_dir: &Path) -> Result<PathBuf> {
        let path = package_dir.join(METADATA_FILE);
        let content = serde_json::to_string_pretty(self).context("serializing package metadata")?;
        fs::write(&path, content + "\n")
            .with_context(|| format!("writing {}", path.display()))?;
        Ok(path)
    }

    /// `None` when the sidecar is missing or unreadable
    pub fn read_from(package_dir: &Path) -> Option<Self> {
        let content = fs::read_to_string(package_dir.join(METADATA_FILE)).ok()?;
        serde_json::from_str(&content).ok()
    }
}

/// One package found in a project by `list`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstalledPackage {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(rename = "type")]
    pub package_type: PackageType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub installed_at: Option<DateTime<Utc>>,
    pub platform: Platform,
    pub path: PathBuf,
}

impl InstalledPackage {
    /// Build from a package directory, falling back to the directory name
    /// and `fallback_type` when the sidecar is absent.
    pub fn from_dir(dir: &Path, platform: Platform, fallback_type: PackageType) -> Self {
        match PackageMetadata::read_from(dir) {
            Some(meta) => Self {
                name: meta.name,
                version: Some(meta.version),
                package_type: meta.package_type,
                installed_at: Some(meta.installed_at),
                platform,
                path: dir.to_path_buf(),
            },
            None => Self {
                name: dir
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                version: None,
                package_type: fallback_type,
                installed_at: None,
                platform,
                path: dir.to_path_buf(),
            },
        }
    }
}
