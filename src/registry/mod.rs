//! The package index: loading, caching and searching.

mod client;

pub use client::{RegistryClient, SearchOptions, SearchResult, SortOrder, search_entries};

use serde::{Deserialize, Serialize};

use crate::install::platform::Platform;
use crate::manifest::PackageType;

/// One package record from the registry index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryEntry {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub author: String,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub declared_type: Option<String>,
    #[serde(default)]
    pub downloads: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stars: Option<u64>,
    #[serde(default)]
    pub verified: bool,
    #[serde(default)]
    pub official: bool,
    /// Sub-path of the package inside the shared monorepo
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Git hosting URL of a standalone repository
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
    /// Direct archive download URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tarball: Option<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
    /// Empty means the package works everywhere
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub platforms: Vec<String>,
}

impl RegistryEntry {
    /// Declared type, or one inferred from name and keywords
    pub fn package_type(&self) -> PackageType {
        if let Some(declared) = self.declared_type.as_deref().filter(|t| !t.trim().is_empty()) {
            return PackageType::from(declared);
        }
        let mentions = |needle: &str| {
            self.name.to_lowercase().contains(needle)
                || self.keywords.iter().any(|k| k.to_lowercase() == needle)
        };
        if mentions("mcp") {
            PackageType::Mcp
        } else if mentions("skill") {
            PackageType::Skill
        } else {
            PackageType::Rules
        }
    }

    pub fn supports(&self, platform: Platform) -> bool {
        self.platforms.is_empty()
            || self
                .platforms
                .iter()
                .any(|p| p.eq_ignore_ascii_case(platform.id()))
    }

    fn published(&self) -> Option<chrono::DateTime<chrono::FixedOffset>> {
        self.published_at
            .as_deref()
            .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistryIndex {
    #[serde(default)]
    pub packages: Vec<RegistryEntry>,
}

#[cfg(test)]
pub(crate) fn entry(name: &str) -> RegistryEntry {
    RegistryEntry {
        name: name.to_string(),
        version: "1.0.0".to_string(),
        description: format!("{name} package"),
        author: "tester".to_string(),
        declared_type: None,
        downloads: 0,
        stars: None,
        verified: false,
        official: false,
        path: None,
        repository: None,
        tarball: None,
        keywords: Vec::new(),
        published_at: None,
        license: None,
        platforms: Vec::new(),
    }
}
