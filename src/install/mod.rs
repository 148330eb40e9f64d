//! Writing packages into a project and taking them out again.

pub mod handlers;
pub mod metadata;
pub mod orchestrator;
pub mod platform;

pub use orchestrator::Installer;
pub use platform::Platform;

use serde::Serialize;
use serde_json::json;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::ui::prelude::*;

/// Progress of one install or uninstall invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Resolving,
    Fetching,
    Extracting,
    Writing,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Resolving => "resolving",
            Stage::Fetching => "fetching",
            Stage::Extracting => "extracting",
            Stage::Writing => "writing",
            Stage::Done => "done",
        };
        f.write_str(name)
    }
}

/// A failure tagged with the stage it happened in
#[derive(Debug, Error)]
#[error("{stage} failed: {source:#}")]
pub struct InstallError {
    pub stage: Stage,
    #[source]
    pub source: anyhow::Error,
}

impl InstallError {
    pub fn new(stage: Stage, source: anyhow::Error) -> Self {
        Self { stage, source }
    }
}

/// Records stage transitions for one package and emits them at debug level
#[derive(Debug)]
pub struct StageTracker {
    package: String,
    current: Stage,
}

impl StageTracker {
    pub fn new(package: impl Into<String>) -> Self {
        let tracker = Self {
            package: package.into(),
            current: Stage::Resolving,
        };
        tracker.announce();
        tracker
    }

    pub fn enter(&mut self, stage: Stage) {
        self.current = stage;
        self.announce();
    }

    /// Tag `source` with the current stage
    pub fn fail(&self, source: anyhow::Error) -> InstallError {
        InstallError::new(self.current, source)
    }

    fn announce(&self) {
        emit(
            Level::Debug,
            "install.stage",
            &format!("{} {}: {}", char::from(NerdFont::Gear), self.package, self.current),
            Some(json!({ "package": self.package, "stage": self.current })),
        );
    }
}

/// Outcome of one attempt against one platform
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallationResult {
    pub success: bool,
    pub platform: Platform,
    /// Absolute paths written (install) or removed (uninstall)
    pub paths: Vec<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_stage: Option<Stage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl InstallationResult {
    pub fn succeeded(platform: Platform, paths: Vec<PathBuf>) -> Self {
        Self {
            success: true,
            platform,
            paths,
            error: None,
            failed_stage: None,
            warnings: Vec::new(),
        }
    }

    pub fn failed(platform: Platform, error: &InstallError) -> Self {
        Self {
            success: false,
            platform,
            paths: Vec::new(),
            error: Some(format!("{:#}", error.source)),
            failed_stage: Some(error.stage),
            warnings: Vec::new(),
        }
    }
}

/// Split results into (succeeded, failed)
pub fn classify(
    results: &[InstallationResult],
) -> (Vec<&InstallationResult>, Vec<&InstallationResult>) {
    results.iter().partition(|r| r.success)
}

/// True when an uninstall removed nothing anywhere
pub fn nothing_removed(results: &[InstallationResult]) -> bool {
    results.iter().all(|r| r.paths.is_empty())
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("package name `{0}` has no usable characters")]
pub struct InvalidPackageName(pub String);

/// Turn a package name into a single safe path component.
///
/// Used for both directory names and service-config keys, so install and
/// uninstall always agree.
pub fn sanitize_package_name(name: &str) -> Result<String, InvalidPackageName> {
    let trimmed = name.trim();
    let without_scope = trimmed.strip_prefix('@').unwrap_or(trimmed);

    let mut out = String::with_capacity(without_scope.len());
    for c in without_scope.chars() {
        match c {
            '/' | '\\' => out.push('-'),
            c if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') => out.push(c),
            _ => {}
        }
    }
    while out.contains("..") {
        out = out.replace("..", ".");
    }
    let cleaned = out.trim_matches(|c| c == '.' || c == '-');

    if cleaned.is_empty() {
        return Err(InvalidPackageName(name.to_string()));
    }
    Ok(cleaned.to_string())
}

/// Platforms to act on: the requested ones, else the configured default,
/// else those detected in the project, else Claude.
pub fn target_platforms(
    requested: &[Platform],
    default_platform: Option<Platform>,
    project_root: &Path,
) -> Vec<Platform> {
    if !requested.is_empty() {
        let mut platforms = requested.to_vec();
        platforms.sort();
        platforms.dedup();
        return platforms;
    }
    if let Some(platform) = default_platform {
        return vec![platform];
    }
    let detected = Platform::detect(project_root);
    if detected.is_empty() {
        vec![Platform::Claude]
    } else {
        detected
    }
}
