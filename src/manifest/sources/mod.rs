//! Priority-ordered strategies that turn a registry entry into a manifest.

mod direct;
mod synthesis;
mod tarball;

pub use direct::{RepositoryRef, parse_repository, validate_relative_path};
pub use synthesis::{GENERIC_LAUNCHER, synthesize};

use serde::Serialize;
use serde_json::json;
use std::path::PathBuf;
use thiserror::Error;

use super::{ManifestError, PackageManifest};
use crate::common::config::AgentpkgConfig;
use crate::common::http::FetchError;
use crate::registry::RegistryEntry;
use crate::ui::prelude::*;

pub const DEFAULT_GIT_HOST_BASE: &str = "https://github.com";

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("refusing non-https archive url {0}")]
    InsecureUrl(String),

    #[error("unsafe package path `{0}`")]
    UnsafePath(String),

    #[error("no scratch directory available for archive download")]
    NoScratchDir,

    #[error("unsupported repository url {0}")]
    UnsupportedRepository(String),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("archive has no {} at its root", super::MANIFEST_FILE)]
    MissingManifest,

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error("extracting archive: {0:#}")]
    Extract(anyhow::Error),

    #[error("{path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Everything a source needs besides the entry itself
#[derive(Debug, Clone)]
pub struct SourceContext {
    pub client: reqwest::Client,
    pub raw_content_base: String,
    /// `owner/repo` of the shared package monorepo
    pub monorepo: String,
    pub monorepo_branch: String,
    pub git_host_base: String,
    /// Where archive sources download and extract; archive sources are
    /// unavailable without one.
    pub scratch_dir: Option<PathBuf>,
    pub max_archive_bytes: u64,
}

impl SourceContext {
    pub fn from_config(
        config: &AgentpkgConfig,
        client: reqwest::Client,
        scratch_dir: Option<PathBuf>,
    ) -> Self {
        Self {
            client,
            raw_content_base: config.raw_content_base.clone(),
            monorepo: config.monorepo.clone(),
            monorepo_branch: config.monorepo_branch.clone(),
            git_host_base: DEFAULT_GIT_HOST_BASE.to_string(),
            scratch_dir,
            max_archive_bytes: config.max_archive_bytes,
        }
    }
}

/// A manifest plus the directory holding the package's raw files, if any
#[derive(Debug, Clone)]
pub struct Resolved {
    pub manifest: PackageManifest,
    pub package_dir: Option<PathBuf>,
}

/// The fixed set of manifest sources
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestSource {
    /// Raw manifest document from the monorepo or a standalone repository
    DirectRepository,
    /// Archive of the entry's own repository
    StandaloneRepository,
    /// The entry's direct archive URL
    Archive,
    /// Built from the registry entry alone; never fails
    RegistrySynthesis,
}

impl ManifestSource {
    pub fn priority(self) -> u8 {
        match self {
            ManifestSource::DirectRepository | ManifestSource::StandaloneRepository => 1,
            ManifestSource::Archive => 2,
            ManifestSource::RegistrySynthesis => 4,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ManifestSource::DirectRepository => "direct-repository",
            ManifestSource::StandaloneRepository => "standalone-repository",
            ManifestSource::Archive => "archive",
            ManifestSource::RegistrySynthesis => "registry-synthesis",
        }
    }

    pub fn is_terminal(self) -> bool {
        self == ManifestSource::RegistrySynthesis
    }

    pub fn can_attempt(self, entry: &RegistryEntry) -> bool {
        match self {
            ManifestSource::DirectRepository => direct::can_attempt(entry),
            ManifestSource::StandaloneRepository => tarball::can_attempt_standalone(entry),
            ManifestSource::Archive => entry.tarball.is_some(),
            ManifestSource::RegistrySynthesis => true,
        }
    }

    pub async fn resolve(
        self,
        entry: &RegistryEntry,
        ctx: &SourceContext,
    ) -> Result<Option<Resolved>, SourceError> {
        match self {
            ManifestSource::DirectRepository => direct::resolve(entry, ctx).await,
            ManifestSource::StandaloneRepository => {
                tarball::resolve_standalone(entry, ctx, self.name()).await
            }
            ManifestSource::Archive => tarball::resolve_archive(entry, ctx, self.name()).await,
            ManifestSource::RegistrySynthesis => Ok(Some(Resolved {
                manifest: synthesize(entry),
                package_dir: None,
            })),
        }
    }
}

/// A source that was tried and produced nothing
#[derive(Debug, Clone, Serialize)]
pub struct FailedAttempt {
    pub source: &'static str,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct Resolution {
    pub manifest: PackageManifest,
    pub source: ManifestSource,
    pub package_dir: Option<PathBuf>,
    pub attempts: Vec<FailedAttempt>,
}

#[derive(Debug, Clone)]
pub struct SourceChain {
    sources: Vec<ManifestSource>,
}

impl SourceChain {
    /// Sort `sources` by priority (stable) and make sure the terminal
    /// synthesis source is last.
    pub fn new(mut sources: Vec<ManifestSource>) -> Self {
        sources.retain(|s| !s.is_terminal());
        sources.push(ManifestSource::RegistrySynthesis);
        sources.sort_by_key(|s| s.priority());
        Self { sources }
    }

    pub fn standard() -> Self {
        Self::new(vec![
            ManifestSource::DirectRepository,
            ManifestSource::StandaloneRepository,
            ManifestSource::Archive,
        ])
    }

    pub fn sources(&self) -> &[ManifestSource] {
        &self.sources
    }

    /// Try every eligible source in order and return the first manifest.
    /// Errors and empty results are treated alike.
    pub async fn resolve(&self, entry: &RegistryEntry, ctx: &SourceContext) -> Resolution {
        let mut attempts = Vec::new();

        for &source in &self.sources {
            if !source.can_attempt(entry) {
                continue;
            }
            let reason = match source.resolve(entry, ctx).await {
                Ok(Some(resolved)) => {
                    emit(
                        Level::Debug,
                        "source.resolved",
                        &format!(
                            "{} Manifest for {} from {}",
                            char::from(NerdFont::FileText),
                            entry.name,
                            source.name()
                        ),
                        None,
                    );
                    return Resolution {
                        manifest: resolved.manifest,
                        source,
                        package_dir: resolved.package_dir,
                        attempts,
                    };
                }
                Ok(None) => "no manifest".to_string(),
                Err(err) => err.to_string(),
            };
            emit(
                Level::Debug,
                "source.skipped",
                &format!(
                    "{} {} gave no manifest for {}: {}",
                    char::from(NerdFont::Info),
                    source.name(),
                    entry.name,
                    reason
                ),
                Some(json!({ "source": source.name(), "package": entry.name })),
            );
            attempts.push(FailedAttempt {
                source: source.name(),
                reason,
            });
        }

        Resolution {
            manifest: synthesize(entry),
            source: ManifestSource::RegistrySynthesis,
            package_dir: None,
            attempts,
        }
    }
}

#[cfg(test)]
pub(crate) fn test_context(scratch_dir: Option<PathBuf>) -> SourceContext {
    use std::time::Duration;
    SourceContext {
        client: crate::common::http::build_client(Duration::from_secs(5)).unwrap(),
        raw_content_base: "http://127.0.0.1:9".to_string(),
        monorepo: "agentpkg/registry".to_string(),
        monorepo_branch: "main".to_string(),
        git_host_base: DEFAULT_GIT_HOST_BASE.to_string(),
        scratch_dir,
        max_archive_bytes: 1024 * 1024,
    }
}
