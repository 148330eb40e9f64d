use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::json;
use std::cmp::Ordering;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use super::{RegistryEntry, RegistryIndex};
use crate::common::config::AgentpkgConfig;
use crate::common::http;
use crate::install::platform::Platform;
use crate::manifest::PackageType;
use crate::ui::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum SortOrder {
    #[default]
    Downloads,
    Stars,
    Name,
    Recent,
}

#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    pub query: Option<String>,
    pub package_type: Option<PackageType>,
    pub platform: Option<Platform>,
    pub sort: SortOrder,
    pub limit: Option<usize>,
    pub offset: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub packages: Vec<RegistryEntry>,
    /// Matches before pagination
    pub total: usize,
}

struct CachedIndex {
    fetched_at: Instant,
    index: Arc<RegistryIndex>,
}

/// Fetches the registry index and keeps it for a fixed time-to-live.
pub struct RegistryClient {
    client: reqwest::Client,
    index_url: String,
    ttl: Duration,
    cache: Mutex<Option<CachedIndex>>,
}

impl RegistryClient {
    pub fn new(client: reqwest::Client, index_url: impl Into<String>, ttl: Duration) -> Self {
        Self {
            client,
            index_url: index_url.into(),
            ttl,
            cache: Mutex::new(None),
        }
    }

    pub fn from_config(config: &AgentpkgConfig) -> Result<Self> {
        let client =
            http::build_client(config.request_timeout()).context("Failed to create HTTP client")?;
        Ok(Self::new(client, config.registry_url.clone(), config.cache_ttl()))
    }

    fn cached(&self) -> Option<(bool, Arc<RegistryIndex>)> {
        let cache = self.cache.lock().ok()?;
        cache
            .as_ref()
            .map(|c| (c.fetched_at.elapsed() < self.ttl, Arc::clone(&c.index)))
    }

    /// The index, from cache while fresh. A failed refresh falls back to a
    /// stale copy when one exists.
    pub async fn index(&self) -> Result<Arc<RegistryIndex>> {
        let cached = self.cached();
        if let Some((true, index)) = &cached {
            return Ok(Arc::clone(index));
        }

        match http::fetch_json::<RegistryIndex>(&self.client, &self.index_url).await {
            Ok(index) => {
                let index = Arc::new(index);
                if let Ok(mut cache) = self.cache.lock() {
                    *cache = Some(CachedIndex {
                        fetched_at: Instant::now(),
                        index: Arc::clone(&index),
                    });
                }
                emit(
                    Level::Debug,
                    "registry.fetched",
                    &format!(
                        "{} Loaded {} package(s) from {}",
                        char::from(NerdFont::Globe),
                        index.packages.len(),
                        self.index_url
                    ),
                    None,
                );
                Ok(index)
            }
            Err(err) => match cached {
                Some((_, stale)) => {
                    emit(
                        Level::Warn,
                        "registry.stale",
                        &format!(
                            "{} Registry unreachable, using cached index: {}",
                            char::from(NerdFont::Warning),
                            err
                        ),
                        Some(json!({ "url": self.index_url })),
                    );
                    Ok(stale)
                }
                None => Err(anyhow::Error::new(err).context("Failed to load registry index")),
            },
        }
    }

    pub fn invalidate(&self) {
        if let Ok(mut cache) = self.cache.lock() {
            *cache = None;
        }
    }

    pub async fn search(&self, options: &SearchOptions) -> Result<SearchResult> {
        let index = self.index().await?;
        Ok(search_entries(&index, options))
    }

    /// Exact name match, falling back to a case-insensitive one
    pub async fn get_package(&self, name: &str) -> Result<Option<RegistryEntry>> {
        let index = self.index().await?;
        let found = index
            .packages
            .iter()
            .find(|p| p.name == name)
            .or_else(|| index.packages.iter().find(|p| p.name.eq_ignore_ascii_case(name)))
            .cloned();
        Ok(found)
    }
}

fn matches_query(entry: &RegistryEntry, query: &str) -> bool {
    entry.name.to_lowercase().contains(query)
        || entry.description.to_lowercase().contains(query)
        || entry.author.to_lowercase().contains(query)
        || entry.keywords.iter().any(|k| k.to_lowercase().contains(query))
}

fn trust_rank(entry: &RegistryEntry) -> u8 {
    u8::from(entry.official) * 2 + u8::from(entry.verified)
}

fn compare(a: &RegistryEntry, b: &RegistryEntry, sort: SortOrder) -> Ordering {
    let primary = match sort {
        SortOrder::Downloads => b.downloads.cmp(&a.downloads),
        SortOrder::Stars => b.stars.unwrap_or(0).cmp(&a.stars.unwrap_or(0)),
        SortOrder::Name => a.name.to_lowercase().cmp(&b.name.to_lowercase()),
        SortOrder::Recent => b.published().cmp(&a.published()),
    };
    primary
        .then_with(|| trust_rank(b).cmp(&trust_rank(a)))
        .then_with(|| a.name.cmp(&b.name))
}

/// Filter, sort and paginate index entries
pub fn search_entries(index: &RegistryIndex, options: &SearchOptions) -> SearchResult {
    let query = options
        .query
        .as_deref()
        .map(|q| q.trim().to_lowercase())
        .filter(|q| !q.is_empty());

    let mut matches: Vec<&RegistryEntry> = index
        .packages
        .iter()
        .filter(|e| query.as_deref().is_none_or(|q| matches_query(e, q)))
        .filter(|e| {
            options
                .package_type
                .as_ref()
                .is_none_or(|t| &e.package_type() == t)
        })
        .filter(|e| options.platform.is_none_or(|p| e.supports(p)))
        .collect();

    matches.sort_by(|a, b| compare(a, b, options.sort));

    let total = matches.len();
    let packages = matches
        .into_iter()
        .skip(options.offset)
        .take(options.limit.unwrap_or(usize::MAX))
        .cloned()
        .collect();

    SearchResult { packages, total }
}
