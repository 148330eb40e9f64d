//! Type-specific installers.

mod mcp;
mod rules;
mod skill;

pub use mcp::{McpConfigDocument, McpHandler, McpServerEntry};
pub use rules::RulesHandler;
pub use skill::SkillHandler;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use super::Platform;
use super::metadata::InstalledPackage;
use crate::archive::resolve_within;
use crate::manifest::{MANIFEST_FILE, PackageManifest, PackageType, Payload};

/// Where a handler writes for one platform
#[derive(Debug, Clone)]
pub struct InstallContext {
    pub project_root: PathBuf,
    pub platform: Platform,
    /// Extracted package files to copy alongside the generated ones
    pub scratch_dir: Option<PathBuf>,
}

#[async_trait]
pub trait PackageHandler: Send + Sync {
    fn id(&self) -> &'static str;

    /// Write the package; returns every path written
    async fn install(&self, manifest: &PackageManifest, ctx: &InstallContext)
    -> Result<Vec<PathBuf>>;

    /// Remove the package if present; returns the paths removed
    async fn uninstall(&self, sanitized_name: &str, ctx: &InstallContext) -> Result<Vec<PathBuf>>;

    /// Packages of this kind currently installed for `ctx.platform`
    async fn list(&self, ctx: &InstallContext) -> Result<Vec<InstalledPackage>>;
}

pub type HandlerFactory = fn() -> Box<dyn PackageHandler>;

pub struct HandlerRegistry {
    handlers: HashMap<&'static str, HandlerFactory>,
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HandlerRegistry {
    pub fn new() -> Self {
        let mut registry = HandlerRegistry {
            handlers: HashMap::new(),
        };

        registry.register::<RulesHandler>("rules");
        registry.register::<SkillHandler>("skill");
        registry.register::<McpHandler>("mcp");

        registry
    }

    fn register<T: PackageHandler + Default + 'static>(&mut self, id: &'static str) {
        self.handlers.insert(id, || Box::new(T::default()));
    }

    pub fn has_handler(&self, package_type: &PackageType) -> bool {
        self.handlers.contains_key(package_type.as_str())
    }

    pub fn get_handler(&self, package_type: &PackageType) -> Result<Box<dyn PackageHandler>> {
        self.handlers
            .get(package_type.as_str())
            .map(|factory| factory())
            .ok_or_else(|| anyhow!("no handler registered for package type `{}`", package_type))
    }

    /// Handler chosen by which payload is present; `None` for an empty one
    pub fn handler_for_payload(&self, payload: &Payload) -> Option<Box<dyn PackageHandler>> {
        let id = match payload {
            Payload::Rules(_) => "rules",
            Payload::Skill(_) => "skill",
            Payload::Mcp(_) => "mcp",
            Payload::Empty => return None,
        };
        self.handlers.get(id).map(|factory| factory())
    }

    /// Declared type first, then the payload variant
    pub fn select(&self, manifest: &PackageManifest) -> Option<Box<dyn PackageHandler>> {
        if self.has_handler(&manifest.package_type) {
            return self.get_handler(&manifest.package_type).ok();
        }
        self.handler_for_payload(&manifest.payload)
    }

    pub fn all(&self) -> Vec<Box<dyn PackageHandler>> {
        let mut ids: Vec<_> = self.handlers.keys().copied().collect();
        ids.sort_unstable();
        ids.into_iter()
            .filter_map(|id| self.handlers.get(id).map(|factory| factory()))
            .collect()
    }
}

/// Copy the package's extra files from `source` into `dest`, skipping the
/// manifest document, links and anything that would land outside `dest`.
pub(crate) fn copy_package_files(source: &Path, dest: &Path) -> Result<Vec<PathBuf>> {
    let mut written = Vec::new();
    if !source.is_dir() {
        return Ok(written);
    }

    for entry in WalkDir::new(source).min_depth(1).follow_links(false) {
        let entry = entry.with_context(|| format!("walking {}", source.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(source)
            .with_context(|| format!("relativizing {}", entry.path().display()))?;
        if relative == Path::new(MANIFEST_FILE) {
            continue;
        }
        let Some(target) = resolve_within(dest, relative) else {
            continue;
        };
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        fs::copy(entry.path(), &target)
            .with_context(|| format!("copying {} to {}", entry.path().display(), target.display()))?;
        written.push(target);
    }

    Ok(written)
}

/// YAML front matter block followed by `body`
pub(crate) fn with_front_matter(fields: &[(&str, String)], body: &str) -> String {
    let mut out = String::from("---\n");
    for (key, value) in fields {
        out.push_str(key);
        out.push_str(": ");
        out.push_str(value);
        out.push('\n');
    }
    out.push_str("---\n\n");
    out.push_str(body.trim_end());
    out.push('\n');
    out
}

/// Quote a scalar for front matter
pub(crate) fn yaml_scalar(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| format!("\"{}\"", value))
}

/// Remove `dir` if it exists; returns it when something was removed
pub(crate) fn remove_package_dir(dir: &Path) -> Result<Option<PathBuf>> {
    if !dir.exists() {
        return Ok(None);
    }
    fs::remove_dir_all(dir).with_context(|| format!("removing {}", dir.display()))?;
    Ok(Some(dir.to_path_buf()))
}

/// Package directories under `parent`, sorted by name
pub(crate) fn package_dirs(parent: &Path) -> Result<Vec<PathBuf>> {
    if !parent.is_dir() {
        return Ok(Vec::new());
    }
    let mut dirs = Vec::new();
    for entry in fs::read_dir(parent).with_context(|| format!("reading {}", parent.display()))? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            dirs.push(entry.path());
        }
    }
    dirs.sort();
    Ok(dirs)
}
