use anyhow::{Context, anyhow};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::handlers::{HandlerRegistry, InstallContext};
use super::metadata::InstalledPackage;
use super::{InstallError, InstallationResult, Platform, Stage, StageTracker, sanitize_package_name};
use crate::manifest::PackageManifest;
use crate::manifest::sources::{
    GENERIC_LAUNCHER, ManifestSource, Resolution, SourceChain, SourceContext,
};
use crate::registry::{RegistryClient, RegistryEntry};
use crate::ui::prelude::*;

/// Where and for which platforms a registry install should land
#[derive(Debug, Clone)]
pub struct InstallRequest {
    pub project_root: PathBuf,
    pub platforms: Vec<Platform>,
    /// Parent of the per-install scratch directory
    pub scratch_root: PathBuf,
}

/// Everything a registry install produced
#[derive(Debug)]
pub struct PackageInstall {
    pub entry: RegistryEntry,
    pub source: ManifestSource,
    pub manifest: PackageManifest,
    pub results: Vec<InstallationResult>,
}

/// Drives handlers across platforms
#[derive(Clone)]
pub struct Installer {
    handlers: Arc<HandlerRegistry>,
}

impl Default for Installer {
    fn default() -> Self {
        Self::new()
    }
}

fn unconfigured_launcher_warning(manifest: &PackageManifest, platform: Platform, root: &Path) -> String {
    format!(
        "{} was installed with a placeholder launcher; add its arguments under `mcpServers` in {}",
        manifest.name,
        platform.mcp_config_path(root).display()
    )
}

async fn install_on(
    handlers: Arc<HandlerRegistry>,
    manifest: Arc<PackageManifest>,
    ctx: InstallContext,
) -> InstallationResult {
    let platform = ctx.platform;
    let Some(handler) = handlers.select(&manifest) else {
        let mut result = InstallationResult::succeeded(platform, Vec::new());
        result
            .warnings
            .push(format!("{} has no installable content", manifest.name));
        return result;
    };

    match handler.install(&manifest, &ctx).await {
        Ok(paths) => {
            let mut result = InstallationResult::succeeded(platform, paths);
            if manifest.needs_service_configuration() {
                result.warnings.push(unconfigured_launcher_warning(
                    &manifest,
                    platform,
                    &ctx.project_root,
                ));
            }
            result
        }
        Err(err) => InstallationResult::failed(platform, &InstallError::new(Stage::Writing, err)),
    }
}

impl Installer {
    pub fn new() -> Self {
        Self {
            handlers: Arc::new(HandlerRegistry::new()),
        }
    }

    /// Install `manifest` for every platform concurrently. Failures are
    /// reported per platform and never abort the others.
    pub async fn install(
        &self,
        manifest: &PackageManifest,
        project_root: &Path,
        scratch_dir: Option<&Path>,
        platforms: &[Platform],
    ) -> Vec<InstallationResult> {
        let manifest = Arc::new(manifest.clone());
        let mut handles = Vec::new();

        for &platform in platforms {
            let ctx = InstallContext {
                project_root: project_root.to_path_buf(),
                platform,
                scratch_dir: scratch_dir.map(Path::to_path_buf),
            };
            let handlers = Arc::clone(&self.handlers);
            let manifest = Arc::clone(&manifest);
            handles.push((platform, tokio::spawn(install_on(handlers, manifest, ctx))));
        }

        let mut results = Vec::new();
        for (platform, handle) in handles {
            let result = match handle.await {
                Ok(result) => result,
                Err(join_err) => InstallationResult::failed(
                    platform,
                    &InstallError::new(Stage::Writing, anyhow!("install task failed: {join_err}")),
                ),
            };
            report(&manifest.name, &result, "install");
            results.push(result);
        }
        results
    }

    /// Best-effort removal from every platform in `platforms`. An empty
    /// aggregate path list means the package was not found.
    pub async fn uninstall(
        &self,
        name: &str,
        project_root: &Path,
        platforms: &[Platform],
    ) -> anyhow::Result<Vec<InstallationResult>> {
        let key = sanitize_package_name(name)?;
        let mut results = Vec::new();

        for &platform in platforms {
            let ctx = InstallContext {
                project_root: project_root.to_path_buf(),
                platform,
                scratch_dir: None,
            };
            let mut result = InstallationResult::succeeded(platform, Vec::new());
            for handler in self.handlers.all() {
                match handler.uninstall(&key, &ctx).await {
                    Ok(paths) => result.paths.extend(paths),
                    Err(err) => {
                        emit(
                            Level::Warn,
                            "uninstall.partial",
                            &format!(
                                "{} Could not remove {} {} for {}: {:#}",
                                char::from(NerdFont::Warning),
                                handler.id(),
                                name,
                                platform,
                                err
                            ),
                            Some(json!({ "package": name, "platform": platform, "handler": handler.id() })),
                        );
                        result.warnings.push(format!("{}: {:#}", handler.id(), err));
                    }
                }
            }
            report(name, &result, "uninstall");
            results.push(result);
        }

        Ok(results)
    }

    pub async fn list_installed(
        &self,
        platform: Platform,
        project_root: &Path,
    ) -> anyhow::Result<Vec<InstalledPackage>> {
        let ctx = InstallContext {
            project_root: project_root.to_path_buf(),
            platform,
            scratch_dir: None,
        };
        let mut packages = Vec::new();
        for handler in self.handlers.all() {
            packages.extend(
                handler
                    .list(&ctx)
                    .await
                    .with_context(|| format!("listing {} packages for {}", handler.id(), platform))?,
            );
        }
        packages.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(packages)
    }

    /// Look `name` up in the registry, resolve its manifest and install it.
    /// `Ok(None)` means the registry has no such package.
    pub async fn install_from_registry(
        &self,
        registry: &RegistryClient,
        chain: &SourceChain,
        source_ctx: &SourceContext,
        name: &str,
        request: &InstallRequest,
    ) -> Result<Option<PackageInstall>, InstallError> {
        let mut stage = StageTracker::new(name);

        let Some(entry) = registry
            .get_package(name)
            .await
            .map_err(|e| stage.fail(e))?
        else {
            return Ok(None);
        };

        stage.enter(Stage::Fetching);
        std::fs::create_dir_all(&request.scratch_root)
            .with_context(|| format!("creating {}", request.scratch_root.display()))
            .map_err(|e| stage.fail(e))?;
        let scratch = tempfile::Builder::new()
            .prefix("install-")
            .tempdir_in(&request.scratch_root)
            .context("creating scratch directory")
            .map_err(|e| stage.fail(e))?;
        let mut ctx = source_ctx.clone();
        ctx.scratch_dir = Some(scratch.path().to_path_buf());
        let resolution = chain.resolve(&entry, &ctx).await;

        if let Some(dir) = &resolution.package_dir {
            stage.enter(Stage::Extracting);
            if !dir.is_dir() {
                return Err(stage.fail(anyhow!(
                    "extracted package directory {} is missing",
                    dir.display()
                )));
            }
        }

        if resolution.manifest.needs_service_configuration() {
            emit(
                Level::Warn,
                "install.unconfigured_service",
                &format!(
                    "{} {} has no published launcher; a placeholder `{}` entry will be written",
                    char::from(NerdFont::Warning),
                    entry.name,
                    GENERIC_LAUNCHER
                ),
                Some(json!({ "package": entry.name })),
            );
        }

        stage.enter(Stage::Writing);
        let results = self
            .install(
                &resolution.manifest,
                &request.project_root,
                resolution.package_dir.as_deref(),
                &request.platforms,
            )
            .await;
        stage.enter(Stage::Done);

        Ok(Some(PackageInstall {
            entry,
            source: resolution.source,
            manifest: resolution.manifest,
            results,
        }))
    }
}

/// Resolve a package's manifest without installing it, in a throwaway
/// directory under `scratch_root`.
pub async fn dry_resolve(
    registry: &RegistryClient,
    chain: &SourceChain,
    source_ctx: &SourceContext,
    name: &str,
    scratch_root: &Path,
) -> anyhow::Result<Option<(RegistryEntry, Resolution)>> {
    let Some(entry) = registry.get_package(name).await? else {
        return Ok(None);
    };
    std::fs::create_dir_all(scratch_root)
        .with_context(|| format!("creating {}", scratch_root.display()))?;
    let scratch = tempfile::Builder::new()
        .prefix("info-")
        .tempdir_in(scratch_root)
        .context("creating scratch directory")?;
    let mut ctx = source_ctx.clone();
    ctx.scratch_dir = Some(scratch.path().to_path_buf());
    let resolution = chain.resolve(&entry, &ctx).await;
    Ok(Some((entry, resolution)))
}

fn report(name: &str, result: &InstallationResult, action: &str) {
    let data = json!({
        "package": name,
        "platform": result.platform,
        "success": result.success,
        "paths": result.paths,
        "error": result.error,
        "stage": result.failed_stage,
    });
    if result.success {
        emit(
            Level::Debug,
            &format!("{action}.platform_done"),
            &format!(
                "{} {} {} for {} ({} path(s))",
                char::from(NerdFont::Check),
                action,
                name,
                result.platform,
                result.paths.len()
            ),
            Some(data),
        );
    } else {
        emit(
            Level::Warn,
            &format!("{action}.platform_failed"),
            &format!(
                "{} {} {} for {} failed: {}",
                char::from(NerdFont::Cross),
                action,
                name,
                result.platform,
                result.error.as_deref().unwrap_or("unknown error")
            ),
            Some(data),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::install::{classify, nothing_removed};
    use crate::manifest::sources::test_context;
    use crate::manifest::{ManifestOrigin, McpPayload, PackageType, Payload, RulesPayload};
    use crate::registry::{RegistryIndex, entry};
    use crate::test_support::FixtureServer;
    use std::collections::BTreeMap;
    use std::fs;
    use std::time::Duration;
    use tempfile::TempDir;

    fn manifest(package_type: PackageType, payload: Payload) -> PackageManifest {
        PackageManifest {
            name: "@acme/thing".into(),
            version: "1.0.0".into(),
            description: "A thing".into(),
            package_type,
            author: None,
            repository: None,
            license: None,
            keywords: Vec::new(),
            payload,
            origin: ManifestOrigin::Repository,
        }
    }

    fn rules_payload() -> Payload {
        Payload::Rules(RulesPayload {
            text: "Keep functions small.".into(),
            globs: Vec::new(),
            always_apply: true,
        })
    }

    #[tokio::test]
    async fn installs_on_every_platform() {
        let root = TempDir::new().unwrap();
        let results = Installer::new()
            .install(
                &manifest(PackageType::Rules, rules_payload()),
                root.path(),
                None,
                &Platform::ALL,
            )
            .await;

        let (ok, failed) = classify(&results);
        assert_eq!(ok.len(), 3);
        assert!(failed.is_empty());
        assert!(root.path().join(".claude/rules/acme-thing/rule.md").is_file());
        assert!(root.path().join(".cursor/rules/acme-thing/rule.mdc").is_file());
        assert!(root.path().join(".windsurf/rules/acme-thing/rule.md").is_file());
    }

    #[tokio::test]
    async fn unknown_type_with_rules_content_falls_back_to_rules() {
        let root = TempDir::new().unwrap();
        let results = Installer::new()
            .install(
                &manifest(PackageType::Other("agent".into()), rules_payload()),
                root.path(),
                None,
                &[Platform::Claude],
            )
            .await;
        assert!(results[0].success);
        assert!(
            results[0]
                .paths
                .contains(&root.path().join(".claude/rules/acme-thing/rule.md"))
        );
    }

    #[tokio::test]
    async fn unknown_type_without_content_writes_nothing() {
        let root = TempDir::new().unwrap();
        let results = Installer::new()
            .install(
                &manifest(PackageType::Other("agent".into()), Payload::Empty),
                root.path(),
                None,
                &[Platform::Cursor],
            )
            .await;
        assert!(results[0].success);
        assert!(results[0].paths.is_empty());
        assert_eq!(fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn one_platform_failing_does_not_stop_others() {
        let root = TempDir::new().unwrap();
        // A file where Cursor's marker directory should be
        fs::write(root.path().join(".cursor"), "blocked").unwrap();

        let results = Installer::new()
            .install(
                &manifest(PackageType::Rules, rules_payload()),
                root.path(),
                None,
                &[Platform::Claude, Platform::Cursor],
            )
            .await;
        let (ok, failed) = classify(&results);
        assert_eq!(ok.len(), 1);
        assert_eq!(ok[0].platform, Platform::Claude);
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].platform, Platform::Cursor);
        assert_eq!(failed[0].failed_stage, Some(Stage::Writing));
        assert!(failed[0].error.is_some());
    }

    #[tokio::test]
    async fn uninstall_of_unknown_package_is_not_found() {
        let root = TempDir::new().unwrap();
        let results = Installer::new()
            .uninstall("@nobody/nothing", root.path(), &Platform::ALL)
            .await
            .unwrap();
        assert_eq!(results.len(), 3);
        assert!(nothing_removed(&results));
    }

    #[tokio::test]
    async fn uninstall_removes_every_kind() {
        let root = TempDir::new().unwrap();
        let installer = Installer::new();
        installer
            .install(
                &manifest(PackageType::Rules, rules_payload()),
                root.path(),
                None,
                &[Platform::Claude],
            )
            .await;
        let mcp = manifest(
            PackageType::Mcp,
            Payload::Mcp(McpPayload {
                transport: None,
                command: "node".into(),
                args: vec!["server.js".into()],
                env: BTreeMap::new(),
            }),
        );
        installer
            .install(&mcp, root.path(), None, &[Platform::Claude])
            .await;

        let listed = installer
            .list_installed(Platform::Claude, root.path())
            .await
            .unwrap();
        assert_eq!(listed.len(), 2);

        let results = installer
            .uninstall("@acme/thing", root.path(), &[Platform::Claude])
            .await
            .unwrap();
        assert_eq!(results[0].paths.len(), 2);
        assert!(!root.path().join(".claude/rules/acme-thing").exists());
        assert!(
            installer
                .list_installed(Platform::Claude, root.path())
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn synthesized_service_install_carries_a_warning() {
        let server = FixtureServer::start()
            .route(
                "/index.json",
                200,
                serde_json::to_vec(&RegistryIndex {
                    packages: vec![{
                        let mut e = entry("@scope/foo");
                        e.declared_type = Some("mcp".into());
                        e
                    }],
                })
                .unwrap(),
            )
            .spawn()
            .await;
        let registry = RegistryClient::new(
            crate::common::http::build_client(Duration::from_secs(5)).unwrap(),
            server.url("/index.json"),
            Duration::from_secs(60),
        );
        let root = TempDir::new().unwrap();
        let scratch_root = TempDir::new().unwrap();
        let request = InstallRequest {
            project_root: root.path().to_path_buf(),
            platforms: vec![Platform::Claude],
            scratch_root: scratch_root.path().to_path_buf(),
        };

        let install = Installer::new()
            .install_from_registry(
                &registry,
                &SourceChain::standard(),
                &test_context(None),
                "@scope/foo",
                &request,
            )
            .await
            .unwrap()
            .unwrap();

        assert_eq!(install.source, ManifestSource::RegistrySynthesis);
        assert!(install.results[0].success);
        assert_eq!(install.results[0].warnings.len(), 1);
        assert!(root.path().join(".mcp.json").is_file());
        assert_eq!(fs::read_dir(scratch_root.path()).unwrap().count(), 0);

        let missing = Installer::new()
            .install_from_registry(
                &registry,
                &SourceChain::standard(),
                &test_context(None),
                "@scope/absent",
                &request,
            )
            .await
            .unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn dry_resolve_works_inside_the_scratch_root() {
        let server = FixtureServer::start()
            .route(
                "/index.json",
                200,
                serde_json::to_vec(&RegistryIndex {
                    packages: vec![entry("plain")],
                })
                .unwrap(),
            )
            .spawn()
            .await;
        let registry = RegistryClient::new(
            crate::common::http::build_client(Duration::from_secs(5)).unwrap(),
            server.url("/index.json"),
            Duration::from_secs(60),
        );
        let base = TempDir::new().unwrap();
        let scratch_root = base.path().join("cache").join("scratch");

        let (found, resolution) = dry_resolve(
            &registry,
            &SourceChain::standard(),
            &test_context(None),
            "plain",
            &scratch_root,
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(found.name, "plain");
        assert_eq!(resolution.source, ManifestSource::RegistrySynthesis);
        assert!(scratch_root.is_dir());
        assert_eq!(fs::read_dir(&scratch_root).unwrap().count(), 0);

        // A scratch root that cannot be created fails instead of falling back
        let blocker = base.path().join("file");
        fs::write(&blocker, "x").unwrap();
        assert!(
            dry_resolve(
                &registry,
                &SourceChain::standard(),
                &test_context(None),
                "plain",
                &blocker.join("scratch"),
            )
            .await
            .is_err()
        );
    }
}
