use anyhow::{Context, Result};
use colored::*;
use serde_json::json;
use std::path::PathBuf;

use crate::cli::{Commands, ConfigCommands, ProjectArgs};
use crate::common::config::AgentpkgConfig;
use crate::common::{http, paths, progress};
use crate::install::orchestrator::{InstallRequest, dry_resolve};
use crate::install::{Installer, Platform, classify, nothing_removed, target_platforms};
use crate::manifest::PackageType;
use crate::manifest::sources::{SourceChain, SourceContext};
use crate::registry::{RegistryClient, SearchOptions, SortOrder};
use crate::ui::prelude::*;

/// Run one command. `Ok(false)` means the command ran but did not succeed
/// (nothing installed, package not found) and the process should exit
/// non-zero.
pub async fn dispatch(command: Commands) -> Result<bool> {
    let config = AgentpkgConfig::load().context("Failed to load configuration")?;
    match command {
        Commands::Search {
            query,
            package_type,
            platform,
            sort,
            limit,
            offset,
        } => {
            let options = SearchOptions {
                query,
                package_type: package_type.map(|t| PackageType::from(t.as_str())),
                platform,
                sort,
                limit: Some(limit),
                offset,
            };
            handle_search(&config, options).await
        }
        Commands::Info { name } => handle_info(&config, &name).await,
        Commands::Install {
            name,
            platform,
            project,
        } => handle_install(&config, &name, &platform, &project).await,
        Commands::Uninstall {
            name,
            platform,
            project,
        } => handle_uninstall(&name, &platform, &project).await,
        Commands::List { platform, project } => handle_list(&config, platform, &project).await,
        Commands::Config { command } => handle_config(config, command).await,
    }
}

fn project_root(args: &ProjectArgs) -> Result<PathBuf> {
    match &args.project {
        Some(path) => Ok(path.clone()),
        None => std::env::current_dir().context("Failed to determine current directory"),
    }
}

fn source_context(config: &AgentpkgConfig) -> Result<SourceContext> {
    let client =
        http::build_client(config.request_timeout()).context("Failed to create HTTP client")?;
    Ok(SourceContext::from_config(config, client, None))
}

fn not_found(name: &str) -> Result<bool> {
    emit(
        Level::Error,
        "package.not_found",
        &format!("{} Package '{}' not found in the registry", char::from(NerdFont::Cross), name),
        Some(json!({ "package": name })),
    );
    Ok(false)
}

async fn handle_search(config: &AgentpkgConfig, options: SearchOptions) -> Result<bool> {
    let registry = RegistryClient::from_config(config)?;
    let spinner = progress::create_spinner("Searching registry...".to_string());
    let result = registry.search(&options).await;
    progress::finish_spinner(spinner);
    let result = result?;

    if result.packages.is_empty() {
        emit(
            Level::Info,
            "search.empty",
            &format!("{} No packages matched", char::from(NerdFont::Search)),
            Some(json!({ "total": 0 })),
        );
        return Ok(true);
    }

    for entry in &result.packages {
        let badge = if entry.official {
            " official".green().to_string()
        } else if entry.verified {
            " verified".cyan().to_string()
        } else {
            String::new()
        };
        let metric = match options.sort {
            SortOrder::Stars => format!("{} stars", entry.stars.unwrap_or(0)),
            _ => format!("{} downloads", entry.downloads),
        };
        emit(
            Level::Info,
            "search.result",
            &format!(
                "{} {} {} [{}]{} - {} ({})",
                char::from(NerdFont::Package),
                entry.name.bold(),
                entry.version.dimmed(),
                entry.package_type(),
                badge,
                entry.description,
                metric
            ),
            Some(serde_json::to_value(entry)?),
        );
    }
    separator();
    emit(
        Level::Info,
        "search.summary",
        &format!(
            "Showing {} of {} package(s)",
            result.packages.len(),
            result.total
        ),
        Some(json!({ "shown": result.packages.len(), "total": result.total })),
    );
    Ok(true)
}

async fn handle_info(config: &AgentpkgConfig, name: &str) -> Result<bool> {
    let registry = RegistryClient::from_config(config)?;
    let ctx = source_context(config)?;
    let scratch_root = paths::scratch_root_dir()?;
    let spinner = progress::create_spinner(format!("Resolving {name}..."));
    let resolved = dry_resolve(
        &registry,
        &SourceChain::standard(),
        &ctx,
        name,
        &scratch_root,
    )
    .await;
    progress::finish_spinner(spinner);

    let Some((entry, resolution)) = resolved? else {
        return not_found(name);
    };

    let manifest = &resolution.manifest;
    emit(
        Level::Info,
        "package.info",
        &format!(
            "{} {} {}\n  {}\n  type: {}  author: {}  downloads: {}\n  manifest: {} ({})",
            char::from(NerdFont::Package),
            entry.name.bold(),
            manifest.version,
            manifest.description,
            manifest.package_type,
            if entry.author.is_empty() { "-" } else { entry.author.as_str() },
            entry.downloads,
            resolution.source.name(),
            manifest.payload.kind()
        ),
        Some(json!({
            "entry": entry,
            "manifest": manifest,
            "source": resolution.source.name(),
            "attempts": resolution.attempts,
        })),
    );
    for attempt in &resolution.attempts {
        emit(
            Level::Debug,
            "package.info.attempt",
            &format!("  {} skipped: {}", attempt.source, attempt.reason),
            None,
        );
    }
    Ok(true)
}

async fn handle_install(
    config: &AgentpkgConfig,
    name: &str,
    requested: &[Platform],
    project: &ProjectArgs,
) -> Result<bool> {
    let root = project_root(project)?;
    let request = InstallRequest {
        platforms: target_platforms(requested, config.default_platform, &root),
        project_root: root,
        scratch_root: paths::scratch_root_dir()?,
    };
    let registry = RegistryClient::from_config(config)?;
    let ctx = source_context(config)?;

    let spinner = progress::create_spinner(format!("Installing {name}..."));
    let outcome = Installer::new()
        .install_from_registry(&registry, &SourceChain::standard(), &ctx, name, &request)
        .await;
    progress::finish_spinner(spinner);

    let Some(install) = outcome? else {
        return not_found(name);
    };

    let (succeeded, failed) = classify(&install.results);
    for result in &succeeded {
        emit(
            Level::Success,
            "install.success",
            &format!(
                "{} Installed {}@{} for {} ({} file(s))",
                char::from(NerdFont::Check),
                install.manifest.name,
                install.manifest.version,
                result.platform,
                result.paths.len()
            ),
            Some(serde_json::to_value(result)?),
        );
        for warning in &result.warnings {
            emit(
                Level::Warn,
                "install.warning",
                &format!("{} {}", char::from(NerdFont::Warning), warning),
                None,
            );
        }
    }
    for result in &failed {
        emit(
            Level::Error,
            "install.failed",
            &format!(
                "{} Failed to install {} for {}: {}",
                char::from(NerdFont::Cross),
                install.manifest.name,
                result.platform,
                result.error.as_deref().unwrap_or("unknown error")
            ),
            Some(serde_json::to_value(result)?),
        );
    }

    Ok(!succeeded.is_empty())
}

async fn handle_uninstall(name: &str, requested: &[Platform], project: &ProjectArgs) -> Result<bool> {
    let root = project_root(project)?;
    let platforms = if requested.is_empty() {
        Platform::ALL.to_vec()
    } else {
        requested.to_vec()
    };
    let results = Installer::new().uninstall(name, &root, &platforms).await?;

    if nothing_removed(&results) {
        emit(
            Level::Warn,
            "uninstall.not_found",
            &format!(
                "{} {} is not installed in {}",
                char::from(NerdFont::Warning),
                name,
                root.display()
            ),
            Some(json!({ "package": name })),
        );
        return Ok(false);
    }

    for result in results.iter().filter(|r| !r.paths.is_empty()) {
        emit(
            Level::Success,
            "uninstall.success",
            &format!(
                "{} Removed {} from {} ({} path(s))",
                char::from(NerdFont::Trash),
                name,
                result.platform,
                result.paths.len()
            ),
            Some(serde_json::to_value(result)?),
        );
    }
    Ok(true)
}

async fn handle_list(
    config: &AgentpkgConfig,
    platform: Option<Platform>,
    project: &ProjectArgs,
) -> Result<bool> {
    let root = project_root(project)?;
    let platforms = match platform {
        Some(p) => vec![p],
        None => target_platforms(&[], config.default_platform, &root),
    };

    let installer = Installer::new();
    let mut any = false;
    for platform in platforms {
        let packages = installer.list_installed(platform, &root).await?;
        for package in &packages {
            any = true;
            emit(
                Level::Info,
                "list.package",
                &format!(
                    "{} {} {} [{}] ({})",
                    char::from(NerdFont::List),
                    package.name.bold(),
                    package.version.as_deref().unwrap_or("-"),
                    package.package_type,
                    package.platform
                ),
                Some(serde_json::to_value(package)?),
            );
        }
    }
    if !any {
        emit(
            Level::Info,
            "list.empty",
            &format!(
                "{} No packages installed in {}",
                char::from(NerdFont::Info),
                root.display()
            ),
            None,
        );
    }
    Ok(true)
}

async fn handle_config(config: AgentpkgConfig, command: ConfigCommands) -> Result<bool> {
    match command {
        ConfigCommands::Show => {
            let path = AgentpkgConfig::config_path()?;
            emit(
                Level::Info,
                "config.show",
                &format!(
                    "{} {}\n{}",
                    char::from(NerdFont::Gear),
                    path.display(),
                    serde_json::to_string_pretty(&config)?
                ),
                Some(serde_json::to_value(&config)?),
            );
        }
        ConfigCommands::SetPlatform { platform } => {
            AgentpkgConfig::set_default_platform(Some(platform)).await?;
            emit(
                Level::Success,
                "config.platform_set",
                &format!(
                    "{} Default platform set to {}",
                    char::from(NerdFont::Check),
                    platform
                ),
                Some(json!({ "defaultPlatform": platform })),
            );
        }
        ConfigCommands::UnsetPlatform => {
            AgentpkgConfig::set_default_platform(None).await?;
            emit(
                Level::Success,
                "config.platform_unset",
                &format!("{} Default platform cleared", char::from(NerdFont::Check)),
                None,
            );
        }
    }
    Ok(true)
}
