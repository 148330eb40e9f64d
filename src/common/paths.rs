use anyhow::{Context, Result};
use std::path::PathBuf;

/// Centralized path management for agentpkg

/// Get the main agentpkg config directory
pub fn agentpkg_config_dir() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .context("Unable to determine user config directory")?
        .join("agentpkg");

    std::fs::create_dir_all(&config_dir)
        .with_context(|| format!("creating config directory at {}", config_dir.display()))?;

    Ok(config_dir)
}

/// Get the agentpkg cache directory
pub fn agentpkg_cache_dir() -> Result<PathBuf> {
    let cache_dir = dirs::cache_dir()
        .unwrap_or_else(|| std::env::temp_dir().join(".cache"))
        .join("agentpkg");

    std::fs::create_dir_all(&cache_dir)
        .with_context(|| format!("creating cache directory at {}", cache_dir.display()))?;

    Ok(cache_dir)
}

/// Directory holding per-install scratch directories for downloaded archives
pub fn scratch_root_dir() -> Result<PathBuf> {
    let scratch = agentpkg_cache_dir()?.join("scratch");
    std::fs::create_dir_all(&scratch)
        .with_context(|| format!("creating scratch directory at {}", scratch.display()))?;
    Ok(scratch)
}

/// Path of the user configuration document
pub fn config_file_path() -> Result<PathBuf> {
    Ok(agentpkg_config_dir()?.join("config.json"))
}
