use anyhow::Result;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Isolated home, config, cache and project directories for one test
pub struct TestEnvironment {
    temp_dir: TempDir,
}

impl TestEnvironment {
    pub fn new() -> Result<Self> {
        let temp_dir = tempfile::tempdir()?;
        for dir in ["home", "config", "cache", "project"] {
            fs::create_dir_all(temp_dir.path().join(dir))?;
        }
        Ok(Self { temp_dir })
    }

    pub fn home(&self) -> PathBuf {
        self.temp_dir.path().join("home")
    }

    pub fn config_home(&self) -> PathBuf {
        self.temp_dir.path().join("config")
    }

    pub fn cache_home(&self) -> PathBuf {
        self.temp_dir.path().join("cache")
    }

    pub fn project(&self) -> PathBuf {
        self.temp_dir.path().join("project")
    }

    pub fn config_file(&self) -> PathBuf {
        self.config_home().join("agentpkg").join("config.json")
    }

    /// Write the user config document
    pub fn write_config(&self, json: &str) -> Result<()> {
        let path = self.config_file();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, json)?;
        Ok(())
    }

    /// Create a file under the project root, including parent directories
    pub fn project_file(&self, relative: &str, content: &str) -> Result<PathBuf> {
        let path = self.project().join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, content)?;
        Ok(path)
    }

    #[allow(dead_code)]
    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }
}
