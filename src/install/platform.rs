use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// An AI coding assistant that packages can be installed for
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Claude,
    Cursor,
    Windsurf,
}

impl Platform {
    pub const ALL: [Platform; 3] = [Platform::Claude, Platform::Cursor, Platform::Windsurf];

    pub fn id(self) -> &'static str {
        match self {
            Platform::Claude => "claude",
            Platform::Cursor => "cursor",
            Platform::Windsurf => "windsurf",
        }
    }

    /// Directory whose presence in a project marks the platform as in use
    pub fn marker_dir(self) -> &'static str {
        match self {
            Platform::Claude => ".claude",
            Platform::Cursor => ".cursor",
            Platform::Windsurf => ".windsurf",
        }
    }

    pub fn rules_dir(self, project_root: &Path) -> PathBuf {
        project_root.join(self.marker_dir()).join("rules")
    }

    pub fn skills_dir(self, project_root: &Path) -> PathBuf {
        let leaf = match self {
            Platform::Claude => "skills",
            Platform::Cursor => "commands",
            Platform::Windsurf => "workflows",
        };
        project_root.join(self.marker_dir()).join(leaf)
    }

    /// Shared MCP server configuration document
    pub fn mcp_config_path(self, project_root: &Path) -> PathBuf {
        match self {
            Platform::Claude => project_root.join(".mcp.json"),
            Platform::Cursor => project_root.join(".cursor").join("mcp.json"),
            Platform::Windsurf => project_root.join(".windsurf").join("mcp_config.json"),
        }
    }

    pub fn rule_file_name(self) -> &'static str {
        match self {
            Platform::Cursor => "rule.mdc",
            Platform::Claude | Platform::Windsurf => "rule.md",
        }
    }

    /// Platforms whose marker directory exists under `project_root`
    pub fn detect(project_root: &Path) -> Vec<Platform> {
        Self::ALL
            .into_iter()
            .filter(|p| project_root.join(p.marker_dir()).is_dir())
            .collect()
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl std::str::FromStr for Platform {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|p| p.id().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| anyhow::anyhow!("Unknown platform: {}", s))
    }
}
