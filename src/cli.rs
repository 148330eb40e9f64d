use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::install::Platform;
use crate::registry::SortOrder;
use crate::ui::OutputFormat;

/// Install rules, skills and MCP servers for AI coding assistants
#[derive(Parser, Debug)]
#[command(name = "agentpkg", author, version, about, long_about = None)]
pub struct Cli {
    /// Show debug events
    #[arg(short, long, global = true)]
    pub debug: bool,

    /// Output format
    #[arg(long, value_enum, global = true, default_value = "text")]
    pub output: OutputFormat,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Project selection shared by commands that touch installed files
#[derive(Args, Debug, Clone)]
pub struct ProjectArgs {
    /// Project root (defaults to the current directory)
    #[arg(long, value_name = "DIR")]
    pub project: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Search the registry
    Search {
        /// Text matched against name, description, author and keywords
        query: Option<String>,
        /// Only packages of this type (rules, skill, mcp)
        #[arg(long = "type", value_name = "TYPE")]
        package_type: Option<String>,
        /// Only packages that support this platform
        #[arg(long, value_enum)]
        platform: Option<Platform>,
        #[arg(long, value_enum, default_value = "downloads")]
        sort: SortOrder,
        #[arg(long, default_value_t = 20)]
        limit: usize,
        #[arg(long, default_value_t = 0)]
        offset: usize,
    },
    /// Show a package and where its manifest resolves from
    Info {
        name: String,
    },
    /// Install a package into the project
    Install {
        name: String,
        /// Target platforms (repeatable); defaults to the configured or detected ones
        #[arg(long, value_enum)]
        platform: Vec<Platform>,
        #[command(flatten)]
        project: ProjectArgs,
    },
    /// Remove a package from the project
    Uninstall {
        name: String,
        /// Only these platforms (repeatable); defaults to all
        #[arg(long, value_enum)]
        platform: Vec<Platform>,
        #[command(flatten)]
        project: ProjectArgs,
    },
    /// List packages installed in the project
    List {
        #[arg(long, value_enum)]
        platform: Option<Platform>,
        #[command(flatten)]
        project: ProjectArgs,
    },
    /// Show or change user configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Print the effective configuration
    Show,
    /// Set the platform used when none is given
    SetPlatform {
        #[arg(value_enum)]
        platform: Platform,
    },
    /// Clear the default platform
    UnsetPlatform,
}
