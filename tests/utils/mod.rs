use anyhow::Result;
use std::fs;
use std::path::Path;
use std::process::Command;

use super::common::TestEnvironment;

pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

/// Run the agentpkg binary with its config and cache redirected into `env`
pub fn run_agentpkg(env: &TestEnvironment, args: &[&str]) -> Result<CommandOutput> {
    let output = Command::new(env!("CARGO_BIN_EXE_agentpkg"))
        .args(args)
        .arg("--no-color")
        .current_dir(env.project())
        .env("HOME", env.home())
        .env("XDG_CONFIG_HOME", env.config_home())
        .env("XDG_CACHE_HOME", env.cache_home())
        .env("NO_COLOR", "1")
        .output()?;

    Ok(CommandOutput {
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        exit_code: output.status.code().unwrap_or(-1),
    })
}

/// Parse stdout as one JSON event per line
pub fn json_events(output: &CommandOutput) -> Vec<serde_json::Value> {
    output
        .stdout
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| serde_json::from_str(line).ok())
        .collect()
}

pub fn file_exists(path: &Path) -> bool {
    path.exists() && path.is_file()
}

pub fn read_file(path: &Path) -> Result<String> {
    Ok(fs::read_to_string(path)?)
}
