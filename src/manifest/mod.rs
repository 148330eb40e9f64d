//! Package manifests: the validated description of what a package installs.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

pub mod sources;

/// File name of the manifest document at a package root
pub const MANIFEST_FILE: &str = "agentpkg.yaml";

/// Declared content type of a package
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PackageType {
    Rules,
    Skill,
    Mcp,
    Other(String),
}

impl PackageType {
    pub fn as_str(&self) -> &str {
        match self {
            PackageType::Rules => "rules",
            PackageType::Skill => "skill",
            PackageType::Mcp => "mcp",
            PackageType::Other(other) => other,
        }
    }
}

impl From<&str> for PackageType {
    fn from(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "rules" | "rule" => PackageType::Rules,
            "skill" | "skills" => PackageType::Skill,
            "mcp" => PackageType::Mcp,
            other => PackageType::Other(other.to_string()),
        }
    }
}

impl From<String> for PackageType {
    fn from(value: String) -> Self {
        PackageType::from(value.as_str())
    }
}

impl From<PackageType> for String {
    fn from(value: PackageType) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for PackageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a manifest came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ManifestOrigin {
    Repository,
    Archive,
    Registry,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RulesPayload {
    pub text: String,
    pub globs: Vec<String>,
    pub always_apply: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkillPayload {
    /// Slash command, always starting with `/`
    pub command: String,
    pub description: String,
    pub prompt: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct McpPayload {
    pub transport: Option<String>,
    pub command: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
}

/// The single installable payload of a manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Payload {
    Rules(RulesPayload),
    Skill(SkillPayload),
    Mcp(McpPayload),
    Empty,
}

impl Payload {
    pub fn kind(&self) -> &'static str {
        match self {
            Payload::Rules(_) => "rules",
            Payload::Skill(_) => "skill",
            Payload::Mcp(_) => "mcp",
            Payload::Empty => "empty",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageManifest {
    pub name: String,
    pub version: String,
    pub description: String,
    #[serde(rename = "type")]
    pub package_type: PackageType,
    pub author: Option<String>,
    pub repository: Option<String>,
    pub license: Option<String>,
    pub keywords: Vec<String>,
    pub payload: Payload,
    pub origin: ManifestOrigin,
}

impl PackageManifest {
    /// True for service manifests synthesized without a real launcher
    pub fn needs_service_configuration(&self) -> bool {
        matches!(&self.payload, Payload::Mcp(mcp) if mcp.args.is_empty())
            && self.origin == ManifestOrigin::Registry
    }
}

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("invalid manifest document: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("manifest is missing required field `{0}`")]
    MissingField(&'static str),

    #[error("manifest declares more than one payload section")]
    MultiplePayloads,

    #[error("manifest of type `{declared}` carries a `{found}` payload")]
    PayloadMismatch { declared: String, found: &'static str },

    #[error("mcp section has an empty command")]
    EmptyCommand,
}

/// Strip an `@scope/` style namespace from a package name
pub fn unscoped_name(name: &str) -> &str {
    name.rsplit('/').next().unwrap_or(name)
}

/// Slash command a skill is invoked with
pub fn command_for(name: &str) -> String {
    format!("/{}", unscoped_name(name).trim_start_matches('@'))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UniversalSection {
    rules: Option<String>,
    prompt: Option<String>,
    #[serde(default)]
    globs: Vec<String>,
    #[serde(default)]
    always_apply: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct SkillSection {
    command: Option<String>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct McpSection {
    transport: Option<String>,
    command: Option<String>,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    env: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct ManifestDocument {
    name: Option<String>,
    version: Option<serde_yaml::Value>,
    description: Option<String>,
    #[serde(rename = "type")]
    package_type: Option<String>,
    author: Option<String>,
    repository: Option<String>,
    license: Option<String>,
    #[serde(default)]
    keywords: Vec<String>,
    universal: Option<UniversalSection>,
    skill: Option<SkillSection>,
    mcp: Option<McpSection>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn version_string(value: Option<serde_yaml::Value>) -> Option<String> {
    match value? {
        serde_yaml::Value::String(s) => non_empty(Some(s)),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Parse and validate a manifest document.
pub fn parse_manifest(text: &str, origin: ManifestOrigin) -> Result<PackageManifest, ManifestError> {
    let doc: ManifestDocument = serde_yaml::from_str(text)?;

    let name = non_empty(doc.name).ok_or(ManifestError::MissingField("name"))?;
    let version = version_string(doc.version).ok_or(ManifestError::MissingField("version"))?;
    let package_type = non_empty(doc.package_type)
        .map(PackageType::from)
        .ok_or(ManifestError::MissingField("type"))?;
    let description = doc.description.unwrap_or_default();

    let (rules_text, prompt, globs, always_apply) = match doc.universal {
        Some(u) => (
            non_empty(u.rules),
            non_empty(u.prompt),
            u.globs,
            u.always_apply,
        ),
        None => (None, None, Vec::new(), None),
    };

    let payload = match (doc.mcp, doc.skill) {
        (Some(_), Some(_)) => return Err(ManifestError::MultiplePayloads),
        (Some(mcp), None) => {
            if rules_text.is_some() || prompt.is_some() {
                return Err(ManifestError::MultiplePayloads);
            }
            let command = non_empty(mcp.command).ok_or(ManifestError::EmptyCommand)?;
            Payload::Mcp(McpPayload {
                transport: non_empty(mcp.transport),
                command,
                args: mcp.args,
                env: mcp.env,
            })
        }
        (None, Some(skill)) => {
            if rules_text.is_some() {
                return Err(ManifestError::MultiplePayloads);
            }
            let command = non_empty(skill.command)
                .map(|c| {
                    if c.starts_with('/') {
                        c
                    } else {
                        format!("/{c}")
                    }
                })
                .unwrap_or_else(|| command_for(&name));
            let skill_description = non_empty(skill.description).unwrap_or(description.clone());
            let prompt = prompt.unwrap_or_else(|| skill_description.clone());
            Payload::Skill(SkillPayload {
                command,
                description: skill_description,
                prompt,
            })
        }
        (None, None) => match rules_text.or(prompt) {
            Some(text) => Payload::Rules(RulesPayload {
                text,
                always_apply: always_apply.unwrap_or(globs.is_empty()),
                globs,
            }),
            None => Payload::Empty,
        },
    };

    let expected = match package_type {
        PackageType::Rules => Some("rules"),
        PackageType::Skill => Some("skill"),
        PackageType::Mcp => Some("mcp"),
        PackageType::Other(_) => None,
    };
    if let Some(expected) = expected
        && payload.kind() != expected
    {
        return Err(ManifestError::PayloadMismatch {
            declared: package_type.to_string(),
            found: payload.kind(),
        });
    }

    Ok(PackageManifest {
        name,
        version,
        description,
        package_type,
        author: non_empty(doc.author),
        repository: non_empty(doc.repository),
        license: non_empty(doc.license),
        keywords: doc.keywords,
        payload,
        origin,
    })
}
