use std::collections::BTreeMap;

use crate::manifest::{
    ManifestOrigin, McpPayload, PackageManifest, PackageType, Payload, RulesPayload, SkillPayload,
    command_for,
};
use crate::registry::RegistryEntry;

/// Launcher written into synthesized service manifests; the user still has
/// to supply its arguments.
pub const GENERIC_LAUNCHER: &str = "npx";

fn body_text(entry: &RegistryEntry) -> String {
    if entry.description.trim().is_empty() {
        format!("# {}\n", entry.name)
    } else {
        format!("# {}\n\n{}\n", entry.name, entry.description.trim())
    }
}

/// Build a manifest from the registry entry alone. Total over all entries.
pub fn synthesize(entry: &RegistryEntry) -> PackageManifest {
    let (package_type, payload) = match entry.package_type() {
        PackageType::Mcp => (
            PackageType::Mcp,
            Payload::Mcp(McpPayload {
                transport: None,
                command: GENERIC_LAUNCHER.to_string(),
                args: Vec::new(),
                env: BTreeMap::new(),
            }),
        ),
        PackageType::Skill => (
            PackageType::Skill,
            Payload::Skill(SkillPayload {
                command: command_for(&entry.name),
                description: entry.description.clone(),
                prompt: body_text(entry),
            }),
        ),
        PackageType::Rules | PackageType::Other(_) => (
            PackageType::Rules,
            Payload::Rules(RulesPayload {
                text: body_text(entry),
                globs: Vec::new(),
                always_apply: true,
            }),
        ),
    };

    PackageManifest {
        name: entry.name.clone(),
        version: entry.version.clone(),
        description: entry.description.clone(),
        package_type,
        author: Some(entry.author.clone()).filter(|a| !a.is_empty()),
        repository: entry.repository.clone(),
        license: entry.license.clone(),
        keywords: entry.keywords.clone(),
        payload,
        origin: ManifestOrigin::Registry,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::entry;

    #[test]
    fn service_entry_gets_generic_launcher() {
        let mut e = entry("@scope/foo");
        e.declared_type = Some("mcp".into());
        let manifest = synthesize(&e);
        assert_eq!(manifest.package_type, PackageType::Mcp);
        let Payload::Mcp(mcp) = &manifest.payload else {
            panic!("expected mcp payload");
        };
        assert_eq!(mcp.command, GENERIC_LAUNCHER);
        assert!(mcp.args.is_empty());
        assert!(manifest.needs_service_configuration());
    }

    #[test]
    fn skill_entry_gets_slash_command() {
        let mut e = entry("@scope/commit-skill");
        e.declared_type = Some("skill".into());
        e.description = "Write commit messages".into();
        let manifest = synthesize(&e);
        let Payload::Skill(skill) = &manifest.payload else {
            panic!("expected skill payload");
        };
        assert_eq!(skill.command, "/commit-skill");
        assert_eq!(
            skill.prompt,
            "# @scope/commit-skill\n\nWrite commit messages\n"
        );
    }

    #[test]
    fn unknown_types_become_rules() {
        let mut e = entry("agent-thing");
        e.declared_type = Some("agent".into());
        let manifest = synthesize(&e);
        assert_eq!(manifest.package_type, PackageType::Rules);
        assert!(matches!(manifest.payload, Payload::Rules(ref r) if r.text.contains("agent-thing")));
    }

    #[test]
    fn synthesis_is_total_for_sparse_entries() {
        let mut e = entry("");
        e.version = String::new();
        e.description = String::new();
        e.author = String::new();
        let manifest = synthesize(&e);
        assert_eq!(manifest.origin, ManifestOrigin::Registry);
        assert!(manifest.author.is_none());
    }
}
