use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use std::fs;
use std::path::PathBuf;

use super::{
    InstallContext, PackageHandler, copy_package_files, package_dirs, remove_package_dir,
    with_front_matter, yaml_scalar,
};
use crate::install::metadata::{InstalledPackage, PackageMetadata};
use crate::install::{Platform, sanitize_package_name};
use crate::manifest::{PackageManifest, PackageType, Payload, RulesPayload};

#[derive(Default)]
pub struct RulesHandler;

fn render_rule(manifest: &PackageManifest, rules: &RulesPayload, platform: Platform) -> String {
    match platform {
        Platform::Cursor => with_front_matter(
            &[
                ("description", yaml_scalar(&manifest.description)),
                ("globs", yaml_scalar(&rules.globs.join(","))),
                ("alwaysApply", rules.always_apply.to_string()),
            ],
            &rules.text,
        ),
        Platform::Claude | Platform::Windsurf => {
            let mut text = rules.text.trim_end().to_string();
            text.push('\n');
            text
        }
    }
}

#[async_trait]
impl PackageHandler for RulesHandler {
    fn id(&self) -> &'static str {
        "rules"
    }

    async fn install(
        &self,
        manifest: &PackageManifest,
        ctx: &InstallContext,
    ) -> Result<Vec<PathBuf>> {
        let Payload::Rules(rules) = &manifest.payload else {
            bail!(
                "rules handler cannot install a `{}` payload",
                manifest.payload.kind()
            );
        };

        let dir = ctx
            .platform
            .rules_dir(&ctx.project_root)
            .join(sanitize_package_name(&manifest.name)?);
        fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;

        let mut written = Vec::new();
        if let Some(scratch) = &ctx.scratch_dir {
            written.extend(copy_package_files(scratch, &dir)?);
        }

        let rule_path = dir.join(ctx.platform.rule_file_name());
        fs::write(&rule_path, render_rule(manifest, rules, ctx.platform))
            .with_context(|| format!("writing {}", rule_path.display()))?;
        written.push(rule_path);
        written.push(PackageMetadata::for_manifest(manifest).write_to(&dir)?);

        Ok(written)
    }

    async fn uninstall(&self, sanitized_name: &str, ctx: &InstallContext) -> Result<Vec<PathBuf>> {
        let dir = ctx.platform.rules_dir(&ctx.project_root).join(sanitized_name);
        Ok(remove_package_dir(&dir)?.into_iter().collect())
    }

    async fn list(&self, ctx: &InstallContext) -> Result<Vec<InstalledPackage>> {
        Ok(package_dirs(&ctx.platform.rules_dir(&ctx.project_root))?
            .iter()
            .map(|dir| InstalledPackage::from_dir(dir, ctx.platform, PackageType::Rules))
            .collect())
    }
}
