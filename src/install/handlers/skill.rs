use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use std::fs;
use std::path::PathBuf;

use super::{
    InstallContext, PackageHandler, copy_package_files, package_dirs, remove_package_dir,
    with_front_matter, yaml_scalar,
};
use crate::install::metadata::{InstalledPackage, PackageMetadata};
use crate::install::sanitize_package_name;
use crate::manifest::{PackageManifest, PackageType, Payload};

pub const SKILL_FILE: &str = "SKILL.md";

#[derive(Default)]
pub struct SkillHandler;

#[async_trait]
impl PackageHandler for SkillHandler {
    fn id(&self) -> &'static str {
        "skill"
    }

    async fn install(
        &self,
        manifest: &PackageManifest,
        ctx: &InstallContext,
    ) -> Result<Vec<PathBuf>> {
        let Payload::Skill(skill) = &manifest.payload else {
            bail!(
                "skill handler cannot install a `{}` payload",
                manifest.payload.kind()
            );
        };

        let dir = ctx
            .platform
            .skills_dir(&ctx.project_root)
            .join(sanitize_package_name(&manifest.name)?);
        fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;

        let mut written = Vec::new();
        if let Some(scratch) = &ctx.scratch_dir {
            written.extend(copy_package_files(scratch, &dir)?);
        }

        let content = with_front_matter(
            &[
                ("name", yaml_scalar(&manifest.name)),
                ("description", yaml_scalar(&skill.description)),
                ("command", yaml_scalar(&skill.command)),
            ],
            &skill.prompt,
        );
        let skill_path = dir.join(SKILL_FILE);
        fs::write(&skill_path, content)
            .with_context(|| format!("writing {}", skill_path.display()))?;
        written.push(skill_path);
        written.push(PackageMetadata::for_manifest(manifest).write_to(&dir)?);

        Ok(written)
    }

    async fn uninstall(&self, sanitized_name: &str, ctx: &InstallContext) -> Result<Vec<PathBuf>> {
        let dir = ctx.platform.skills_dir(&ctx.project_root).join(sanitized_name);
        Ok(remove_package_dir(&dir)?.into_iter().collect())
    }

    async fn list(&self, ctx: &InstallContext) -> Result<Vec<InstalledPackage>> {
        Ok(package_dirs(&ctx.platform.skills_dir(&ctx.project_root))?
            .iter()
            .map(|dir| InstalledPackage::from_dir(dir, ctx.platform, PackageType::Skill))
            .collect())
    }
}
