use serde_json::json;
use std::fs;

use super::direct::{parse_repository, validate_relative_path};
use super::{Resolved, SourceContext, SourceError};
use crate::archive;
use crate::common::http::{self, FetchError};
use crate::manifest::{MANIFEST_FILE, ManifestOrigin, parse_manifest};
use crate::registry::RegistryEntry;
use crate::ui::prelude::*;

pub(super) fn can_attempt_standalone(entry: &RegistryEntry) -> bool {
    entry
        .repository
        .as_deref()
        .is_some_and(|r| parse_repository(r).is_some())
}

fn require_https(url: &str) -> Result<(), SourceError> {
    match reqwest::Url::parse(url) {
        Ok(parsed) if parsed.scheme() == "https" => Ok(()),
        _ => Err(SourceError::InsecureUrl(url.to_string())),
    }
}

pub(super) async fn resolve_archive(
    entry: &RegistryEntry,
    ctx: &SourceContext,
    label: &str,
) -> Result<Option<Resolved>, SourceError> {
    let Some(url) = entry.tarball.as_deref() else {
        return Ok(None);
    };
    require_https(url)?;
    fetch_and_extract(ctx, url, label, None).await.map(Some)
}

/// Archive URL of a repository snapshot on the git host
pub(super) fn standalone_archive_url(ctx: &SourceContext, repository: &str) -> Option<String> {
    let repo = parse_repository(repository)?;
    Some(format!(
        "{}/{}/{}/archive/{}.tar.gz",
        ctx.git_host_base.trim_end_matches('/'),
        repo.owner,
        repo.repo,
        repo.git_ref_or_head()
    ))
}

pub(super) async fn resolve_standalone(
    entry: &RegistryEntry,
    ctx: &SourceContext,
    label: &str,
) -> Result<Option<Resolved>, SourceError> {
    let Some(repository) = entry.repository.as_deref() else {
        return Ok(None);
    };
    let repo = parse_repository(repository)
        .ok_or_else(|| SourceError::UnsupportedRepository(repository.to_string()))?;
    let url = standalone_archive_url(ctx, repository)
        .ok_or_else(|| SourceError::UnsupportedRepository(repository.to_string()))?;
    require_https(&url)?;
    fetch_and_extract(ctx, &url, label, repo.subpath.as_deref())
        .await
        .map(Some)
}

fn io_error(path: &std::path::Path) -> impl FnOnce(std::io::Error) -> SourceError + '_ {
    move |source| SourceError::Io {
        path: path.display().to_string(),
        source,
    }
}

/// Download `url` into the scratch directory, extract it under `label`,
/// and parse the manifest at the package root.
pub(super) async fn fetch_and_extract(
    ctx: &SourceContext,
    url: &str,
    label: &str,
    subdir: Option<&str>,
) -> Result<Resolved, SourceError> {
    let subdir = subdir.map(validate_relative_path).transpose()?;
    let scratch = ctx.scratch_dir.as_deref().ok_or(SourceError::NoScratchDir)?;
    fs::create_dir_all(scratch).map_err(io_error(scratch))?;

    let archive_path = scratch.join(format!("{label}.tar.gz"));
    let extract_dir = scratch.join(label);

    if let Err(err) =
        http::download_bounded(&ctx.client, url, &archive_path, ctx.max_archive_bytes).await
    {
        if let FetchError::TooLarge { size, max, .. } = &err {
            emit(
                Level::Warn,
                "source.archive.too_large",
                &format!(
                    "{} Archive {} is too large ({} > {} bytes)",
                    char::from(NerdFont::Warning),
                    url,
                    size,
                    max
                ),
                Some(json!({ "url": url, "size": size, "max": max })),
            );
        }
        return Err(err.into());
    }

    let report = archive::extract_tar_gz_async(archive_path.clone(), extract_dir.clone())
        .await
        .map_err(SourceError::Extract);
    fs::remove_file(&archive_path).ok();
    let report = report?;
    if !report.skipped.is_empty() {
        emit(
            Level::Warn,
            "source.archive.entries_skipped",
            &format!(
                "{} {} unsafe archive entr{} skipped for {}",
                char::from(NerdFont::Shield),
                report.skipped.len(),
                if report.skipped.len() == 1 { "y" } else { "ies" },
                url
            ),
            None,
        );
    }

    let package_dir = match subdir {
        Some(sub) => extract_dir.join(sub),
        None => extract_dir,
    };
    let manifest_path = package_dir.join(MANIFEST_FILE);
    if !manifest_path.is_file() {
        return Err(SourceError::MissingManifest);
    }
    let text = tokio::fs::read_to_string(&manifest_path)
        .await
        .map_err(io_error(&manifest_path))?;
    let manifest = parse_manifest(&text, ManifestOrigin::Archive)?;

    Ok(Resolved {
        manifest,
        package_dir: Some(package_dir),
    })
}
