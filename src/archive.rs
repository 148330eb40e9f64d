//! Safe extraction of gzip-compressed package tarballs.

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use serde_json::json;
use std::fs;
use std::path::{Component, Path, PathBuf};

use crate::ui::prelude::*;

/// Entries above this size are skipped (decompression bombs)
pub const MAX_ENTRY_BYTES: u64 = 100 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Would resolve outside the destination directory
    EscapesDestination,
    Absolute,
    Link,
    TooLarge,
    UnsupportedType,
}

impl SkipReason {
    fn as_str(self) -> &'static str {
        match self {
            SkipReason::EscapesDestination => "escapes destination",
            SkipReason::Absolute => "absolute path",
            SkipReason::Link => "link entry",
            SkipReason::TooLarge => "entry too large",
            SkipReason::UnsupportedType => "unsupported entry type",
        }
    }
}

#[derive(Debug, Clone)]
pub struct SkippedEntry {
    pub entry: String,
    pub reason: SkipReason,
}

#[derive(Debug, Default)]
pub struct ExtractReport {
    pub written: Vec<PathBuf>,
    pub skipped: Vec<SkippedEntry>,
}

/// Drop leading `.` components and exactly one real component.
///
/// `None` means the entry is absolute; an empty path means the entry is the
/// stripped top-level directory itself.
fn strip_top_level(path: &Path) -> Option<PathBuf> {
    let mut components = path
        .components()
        .skip_while(|c| matches!(c, Component::CurDir))
        .peekable();
    match components.peek() {
        Some(Component::RootDir | Component::Prefix(_)) => return None,
        Some(_) => {
            components.next();
        }
        None => {}
    }
    Some(components.collect())
}

/// Resolve `relative` against `root` lexically; `None` if it leaves `root`.
pub fn resolve_within(root: &Path, relative: &Path) -> Option<PathBuf> {
    let mut target = root.to_path_buf();
    for component in relative.components() {
        match component {
            Component::Normal(part) => target.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                if !target.pop() {
                    return None;
                }
            }
            Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    if target == root || target.starts_with(root) {
        Some(target)
    } else {
        None
    }
}

fn reject(report: &mut ExtractReport, entry: String, reason: SkipReason) {
    emit(
        Level::Warn,
        "archive.entry_rejected",
        &format!(
            "{} Skipping archive entry {} ({})",
            char::from(NerdFont::Shield),
            entry,
            reason.as_str()
        ),
        Some(json!({ "entry": entry, "reason": reason.as_str() })),
    );
    report.skipped.push(SkippedEntry { entry, reason });
}

/// Extract a `.tar.gz` file into `dest`, stripping one leading component.
///
/// Offending entries are skipped and reported; they never abort the whole
/// extraction. No file is created outside `dest`.
pub fn extract_tar_gz(archive_path: &Path, dest: &Path) -> Result<ExtractReport> {
    let file = fs::File::open(archive_path)
        .with_context(|| format!("opening archive {}", archive_path.display()))?;
    extract_tar_gz_from(file, dest)
        .with_context(|| format!("extracting archive {}", archive_path.display()))
}

pub fn extract_tar_gz_from(reader: impl std::io::Read, dest: &Path) -> Result<ExtractReport> {
    fs::create_dir_all(dest)
        .with_context(|| format!("creating extraction directory {}", dest.display()))?;
    let root = dest
        .canonicalize()
        .with_context(|| format!("resolving extraction directory {}", dest.display()))?;

    let mut archive = tar::Archive::new(GzDecoder::new(reader));
    archive.set_preserve_permissions(false);
    archive.set_overwrite(true);
    #[cfg(unix)]
    archive.set_unpack_xattrs(false);

    let mut report = ExtractReport::default();

    for entry in archive.entries().context("reading archive entries")? {
        let mut entry = entry.context("reading archive entry")?;
        let raw_path = entry.path().context("decoding entry path")?.into_owned();
        let display = raw_path.display().to_string();

        let Some(relative) = strip_top_level(&raw_path) else {
            reject(&mut report, display, SkipReason::Absolute);
            continue;
        };
        if relative.as_os_str().is_empty() {
            continue;
        }
        let Some(target) = resolve_within(&root, &relative) else {
            reject(&mut report, display, SkipReason::EscapesDestination);
            continue;
        };

        let kind = entry.header().entry_type();
        if kind.is_symlink() || kind.is_hard_link() {
            reject(&mut report, display, SkipReason::Link);
            continue;
        }
        if kind.is_dir() {
            fs::create_dir_all(&target)
                .with_context(|| format!("creating {}", target.display()))?;
            continue;
        }
        if !(kind.is_file() || kind.is_contiguous()) {
            reject(&mut report, display, SkipReason::UnsupportedType);
            continue;
        }
        if entry.size() > MAX_ENTRY_BYTES {
            reject(&mut report, display, SkipReason::TooLarge);
            continue;
        }

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        entry
            .unpack(&target)
            .with_context(|| format!("writing {}", target.display()))?;
        report.written.push(target);
    }

    emit(
        Level::Debug,
        "archive.extracted",
        &format!(
            "{} Extracted {} file(s) into {} ({} skipped)",
            char::from(NerdFont::Archive),
            report.written.len(),
            root.display(),
            report.skipped.len()
        ),
        None,
    );

    Ok(report)
}

/// Run [`extract_tar_gz`] on the blocking pool.
pub async fn extract_tar_gz_async(archive_path: PathBuf, dest: PathBuf) -> Result<ExtractReport> {
    tokio::task::spawn_blocking(move || extract_tar_gz(&archive_path, &dest))
        .await
        .context("extraction task panicked")?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::TarGzBuilder;
    use tempfile::TempDir;
    use walkdir::WalkDir;

    fn extract(bytes: Vec<u8>, dest: &Path) -> ExtractReport {
        extract_tar_gz_from(bytes.as_slice(), dest).unwrap()
    }

    fn files_under(root: &Path) -> Vec<PathBuf> {
        WalkDir::new(root)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| !e.file_type().is_dir())
            .map(|e| e.into_path())
            .collect()
    }

    #[test]
    fn strips_the_top_level_directory() {
        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("out");
        let archive = TarGzBuilder::new()
            .dir("pkg-main/")
            .file("pkg-main/agentpkg.yaml", b"name: demo\n")
            .file("pkg-main/rules/style.md", b"# style\n")
            .finish();

        let report = extract(archive, &dest);
        assert_eq!(report.written.len(), 2);
        assert!(report.skipped.is_empty());
        assert_eq!(
            fs::read_to_string(dest.join("agentpkg.yaml")).unwrap(),
            "name: demo\n"
        );
        assert!(dest.join("rules/style.md").is_file());
        assert!(!dest.join("pkg-main").exists());
    }

    #[test]
    fn traversal_entries_are_skipped_and_extraction_continues() {
        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("out");
        let archive = TarGzBuilder::new()
            .file("pkg/../../escaped.txt", b"pwned")
            .file("../../etc/passwd", b"root::0:0")
            .file("pkg/ok.txt", b"fine")
            .finish();

        let report = extract(archive, &dest);

        assert_eq!(report.skipped.len(), 2);
        assert!(
            report
                .skipped
                .iter()
                .all(|s| s.reason == SkipReason::EscapesDestination)
        );
        assert!(dest.join("ok.txt").is_file());
        assert!(!tmp.path().join("escaped.txt").exists());
        assert!(!tmp.path().join("etc/passwd").exists());

        let canonical_dest = dest.canonicalize().unwrap();
        for file in files_under(tmp.path()) {
            assert!(
                file.canonicalize().unwrap().starts_with(&canonical_dest),
                "{} escaped",
                file.display()
            );
        }
    }

    #[test]
    fn absolute_entries_are_rejected() {
        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("out");
        let archive = TarGzBuilder::new()
            .file("/tmp/agentpkg-absolute-entry.txt", b"nope")
            .finish();

        let report = extract(archive, &dest);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].reason, SkipReason::Absolute);
        assert!(files_under(&dest).is_empty());
    }

    #[test]
    fn link_entries_are_skipped() {
        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("out");
        let archive = TarGzBuilder::new()
            .symlink("pkg/passwd", "/etc/passwd")
            .file("pkg/readme.md", b"hello")
            .finish();

        let report = extract(archive, &dest);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].reason, SkipReason::Link);
        assert!(fs::symlink_metadata(dest.join("passwd")).is_err());
        assert!(dest.join("readme.md").is_file());
    }

    #[test]
    fn interior_parent_segments_that_stay_inside_are_allowed() {
        let tmp = TempDir::new().unwrap();
        let dest = tmp.path().join("out");
        let archive = TarGzBuilder::new()
            .file("pkg/a/../b.txt", b"inside")
            .finish();

        let report = extract(archive, &dest);
        assert!(report.skipped.is_empty());
        assert_eq!(fs::read_to_string(dest.join("b.txt")).unwrap(), "inside");
    }

    #[test]
    fn corrupt_archive_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let result = extract_tar_gz_from(&b"definitely not gzip"[..], &tmp.path().join("out"));
        assert!(result.is_err());
    }

    #[test]
    fn resolve_within_rejects_escapes() {
        let root = Path::new("/srv/dest");
        assert_eq!(
            resolve_within(root, Path::new("a/b")),
            Some(PathBuf::from("/srv/dest/a/b"))
        );
        assert_eq!(resolve_within(root, Path::new("")), Some(root.to_path_buf()));
        assert_eq!(resolve_within(root, Path::new("../dest-evil/x")), None);
        assert_eq!(resolve_within(root, Path::new("a/../../x")), None);
    }

    #[test]
    fn strip_top_level_handles_leading_dot() {
        assert_eq!(
            strip_top_level(Path::new("./pkg/file.md")),
            Some(PathBuf::from("file.md"))
        );
        assert_eq!(strip_top_level(Path::new("pkg")), Some(PathBuf::new()));
        assert_eq!(strip_top_level(Path::new("/abs/file")), None);
    }
}
