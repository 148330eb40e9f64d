use super::{Resolved, SourceContext, SourceError};
use crate::common::http;
use crate::manifest::{MANIFEST_FILE, ManifestOrigin, parse_manifest};
use crate::registry::RegistryEntry;

/// A repository on the git host, optionally pinned to a ref and sub-path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryRef {
    pub owner: String,
    pub repo: String,
    pub git_ref: Option<String>,
    pub subpath: Option<String>,
}

impl RepositoryRef {
    pub fn git_ref_or_head(&self) -> &str {
        self.git_ref.as_deref().unwrap_or("HEAD")
    }
}

/// Parse `https://github.com/<owner>/<repo>[.git][/tree/<ref>[/<path>]]`
pub fn parse_repository(url: &str) -> Option<RepositoryRef> {
    let parsed = reqwest::Url::parse(url.trim()).ok()?;
    if !matches!(parsed.scheme(), "https" | "http") {
        return None;
    }
    let host = parsed.host_str()?;
    if host != "github.com" && host != "www.github.com" {
        return None;
    }

    let segments: Vec<&str> = parsed
        .path_segments()?
        .filter(|s| !s.is_empty())
        .collect();
    let [owner, repo, rest @ ..] = segments.as_slice() else {
        return None;
    };
    let repo = repo.strip_suffix(".git").unwrap_or(repo);

    let (git_ref, subpath) = match rest {
        [] => (None, None),
        ["tree" | "blob", git_ref, path @ ..] => {
            let subpath = (!path.is_empty()).then(|| path.join("/"));
            (Some(git_ref.to_string()), subpath)
        }
        _ => return None,
    };

    let owner = validate_relative_path(owner).ok()?;
    let repo = validate_relative_path(repo).ok()?;
    let subpath = match subpath {
        Some(path) => Some(validate_relative_path(&path).ok()?),
        None => None,
    };

    Some(RepositoryRef {
        owner,
        repo,
        git_ref,
        subpath,
    })
}

/// Normalize a relative `/`-separated path, rejecting absolute paths,
/// parent segments and backslashes.
pub fn validate_relative_path(path: &str) -> Result<String, SourceError> {
    let unsafe_path = || SourceError::UnsafePath(path.to_string());
    let trimmed = path.trim();
    if trimmed.is_empty() || trimmed.starts_with('/') || trimmed.contains('\\') {
        return Err(unsafe_path());
    }

    let mut parts = Vec::new();
    for segment in trimmed.split('/') {
        match segment {
            "" | "." => continue,
            ".." => return Err(unsafe_path()),
            s if s.contains(':') || s.chars().any(char::is_control) => return Err(unsafe_path()),
            s => parts.push(s),
        }
    }
    if parts.is_empty() {
        return Err(unsafe_path());
    }
    Ok(parts.join("/"))
}

pub(super) fn can_attempt(entry: &RegistryEntry) -> bool {
    entry.path.is_some()
        || entry
            .repository
            .as_deref()
            .is_some_and(|r| parse_repository(r).is_some())
}

/// Raw-content URLs to try, monorepo path first.
///
/// Each candidate is built on its own: a malformed path does not hide the
/// repository URL and a foreign repository does not hide the monorepo path.
/// Fails only when no candidate could be built.
pub(super) fn candidate_urls(
    entry: &RegistryEntry,
    ctx: &SourceContext,
) -> Result<Vec<String>, SourceError> {
    let base = ctx.raw_content_base.trim_end_matches('/');
    let mut urls = Vec::new();
    let mut first_error = None;

    if let Some(path) = &entry.path {
        match monorepo_url(base, path, ctx) {
            Ok(url) => urls.push(url),
            Err(e) => {
                first_error.get_or_insert(e);
            }
        }
    }

    if let Some(repository) = &entry.repository {
        match repository_url(base, repository) {
            Ok(url) => urls.push(url),
            Err(e) => {
                first_error.get_or_insert(e);
            }
        }
    }

    match first_error {
        Some(e) if urls.is_empty() => Err(e),
        _ => Ok(urls),
    }
}

fn monorepo_url(base: &str, path: &str, ctx: &SourceContext) -> Result<String, SourceError> {
    let path = validate_relative_path(path)?;
    let monorepo = validate_relative_path(&ctx.monorepo)?;
    Ok(format!(
        "{}/{}/{}/{}/{}",
        base, monorepo, ctx.monorepo_branch, path, MANIFEST_FILE
    ))
}

fn repository_url(base: &str, repository: &str) -> Result<String, SourceError> {
    let repo = parse_repository(repository)
        .ok_or_else(|| SourceError::UnsupportedRepository(repository.to_string()))?;
    let prefix = repo
        .subpath
        .as_deref()
        .map(|p| format!("{p}/"))
        .unwrap_or_default();
    Ok(format!(
        "{}/{}/{}/{}/{}{}",
        base,
        repo.owner,
        repo.repo,
        repo.git_ref_or_head(),
        prefix,
        MANIFEST_FILE
    ))
}

pub(super) async fn resolve(
    entry: &RegistryEntry,
    ctx: &SourceContext,
) -> Result<Option<Resolved>, SourceError> {
    let mut last_error = None;
    for url in candidate_urls(entry, ctx)? {
        let attempt = async {
            let text = http::fetch_text(&ctx.client, &url).await?;
            Ok::<_, SourceError>(parse_manifest(&text, ManifestOrigin::Repository)?)
        };
        match attempt.await {
            Ok(manifest) => {
                return Ok(Some(Resolved {
                    manifest,
                    package_dir: None,
                }));
            }
            Err(err) => last_error = Some(err),
        }
    }
    match last_error {
        Some(err) => Err(err),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::sources::test_context;
    use crate::registry::entry;

    #[test]
    fn parses_plain_and_tree_urls() {
        let plain = parse_repository("https://github.com/acme/rules.git").unwrap();
        assert_eq!(plain.owner, "acme");
        assert_eq!(plain.repo, "rules");
        assert_eq!(plain.git_ref_or_head(), "HEAD");
        assert_eq!(plain.subpath, None);

        let tree = parse_repository("https://github.com/acme/mono/tree/v2/pkgs/style").unwrap();
        assert_eq!(tree.git_ref.as_deref(), Some("v2"));
        assert_eq!(tree.subpath.as_deref(), Some("pkgs/style"));
    }

    #[test]
    fn rejects_foreign_hosts_and_shapes() {
        assert!(parse_repository("https://gitlab.com/acme/rules").is_none());
        assert!(parse_repository("ftp://github.com/acme/rules").is_none());
        assert!(parse_repository("https://github.com/acme").is_none());
        assert!(parse_repository("https://github.com/acme/rules/issues/3").is_none());
        assert!(parse_repository("not a url").is_none());
    }

    #[test]
    fn path_validation() {
        assert_eq!(validate_relative_path("./pkgs//style/").unwrap(), "pkgs/style");
        for bad in ["../etc", "pkgs/../../x", "/abs", "C:/x", "a\\b", "", "."] {
            assert!(
                matches!(validate_relative_path(bad), Err(SourceError::UnsafePath(_))),
                "{bad} accepted"
            );
        }
    }

    #[test]
    fn builds_monorepo_then_repository_urls() {
        let mut e = entry("style");
        e.path = Some("packages/style".into());
        e.repository = Some("https://github.com/acme/style/tree/main/rules".into());
        let mut ctx = test_context(None);
        ctx.raw_content_base = "https://raw.example/".into();

        let urls = candidate_urls(&e, &ctx).unwrap();
        assert_eq!(
            urls,
            vec![
                "https://raw.example/agentpkg/registry/main/packages/style/agentpkg.yaml",
                "https://raw.example/acme/style/main/rules/agentpkg.yaml",
            ]
        );
    }

    #[test]
    fn traversal_in_path_is_rejected_before_any_url_is_built() {
        let mut e = entry("evil");
        e.path = Some("../../secrets".into());
        assert!(matches!(
            candidate_urls(&e, &test_context(None)),
            Err(SourceError::UnsafePath(_))
        ));
    }

    #[test]
    fn each_candidate_is_built_independently() {
        let mut ctx = test_context(None);
        ctx.raw_content_base = "https://raw.example".into();

        let mut foreign_repo = entry("style");
        foreign_repo.path = Some("packages/style".into());
        foreign_repo.repository = Some("https://gitlab.com/acme/style".into());
        assert_eq!(
            candidate_urls(&foreign_repo, &ctx).unwrap(),
            vec!["https://raw.example/agentpkg/registry/main/packages/style/agentpkg.yaml"]
        );

        let mut bad_path = entry("style");
        bad_path.path = Some("../style".into());
        bad_path.repository = Some("https://github.com/acme/style".into());
        assert_eq!(
            candidate_urls(&bad_path, &ctx).unwrap(),
            vec!["https://raw.example/acme/style/HEAD/agentpkg.yaml"]
        );

        let mut nothing_usable = entry("style");
        nothing_usable.path = Some("../style".into());
        nothing_usable.repository = Some("https://gitlab.com/acme/style".into());
        assert!(matches!(
            candidate_urls(&nothing_usable, &ctx),
            Err(SourceError::UnsafePath(_))
        ));
    }
}
