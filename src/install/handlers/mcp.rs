use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use super::{InstallContext, PackageHandler};
use crate::common::lock::with_lock;
use crate::install::metadata::InstalledPackage;
use crate::install::sanitize_package_name;
use crate::manifest::{McpPayload, PackageManifest, PackageType, Payload};

/// One named server in a service configuration document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct McpServerEntry {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub transport: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl From<&McpPayload> for McpServerEntry {
    fn from(payload: &McpPayload) -> Self {
        Self {
            transport: payload.transport.clone(),
            command: Some(payload.command.clone()),
            args: payload.args.clone(),
            env: payload.env.clone(),
            extra: Map::new(),
        }
    }
}

/// The shared service configuration file. Keys other than `mcpServers` are
/// carried through untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpConfigDocument {
    #[serde(default)]
    pub mcp_servers: BTreeMap<String, McpServerEntry>,
    #[serde(flatten)]
    pub other: Map<String, Value>,
}

impl McpConfigDocument {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content =
            fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str(&content).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        let content = serde_json::to_string_pretty(self).context("serializing mcp config")?;
        fs::write(path, content + "\n").with_context(|| format!("writing {}", path.display()))
    }

    /// Read-merge-write under the document's lock
    pub async fn update<T, F>(path: &Path, change: F) -> Result<T>
    where
        F: FnOnce(&mut Self) -> (T, bool),
    {
        with_lock(path, || async {
            let mut doc = Self::load(path)?;
            let (value, dirty) = change(&mut doc);
            if dirty {
                doc.save(path)?;
            }
            Ok::<_, anyhow::Error>(value)
        })
        .await
    }
}

#[derive(Default)]
pub struct McpHandler;

#[async_trait]
impl PackageHandler for McpHandler {
    fn id(&self) -> &'static str {
        "mcp"
    }

    async fn install(
        &self,
        manifest: &PackageManifest,
        ctx: &InstallContext,
    ) -> Result<Vec<PathBuf>> {
        let Payload::Mcp(payload) = &manifest.payload else {
            bail!(
                "mcp handler cannot install a `{}` payload",
                manifest.payload.kind()
            );
        };
        let key = sanitize_package_name(&manifest.name)?;
        let path = ctx.platform.mcp_config_path(&ctx.project_root);
        let entry = McpServerEntry::from(payload);

        McpConfigDocument::update(&path, |doc| {
            doc.mcp_servers.insert(key, entry);
            ((), true)
        })
        .await?;

        Ok(vec![path])
    }

    async fn uninstall(&self, sanitized_name: &str, ctx: &InstallContext) -> Result<Vec<PathBuf>> {
        let path = ctx.platform.mcp_config_path(&ctx.project_root);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let removed = McpConfigDocument::update(&path, |doc| {
            let removed = doc.mcp_servers.remove(sanitized_name).is_some();
            (removed, removed)
        })
        .await?;

        Ok(if removed { vec![path] } else { Vec::new() })
    }

    async fn list(&self, ctx: &InstallContext) -> Result<Vec<InstalledPackage>> {
        let path = ctx.platform.mcp_config_path(&ctx.project_root);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let names: Vec<String> = with_lock(&path, || async {
            let doc = McpConfigDocument::load(&path)?;
            Ok::<_, anyhow::Error>(doc.mcp_servers.into_keys().collect())
        })
        .await?;

        Ok(names
            .into_iter()
            .map(|name| InstalledPackage {
                name,
                version: None,
                package_type: PackageType::Mcp,
                installed_at: None,
                platform: ctx.platform,
                path: path.clone(),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::install::Platform;
    use crate::manifest::ManifestOrigin;
    use tempfile::TempDir;

    fn manifest(name: &str) -> PackageManifest {
        PackageManifest {
            name: name.into(),
            version: "1.0.0".into(),
            description: String::new(),
            package_type: PackageType::Mcp,
            author: None,
            repository: None,
            license: None,
            keywords: Vec::new(),
            payload: Payload::Mcp(McpPayload {
                transport: Some("stdio".into()),
                command: "npx".into(),
                args: vec!["-y".into(), name.into()],
                env: BTreeMap::new(),
            }),
            origin: ManifestOrigin::Repository,
        }
    }

    fn ctx(root: &TempDir) -> InstallContext {
        InstallContext {
            project_root: root.path().to_path_buf(),
            platform: Platform::Cursor,
            scratch_dir: None,
        }
    }

    #[tokio::test]
    async fn merge_preserves_unrelated_content() {
        let root = TempDir::new().unwrap();
        let path = root.path().join(".cursor/mcp.json");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(
            &path,
            r#"{"theme":"dark","mcpServers":{"existing":{"url":"http://localhost:9000","headers":{"x":"y"}}}}"#,
        )
        .unwrap();

        let written = McpHandler
            .install(&manifest("@acme/github-mcp"), &ctx(&root))
            .await
            .unwrap();
        assert_eq!(written, vec![path.clone()]);

        let raw: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["theme"], "dark");
        assert_eq!(raw["mcpServers"]["existing"]["url"], "http://localhost:9000");
        assert_eq!(raw["mcpServers"]["existing"]["headers"]["x"], "y");
        assert_eq!(raw["mcpServers"]["acme-github-mcp"]["command"], "npx");
        assert_eq!(raw["mcpServers"]["acme-github-mcp"]["type"], "stdio");
        assert!(raw["mcpServers"]["acme-github-mcp"].get("env").is_none());
        assert!(!path.with_extension("json.lock").exists());
    }

    #[tokio::test]
    async fn uninstall_removes_only_the_named_entry() {
        let root = TempDir::new().unwrap();
        let ctx = ctx(&root);
        McpHandler.install(&manifest("one"), &ctx).await.unwrap();
        McpHandler.install(&manifest("two"), &ctx).await.unwrap();

        let listed: Vec<_> = McpHandler
            .list(&ctx)
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.name)
            .collect();
        assert_eq!(listed, vec!["one", "two"]);

        let removed = McpHandler.uninstall("one", &ctx).await.unwrap();
        assert_eq!(removed.len(), 1);
        assert!(McpHandler.uninstall("one", &ctx).await.unwrap().is_empty());

        let doc = McpConfigDocument::load(&Platform::Cursor.mcp_config_path(root.path())).unwrap();
        assert_eq!(doc.mcp_servers.keys().collect::<Vec<_>>(), vec!["two"]);
    }

    #[tokio::test]
    async fn uninstall_without_config_touches_nothing() {
        let root = TempDir::new().unwrap();
        assert!(McpHandler.uninstall("x", &ctx(&root)).await.unwrap().is_empty());
        assert!(!root.path().join(".cursor").exists());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_installs_do_not_lose_entries() {
        let root = TempDir::new().unwrap();
        let mut handles = Vec::new();
        for i in 0..6 {
            let ctx = ctx(&root);
            handles.push(tokio::spawn(async move {
                McpHandler
                    .install(&manifest(&format!("server-{i}")), &ctx)
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        let doc = McpConfigDocument::load(&Platform::Cursor.mcp_config_path(root.path())).unwrap();
        assert_eq!(doc.mcp_servers.len(), 6);
    }
}
