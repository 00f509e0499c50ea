//! TOML manifest–backed module host.
//!
//! [`ManifestHost`] stands in for a real plugin loader: each `*.toml` file
//! under the configured directories describes one loaded module, its
//! declared metadata, its installed-package distribution, and the callables
//! it exports for deferred fields.
//!
//! # Manifest Layout
//!
//! ```toml
//! id = "nonebot_plugin_status"
//! namespace = "nonebot_plugin_status"   # defaults to `id`
//! version = "0.3.1"                     # module version attribute
//!
//! [metadata]
//! name = "Status"
//! description = "Process status"
//! type = "application"
//!
//! [metadata.extra]
//! author = ["alice", "bob"]
//! pmn = { hidden = "~:hide_for_guests" }
//!
//! [distribution]
//! version = "0.3.1"
//! metadata = { Author = "Alice <alice@example.com>", Summary = "Status" }
//!
//! [exports]
//! hide_for_guests = { callers = ["guest"] }
//! always = true
//! ```
//!
//! Exports are registered under `"<namespace>:<name>"`. A constant export
//! returns its value; a `callers` export returns whether the caller of the
//! current [`RequestContext`] is listed.

use anyhow::{Context, Result};
use async_trait::async_trait;
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::config::ModulesConfig;
use crate::host::{DeclaredMetadata, Distribution, LoadedModule, ModuleHost};
use crate::resolve::{CallableTable, EntrypointInvoker, RequestContext};

/// One module manifest file.
#[derive(Debug, Clone, Deserialize)]
pub struct ModuleManifest {
    pub id: String,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub metadata: Option<DeclaredMetadata>,
    #[serde(default)]
    pub distribution: Option<Distribution>,
    #[serde(default)]
    pub exports: BTreeMap<String, Export>,
}

impl ModuleManifest {
    pub fn namespace(&self) -> &str {
        self.namespace.as_deref().unwrap_or(&self.id)
    }
}

/// A callable exported by a manifest module.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Export {
    Constant(bool),
    Callers { callers: Vec<String> },
}

/// Parse a single manifest document.
pub fn parse_manifest(content: &str) -> Result<ModuleManifest> {
    let manifest: ModuleManifest =
        toml::from_str(content).with_context(|| "Failed to parse module manifest")?;
    if manifest.id.trim().is_empty() {
        anyhow::bail!("module manifest has an empty id");
    }
    Ok(manifest)
}

/// A module loaded from a manifest.
#[derive(Debug)]
pub struct ManifestModule {
    manifest: ModuleManifest,
}

impl LoadedModule for ManifestModule {
    fn internal_identifier(&self) -> &str {
        &self.manifest.id
    }

    fn namespace_path(&self) -> &str {
        self.manifest.namespace()
    }

    fn declared_metadata(&self) -> Option<&DeclaredMetadata> {
        self.manifest.metadata.as_ref()
    }

    fn version_attribute(&self) -> Option<&str> {
        self.manifest.version.as_deref()
    }
}

enum ManifestSource {
    Dirs(ModulesConfig),
    Static(Vec<ModuleManifest>),
}

#[derive(Default)]
struct HostState {
    modules: Vec<Arc<ManifestModule>>,
    distributions: HashMap<String, Distribution>,
    callables: CallableTable,
}

impl HostState {
    fn build(manifests: Vec<ModuleManifest>) -> Self {
        let mut state = HostState::default();
        for manifest in manifests {
            if state
                .modules
                .iter()
                .any(|m| m.internal_identifier() == manifest.id)
            {
                warn!(module = %manifest.id, "Duplicate module id, keeping the first manifest");
                continue;
            }
            let namespace = manifest.namespace().to_string();
            for (name, export) in &manifest.exports {
                register_export(&mut state.callables, &namespace, name, export.clone());
            }
            if let Some(dist) = &manifest.distribution {
                state.distributions.insert(namespace, dist.clone());
            }
            state.modules.push(Arc::new(ManifestModule { manifest }));
        }
        state
    }
}

fn register_export(table: &mut CallableTable, namespace: &str, name: &str, export: Export) {
    match export {
        Export::Constant(value) => {
            table.register(namespace, name, move || Ok(Value::Bool(value)));
        }
        Export::Callers { callers } => {
            table.register(namespace, name, move || {
                let caller = RequestContext::current().and_then(|ctx| ctx.caller);
                Ok(Value::Bool(
                    caller.is_some_and(|c| callers.iter().any(|listed| *listed == c)),
                ))
            });
        }
    }
}

/// Module host reading one TOML manifest per module.
///
/// Owns the only strong references to its modules: [`reload`](Self::reload)
/// and [`unload`](Self::unload) drop them, which makes weak references held
/// by earlier registry snapshots go stale.
pub struct ManifestHost {
    source: ManifestSource,
    state: RwLock<HostState>,
}

impl ManifestHost {
    /// Scan the configured directories and load every manifest found.
    pub fn load(config: &ModulesConfig) -> Result<Self> {
        let manifests = scan_manifests(config)?;
        Ok(Self {
            source: ManifestSource::Dirs(config.clone()),
            state: RwLock::new(HostState::build(manifests)),
        })
    }

    /// Build a host from in-memory manifests.
    pub fn from_manifests(manifests: Vec<ModuleManifest>) -> Self {
        Self {
            state: RwLock::new(HostState::build(manifests.clone())),
            source: ManifestSource::Static(manifests),
        }
    }

    /// Rebuild every module object from the manifest source.
    pub fn reload(&self) -> Result<()> {
        let manifests = match &self.source {
            ManifestSource::Dirs(config) => scan_manifests(config)?,
            ManifestSource::Static(manifests) => manifests.clone(),
        };
        let state = HostState::build(manifests);
        *self.write_state()? = state;
        Ok(())
    }

    /// Drop a module. Returns whether it was loaded.
    pub fn unload(&self, id: &str) -> Result<bool> {
        let mut state = self.write_state()?;
        let before = state.modules.len();
        state.modules.retain(|m| m.internal_identifier() != id);
        Ok(state.modules.len() != before)
    }

    pub fn len(&self) -> usize {
        self.state.read().map(|s| s.modules.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn write_state(&self) -> Result<std::sync::RwLockWriteGuard<'_, HostState>> {
        self.state
            .write()
            .map_err(|_| anyhow::anyhow!("module host state lock poisoned"))
    }

    fn read_state(&self) -> Result<std::sync::RwLockReadGuard<'_, HostState>> {
        self.state
            .read()
            .map_err(|_| anyhow::anyhow!("module host state lock poisoned"))
    }
}

#[async_trait]
impl ModuleHost for ManifestHost {
    fn loaded_modules(&self) -> Result<Vec<Arc<dyn LoadedModule>>> {
        let state = self.read_state()?;
        Ok(state
            .modules
            .iter()
            .map(|m| m.clone() as Arc<dyn LoadedModule>)
            .collect())
    }

    async fn distribution(&self, namespace_path: &str) -> Result<Option<Distribution>> {
        let state = self.read_state()?;
        Ok(state.distributions.get(namespace_path).cloned())
    }
}

#[async_trait]
impl EntrypointInvoker for ManifestHost {
    async fn invoke(&self, module_path: &str, callable: &str) -> Result<Value> {
        let callables = self.read_state()?.callables.clone();
        callables.invoke(module_path, callable).await
    }
}

fn scan_manifests(config: &ModulesConfig) -> Result<Vec<ModuleManifest>> {
    let include_set = build_globset(&config.include_globs)?;
    let mut manifests = Vec::new();

    for root in &config.dirs {
        if !root.exists() {
            warn!(dir = %root.display(), "Module directory does not exist");
            continue;
        }

        let mut paths = Vec::new();
        for entry in WalkDir::new(root).follow_links(config.follow_symlinks) {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let relative = path.strip_prefix(root).unwrap_or(path);
            if include_set.is_match(relative) {
                paths.push(path.to_path_buf());
            }
        }
        // Deterministic load order
        paths.sort();

        for path in paths {
            match read_manifest(&path) {
                Ok(manifest) => {
                    debug!(module = %manifest.id, path = %path.display(), "Loaded module manifest");
                    manifests.push(manifest);
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %format!("{:#}", e), "Skipping module manifest");
                }
            }
        }
    }

    Ok(manifests)
}

fn read_manifest(path: &Path) -> Result<ModuleManifest> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read manifest: {}", path.display()))?;
    parse_manifest(&content)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}
