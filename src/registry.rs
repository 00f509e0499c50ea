//! Process-wide module metadata registry.
//!
//! The [`Registry`] owns the last collected [`Snapshot`] and hands out
//! shared, immutable views of it. Its lifecycle is:
//!
//! ```text
//! empty ──refresh()──▶ populated ──refresh()──▶ replaced ──▶ ...
//! ```
//!
//! A refresh collects everything first and then swaps the whole snapshot in
//! one atomic store, so readers observe either the old or the new state and
//! never a mix. Readers holding an older `Arc<Snapshot>` keep a consistent
//! view for as long as they hold it.
//!
//! Snapshots keep only weak references to module objects. Resolved reads
//! skip entries whose module the host has since unloaded.
//!
//! # Usage
//!
//! ```rust,no_run
//! # use std::sync::Arc;
//! # use picmenu_index::registry::Registry;
//! # async fn example(registry: Arc<Registry>) -> anyhow::Result<()> {
//! registry.refresh().await?;
//! let visible = registry.list_resolved(false).await;
//! # Ok(())
//! # }
//! ```

use anyhow::{Context, Result};
use arc_swap::ArcSwap;
use futures::future::join_all;
use std::sync::{Arc, Weak};
use tracing::debug;

use crate::extract::{MetadataExtractor, NameNormalizer};
use crate::host::{LoadedModule, ModuleHost};
use crate::models::{ModuleInfo, ModuleInfoRaw};
use crate::resolve::{DynamicFieldResolver, EntrypointInvoker};

/// Immutable result of one collection.
///
/// `infos` is sorted by the index key of each name; `refs[i]` is the module
/// `infos[i]` was collected from.
#[derive(Default)]
pub struct Snapshot {
    infos: Vec<ModuleInfoRaw>,
    refs: Vec<Weak<dyn LoadedModule>>,
}

impl Snapshot {
    fn from_collected(collected: Vec<(ModuleInfoRaw, Weak<dyn LoadedModule>)>) -> Self {
        let (infos, refs) = collected.into_iter().unzip();
        Self { infos, refs }
    }

    pub fn infos(&self) -> &[ModuleInfoRaw] {
        &self.infos
    }

    pub fn len(&self) -> usize {
        self.infos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }

    /// Entries paired with their module, if it is still loaded.
    pub fn entries(&self) -> impl Iterator<Item = (&ModuleInfoRaw, Option<Arc<dyn LoadedModule>>)> {
        self.infos
            .iter()
            .zip(self.refs.iter().map(Weak::upgrade))
    }
}

impl std::fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Snapshot").field("infos", &self.infos).finish()
    }
}

/// Holder of the current [`Snapshot`].
pub struct Registry {
    host: Arc<dyn ModuleHost>,
    extractor: MetadataExtractor,
    resolver: DynamicFieldResolver,
    snapshot: ArcSwap<Snapshot>,
}

impl Registry {
    /// Create an empty registry reading from `host` and resolving deferred
    /// fields through `invoker`.
    pub fn new(host: Arc<dyn ModuleHost>, invoker: Arc<dyn EntrypointInvoker>) -> Self {
        Self::with_names(host, invoker, NameNormalizer::default())
    }

    pub fn with_names(
        host: Arc<dyn ModuleHost>,
        invoker: Arc<dyn EntrypointInvoker>,
        names: NameNormalizer,
    ) -> Self {
        Self {
            extractor: MetadataExtractor::new(host.clone(), names),
            host,
            resolver: DynamicFieldResolver::new(invoker),
            snapshot: ArcSwap::from_pointee(Snapshot::default()),
        }
    }

    /// Re-collect metadata from every loaded module and replace the snapshot.
    ///
    /// Per-module failures only drop that module. The only error surfaced is
    /// the host failing to enumerate its modules, in which case the previous
    /// snapshot stays in place.
    pub async fn refresh(&self) -> Result<Arc<Snapshot>> {
        let modules = self
            .host
            .loaded_modules()
            .context("Failed to enumerate loaded modules")?;
        let collected = self.extractor.collect(&modules).await;
        let snapshot = Arc::new(Snapshot::from_collected(collected));
        self.snapshot.store(snapshot.clone());
        Ok(snapshot)
    }

    /// The current snapshot, without resolving anything.
    pub fn list_raw(&self) -> Arc<Snapshot> {
        self.snapshot.load_full()
    }

    /// Resolve every entry whose module is still loaded against the current
    /// request. Hidden modules, and hidden functions of visible modules, are
    /// left out unless `include_hidden` is set.
    pub async fn list_resolved(&self, include_hidden: bool) -> Vec<ModuleInfo> {
        let snapshot = self.list_raw();
        let live: Vec<_> = snapshot
            .entries()
            .filter_map(|(raw, module)| match module {
                Some(module) => Some((raw, module)),
                None => {
                    debug!(module = %raw.name, "Skipping unloaded module");
                    None
                }
            })
            .collect();

        let resolved = join_all(
            live.iter()
                .map(|(raw, module)| self.resolver.resolve_module(raw, module)),
        )
        .await;

        if include_hidden {
            return resolved;
        }
        resolved
            .into_iter()
            .filter(|info| !info.is_hidden())
            .map(|mut info| {
                info.functions.retain(|f| !f.hidden_resolved);
                info
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{DeclaredMetadata, Distribution};
    use crate::resolve::CallableTable;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct Named(String);

    impl LoadedModule for Named {
        fn internal_identifier(&self) -> &str {
            &self.0
        }
        fn namespace_path(&self) -> &str {
            &self.0
        }
        fn declared_metadata(&self) -> Option<&DeclaredMetadata> {
            None
        }
    }

    #[derive(Default)]
    struct SwappableHost {
        modules: Mutex<Vec<Arc<dyn LoadedModule>>>,
        fail: Mutex<bool>,
    }

    impl SwappableHost {
        fn set(&self, ids: &[&str]) {
            *self.modules.lock().unwrap() = ids
                .iter()
                .map(|id| Arc::new(Named(id.to_string())) as Arc<dyn LoadedModule>)
                .collect();
        }

        fn unload(&self, id: &str) {
            self.modules
                .lock()
                .unwrap()
                .retain(|m| m.internal_identifier() != id);
        }
    }

    #[async_trait]
    impl ModuleHost for SwappableHost {
        fn loaded_modules(&self) -> Result<Vec<Arc<dyn LoadedModule>>> {
            if *self.fail.lock().unwrap() {
                anyhow::bail!("host unavailable");
            }
            Ok(self.modules.lock().unwrap().clone())
        }

        async fn distribution(&self, _namespace_path: &str) -> Result<Option<Distribution>> {
            Ok(None)
        }
    }

    fn names(snapshot: &Snapshot) -> Vec<&str> {
        snapshot.infos().iter().map(|i| i.name.as_str()).collect()
    }

    #[tokio::test]
    async fn starts_empty() {
        let host = Arc::new(SwappableHost::default());
        let registry = Registry::new(host, Arc::new(CallableTable::new()));
        assert!(registry.list_raw().is_empty());
        assert!(registry.list_resolved(true).await.is_empty());
    }

    #[tokio::test]
    async fn refresh_sorts_and_replaces() {
        let host = Arc::new(SwappableHost::default());
        host.set(&["zeta", "alpha"]);
        let registry = Registry::new(host.clone(), Arc::new(CallableTable::new()));

        registry.refresh().await.unwrap();
        let first = registry.list_raw();
        assert_eq!(names(&first), vec!["Alpha", "Zeta"]);

        host.set(&["beta"]);
        registry.refresh().await.unwrap();
        assert_eq!(names(&registry.list_raw()), vec!["Beta"]);
        // An older snapshot stays intact after being replaced.
        assert_eq!(names(&first), vec!["Alpha", "Zeta"]);
    }

    #[tokio::test]
    async fn unloaded_modules_are_skipped() {
        let host = Arc::new(SwappableHost::default());
        host.set(&["alpha", "beta"]);
        let registry = Registry::new(host.clone(), Arc::new(CallableTable::new()));
        registry.refresh().await.unwrap();

        host.unload("alpha");
        let resolved = registry.list_resolved(true).await;
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].name.as_str(), "Beta");
        assert_eq!(registry.list_raw().len(), 2);
    }

    #[tokio::test]
    async fn host_failure_keeps_previous_snapshot() {
        let host = Arc::new(SwappableHost::default());
        host.set(&["alpha"]);
        let registry = Registry::new(host.clone(), Arc::new(CallableTable::new()));
        registry.refresh().await.unwrap();

        *host.fail.lock().unwrap() = true;
        assert!(registry.refresh().await.is_err());
        assert_eq!(names(&registry.list_raw()), vec!["Alpha"]);
    }
}
