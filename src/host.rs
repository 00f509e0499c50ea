//! Host collaborator traits.
//!
//! The host application owns its loaded modules; this crate only reads them
//! through [`ModuleHost`] and [`LoadedModule`]. Implement these traits to
//! plug the index into a real module loader. [`ManifestHost`] is the
//! TOML-backed implementation used by the `picmenu` binary.
//!
//! # Example
//!
//! ```rust
//! use anyhow::Result;
//! use async_trait::async_trait;
//! use picmenu_index::host::{DeclaredMetadata, Distribution, LoadedModule, ModuleHost};
//! use std::sync::Arc;
//!
//! struct Static(Vec<Arc<dyn LoadedModule>>);
//!
//! #[async_trait]
//! impl ModuleHost for Static {
//!     fn loaded_modules(&self) -> Result<Vec<Arc<dyn LoadedModule>>> {
//!         Ok(self.0.clone())
//!     }
//!
//!     async fn distribution(&self, _namespace: &str) -> Result<Option<Distribution>> {
//!         Ok(None)
//!     }
//! }
//! ```
//!
//! [`ManifestHost`]: crate::manifest::ManifestHost

use anyhow::Result;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Module type that marks a module as non-user-facing.
pub const LIBRARY_MODULE_TYPE: &str = "library";

/// Metadata a module declares about itself.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeclaredMetadata {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub usage: String,
    /// Free-form module type (`"application"`, `"library"`, ...).
    #[serde(default, rename = "type")]
    pub module_type: Option<String>,
    /// Free-form extra fields; may hold anything, including garbage.
    #[serde(default)]
    pub extra: serde_json::Value,
}

impl DeclaredMetadata {
    pub fn is_library(&self) -> bool {
        self.module_type.as_deref() == Some(LIBRARY_MODULE_TYPE)
    }
}

/// Installed-package information for a module's namespace.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Distribution {
    #[serde(default)]
    pub version: Option<String>,
    /// Core metadata fields (`Author`, `Maintainer`, `Author-Email`, `Summary`, ...).
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl Distribution {
    /// A metadata field, treating blank values as absent.
    pub fn field(&self, key: &str) -> Option<&str> {
        self.metadata
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }
}

/// One module loaded by the host.
pub trait LoadedModule: Send + Sync {
    /// Unique identifier of the module inside the host.
    fn internal_identifier(&self) -> &str;

    /// Namespace path the module's code lives under; substituted for the
    /// own-namespace marker in deferred expressions.
    fn namespace_path(&self) -> &str;

    fn declared_metadata(&self) -> Option<&DeclaredMetadata>;

    /// Version attribute exposed by the module itself, if any.
    fn version_attribute(&self) -> Option<&str> {
        None
    }
}

/// The host's module registry.
#[async_trait]
pub trait ModuleHost: Send + Sync {
    /// Snapshot of currently loaded modules in load order.
    ///
    /// The host keeps the only strong references; callers downgrade.
    fn loaded_modules(&self) -> Result<Vec<Arc<dyn LoadedModule>>>;

    /// Look up installed-package information for a namespace path.
    async fn distribution(&self, namespace_path: &str) -> Result<Option<Distribution>>;
}
