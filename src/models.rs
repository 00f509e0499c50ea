//! Module metadata models.
//!
//! The `*Raw` types are what a collection produces: immutable, possibly
//! carrying [`Hidden::Deferred`] expressions that can only be evaluated
//! while a request is being handled. The resolved types ([`ModuleInfo`],
//! [`FunctionInfo`], [`ExtensionSettings`]) have the same shape with every
//! deferred field replaced by a concrete `*_resolved` boolean, and are
//! rebuilt for every read.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Weak};

use crate::host::LoadedModule;
use crate::text_index::IndexedText;

/// Placeholder in a deferred module path standing for the owning module's
/// own namespace (`"~.admin:is_admin"`).
pub const OWN_NAMESPACE_MARKER: &str = "~";

/// A reference to a zero-argument callable, written `"<module-path>:<callable>"`.
///
/// Kept as the declared string; it is only parsed at resolve time so that a
/// malformed reference degrades to a resolution failure instead of dropping
/// the entry that declared it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeferredExpr(String);

impl DeferredExpr {
    pub fn new(expr: impl Into<String>) -> Self {
        Self(expr.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Split into `(module_path, callable_name)`, substituting the
    /// [`OWN_NAMESPACE_MARKER`] with `namespace`.
    pub fn target(&self, namespace: &str) -> anyhow::Result<(String, String)> {
        let (module_path, callable) = self
            .0
            .split_once(':')
            .ok_or_else(|| anyhow::anyhow!("expected `<module>:<callable>`, got `{}`", self.0))?;
        if callable.contains(':') {
            anyhow::bail!("too many `:` separators in `{}`", self.0);
        }
        let module_path = module_path.trim();
        let callable = callable.trim();
        if module_path.is_empty() || callable.is_empty() {
            anyhow::bail!("empty module path or callable name in `{}`", self.0);
        }
        Ok((
            module_path.replace(OWN_NAMESPACE_MARKER, namespace),
            callable.to_string(),
        ))
    }
}

impl fmt::Display for DeferredExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A visibility flag: either known at declaration time or computed per request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Hidden {
    Literal(bool),
    Deferred(DeferredExpr),
}

impl Default for Hidden {
    fn default() -> Self {
        Hidden::Literal(false)
    }
}

impl From<bool> for Hidden {
    fn from(value: bool) -> Self {
        Hidden::Literal(value)
    }
}

/// Per-module display settings declared under the `pmn` extra-field block.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExtensionSettingsRaw {
    pub hidden: Hidden,
    pub use_markdown: bool,
    pub template_override: Option<String>,
}

/// One declared menu entry (`menu_data` item).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionInfoRaw {
    #[serde(rename = "func")]
    pub label: IndexedText,
    pub trigger_method: String,
    pub trigger_condition: String,
    #[serde(rename = "brief_des")]
    pub brief_description: String,
    #[serde(rename = "detail_des")]
    pub detailed_description: String,
    #[serde(default, rename = "pmn_hidden")]
    pub hidden: Hidden,
    #[serde(default, rename = "pmn_template")]
    pub template_override: Option<String>,
}

/// Collected metadata of one loaded module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleInfoRaw {
    /// Normalized display name; never empty.
    pub name: IndexedText,
    /// Display author line, multiple authors joined with `" & "`.
    pub author: Option<String>,
    pub version: Option<String>,
    pub description: Option<String>,
    pub usage: Option<String>,
    pub functions: Vec<FunctionInfoRaw>,
    pub extension: ExtensionSettingsRaw,
}

/// [`ExtensionSettingsRaw`] with the hidden flag evaluated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExtensionSettings {
    pub hidden_resolved: bool,
    pub use_markdown: bool,
    pub template_override: Option<String>,
}

/// [`FunctionInfoRaw`] with the hidden flag evaluated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FunctionInfo {
    pub label: IndexedText,
    pub trigger_method: String,
    pub trigger_condition: String,
    pub brief_description: String,
    pub detailed_description: String,
    pub hidden_resolved: bool,
    pub template_override: Option<String>,
}

impl FunctionInfo {
    pub(crate) fn from_raw(raw: &FunctionInfoRaw, hidden_resolved: bool) -> Self {
        Self {
            label: raw.label.clone(),
            trigger_method: raw.trigger_method.clone(),
            trigger_condition: raw.trigger_condition.clone(),
            brief_description: raw.brief_description.clone(),
            detailed_description: raw.detailed_description.clone(),
            hidden_resolved,
            template_override: raw.template_override.clone(),
        }
    }
}

/// Per-request view of a [`ModuleInfoRaw`].
///
/// Holds a weak back-reference to the module object it was collected from;
/// the registry never keeps a module alive on its own.
#[derive(Debug, Clone, Serialize)]
pub struct ModuleInfo {
    pub name: IndexedText,
    pub author: Option<String>,
    pub version: Option<String>,
    pub description: Option<String>,
    pub usage: Option<String>,
    pub functions: Vec<FunctionInfo>,
    pub extension: ExtensionSettings,
    #[serde(skip)]
    module: Weak<dyn LoadedModule>,
}

impl ModuleInfo {
    pub(crate) fn new(
        raw: &ModuleInfoRaw,
        functions: Vec<FunctionInfo>,
        extension: ExtensionSettings,
        module: Weak<dyn LoadedModule>,
    ) -> Self {
        Self {
            name: raw.name.clone(),
            author: raw.author.clone(),
            version: raw.version.clone(),
            description: raw.description.clone(),
            usage: raw.usage.clone(),
            functions,
            extension,
            module,
        }
    }

    /// The source module, or `None` once the host has unloaded it.
    pub fn module(&self) -> Option<Arc<dyn LoadedModule>> {
        self.module.upgrade()
    }

    pub fn is_hidden(&self) -> bool {
        self.extension.hidden_resolved
    }
}

impl PartialEq for ModuleInfo {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.author == other.author
            && self.version == other.version
            && self.description == other.description
            && self.usage == other.usage
            && self.functions == other.functions
            && self.extension == other.extension
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn deferred_target_substitutes_own_namespace() {
        let expr = DeferredExpr::new("~.perm:is_admin");
        let (module, callable) = expr.target("nonebot_plugin_status").unwrap();
        assert_eq!(module, "nonebot_plugin_status.perm");
        assert_eq!(callable, "is_admin");
    }

    #[test]
    fn deferred_target_rejects_malformed() {
        assert!(DeferredExpr::new("no_separator").target("x").is_err());
        assert!(DeferredExpr::new("a:b:c").target("x").is_err());
        assert!(DeferredExpr::new(":b").target("x").is_err());
        assert!(DeferredExpr::new("a:").target("x").is_err());
    }

    #[test]
    fn hidden_accepts_bool_or_string() {
        let literal: Hidden = serde_json::from_value(json!(true)).unwrap();
        assert_eq!(literal, Hidden::Literal(true));
        let deferred: Hidden = serde_json::from_value(json!("~:check")).unwrap();
        assert_eq!(deferred, Hidden::Deferred(DeferredExpr::new("~:check")));
        assert!(serde_json::from_value::<Hidden>(json!(3)).is_err());
    }

    #[test]
    fn function_entry_uses_declared_field_names() {
        let raw: FunctionInfoRaw = serde_json::from_value(json!({
            "func": "状态",
            "trigger_method": "command",
            "trigger_condition": "/status",
            "brief_des": "Show status",
            "detail_des": "Shows process status",
            "pmn_hidden": "~:is_admin",
        }))
        .unwrap();
        assert_eq!(raw.label.as_str(), "状态");
        assert_eq!(raw.brief_description, "Show status");
        assert_eq!(raw.hidden, Hidden::Deferred(DeferredExpr::new("~:is_admin")));
        assert_eq!(raw.template_override, None);
    }
}
