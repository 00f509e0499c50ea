//! Metadata extraction from loaded modules.
//!
//! [`MetadataExtractor`] turns one [`LoadedModule`] into a [`ModuleInfoRaw`]
//! by combining three sources, in order of preference:
//!
//! 1. the `extra` fields of the module's declared metadata (`author`,
//!    `version`, `menu_data`, `pmn`),
//! 2. the declared metadata itself and attributes of the module,
//! 3. installed-package distribution metadata, fetched lazily and at most
//!    once per module.
//!
//! Every source is optional and tolerated when malformed. A garbage `pmn`
//! block means "no extension data", a malformed `menu_data` entry is dropped
//! on its own, and a module whose extraction fails outright is left out of
//! the batch without affecting its siblings.

use anyhow::{Context, Result};
use futures::future::join_all;
use futures::FutureExt;
use regex::Regex;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::host::{Distribution, LoadedModule, ModuleHost};
use crate::models::{ExtensionSettingsRaw, FunctionInfoRaw, Hidden, ModuleInfoRaw};
use crate::text_index::IndexedText;

/// Installer-name prefix stripped from display names (`nonebot-plugin-foo` → `foo`).
pub const DEFAULT_STRIP_PREFIX: &str = r"^[A-Za-z0-9]+[-_]plugin[-_]";

const NAME_SEPARATORS: [char; 4] = ['-', '_', '.', ':'];

// ═══════════════════════════════════════════════════════════════════════
// Name / author normalization
// ═══════════════════════════════════════════════════════════════════════

/// Normalizes package-style identifiers into display names.
#[derive(Debug, Clone)]
pub struct NameNormalizer {
    prefix: Regex,
}

impl NameNormalizer {
    pub fn new(strip_prefix: &str) -> Result<Self> {
        let prefix = Regex::new(strip_prefix)
            .with_context(|| format!("Invalid name prefix pattern: {}", strip_prefix))?;
        Ok(Self { prefix })
    }

    /// Strip the installer prefix, turn separators into spaces, and
    /// title-case names that are all-ASCII and entirely lower-case.
    pub fn normalize(&self, name: &str) -> String {
        let mut name = name.trim();
        if let Some(m) = self.prefix.find(name) {
            if m.start() == 0 && m.end() < name.len() {
                name = &name[m.end()..];
            }
        }

        let replaced: String = name
            .chars()
            .map(|c| if NAME_SEPARATORS.contains(&c) { ' ' } else { c })
            .collect();
        let replaced = replaced.trim().to_string();

        let all_lower = replaced.is_ascii()
            && replaced.chars().any(|c| c.is_ascii_lowercase())
            && !replaced.chars().any(|c| c.is_ascii_uppercase());
        if all_lower {
            title_case(&replaced)
        } else {
            replaced
        }
    }
}

impl Default for NameNormalizer {
    fn default() -> Self {
        Self {
            prefix: Regex::new(DEFAULT_STRIP_PREFIX).expect("default prefix pattern is valid"),
        }
    }
}

fn title_case(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut prev_alpha = false;
    for c in text.chars() {
        if c.is_ascii_alphabetic() && !prev_alpha {
            out.push(c.to_ascii_uppercase());
        } else {
            out.push(c);
        }
        prev_alpha = c.is_ascii_alphabetic();
    }
    out
}

/// Clean up a package-metadata person field such as
/// `"Jane Doe <jane@example.com>, 'Bob' <bob@example.com>"`.
///
/// Only the first person is kept unless `allow_multi` is set, in which case
/// everyone is joined with `" & "`.
pub fn normalize_metadata_user(info: &str, allow_multi: bool) -> String {
    let people = info.split(',');
    let take = if allow_multi { usize::MAX } else { 1 };
    people
        .take(take)
        .map(|person| {
            let before_email = person.split('<').next().unwrap_or_default();
            before_email
                .trim()
                .trim_matches(|c| c == '\'' || c == '"')
                .trim()
                .to_string()
        })
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join(" & ")
}

// ═══════════════════════════════════════════════════════════════════════
// Extra fields
// ═══════════════════════════════════════════════════════════════════════

/// `pmn` block as declared; `hidden` stays optional so an explicit value
/// can be told apart from the default.
#[derive(Debug, Deserialize)]
struct ExtensionBlock {
    #[serde(default)]
    hidden: Option<Hidden>,
    #[serde(default)]
    markdown: bool,
    #[serde(default)]
    template: Option<String>,
}

#[derive(Debug, Default)]
struct ExtraFields {
    author: Option<String>,
    version: Option<String>,
    functions: Option<Vec<FunctionInfoRaw>>,
    extension: Option<ExtensionBlock>,
}

fn parse_extra(module_id: &str, extra: &Value) -> ExtraFields {
    let map = match extra {
        Value::Object(map) => map,
        Value::Null => return ExtraFields::default(),
        other => {
            warn!(
                module = %module_id,
                kind = value_kind(other),
                "Ignoring extra metadata: expected a mapping"
            );
            return ExtraFields::default();
        }
    };

    ExtraFields {
        author: parse_author(module_id, map),
        version: parse_version(module_id, map),
        functions: map
            .get("menu_data")
            .and_then(|v| parse_functions(module_id, v)),
        extension: map.get("pmn").and_then(|v| parse_extension(module_id, v)),
    }
}

fn parse_author(module_id: &str, map: &Map<String, Value>) -> Option<String> {
    let value = map.get("author").or_else(|| {
        map.iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("author"))
            .map(|(_, v)| v)
    })?;

    let author = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Array(items) => {
            let names: Option<Vec<&str>> = items.iter().map(Value::as_str).collect();
            match names {
                Some(names) => names
                    .iter()
                    .map(|n| n.trim())
                    .filter(|n| !n.is_empty())
                    .collect::<Vec<_>>()
                    .join(" & "),
                None => {
                    warn!(module = %module_id, "Ignoring author list with non-string entries");
                    return None;
                }
            }
        }
        Value::Null => return None,
        other => {
            warn!(module = %module_id, kind = value_kind(other), "Ignoring malformed author field");
            return None;
        }
    };
    (!author.is_empty()).then_some(author)
}

fn parse_version(module_id: &str, map: &Map<String, Value>) -> Option<String> {
    match map.get("version")? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::String(_) | Value::Null => None,
        other => {
            warn!(module = %module_id, kind = value_kind(other), "Ignoring malformed version field");
            None
        }
    }
}

fn parse_functions(module_id: &str, value: &Value) -> Option<Vec<FunctionInfoRaw>> {
    let items = match value {
        Value::Array(items) => items,
        Value::Null => return None,
        other => {
            warn!(module = %module_id, kind = value_kind(other), "Ignoring malformed menu_data");
            return None;
        }
    };

    let functions = items
        .iter()
        .enumerate()
        .filter_map(|(idx, item)| {
            match serde_json::from_value::<FunctionInfoRaw>(item.clone()) {
                Ok(func) => Some(func),
                Err(e) => {
                    warn!(
                        module = %module_id,
                        index = idx,
                        error = %e,
                        "Dropping malformed menu entry"
                    );
                    None
                }
            }
        })
        .collect();
    Some(functions)
}

fn parse_extension(module_id: &str, value: &Value) -> Option<ExtensionBlock> {
    if value.is_null() {
        return None;
    }
    match serde_json::from_value::<ExtensionBlock>(value.clone()) {
        Ok(block) => Some(block),
        Err(e) => {
            warn!(
                module = %module_id,
                error = %e,
                "Ignoring malformed extension settings"
            );
            None
        }
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn non_blank(s: &str) -> Option<String> {
    let s = s.trim();
    (!s.is_empty()).then(|| s.to_string())
}

// ═══════════════════════════════════════════════════════════════════════
// Extractor
// ═══════════════════════════════════════════════════════════════════════

/// Builds [`ModuleInfoRaw`] values from loaded modules.
pub struct MetadataExtractor {
    host: Arc<dyn ModuleHost>,
    names: NameNormalizer,
}

impl MetadataExtractor {
    pub fn new(host: Arc<dyn ModuleHost>, names: NameNormalizer) -> Self {
        Self { host, names }
    }

    /// Extract one module; failures and panics are logged and yield `None`.
    pub async fn extract(&self, module: &dyn LoadedModule) -> Option<ModuleInfoRaw> {
        let outcome = AssertUnwindSafe(self.try_extract(module))
            .catch_unwind()
            .await;
        match outcome {
            Ok(Ok(info)) => Some(info),
            Ok(Err(e)) => {
                warn!(module = %safe_id(module), error = %format!("{:#}", e), "Failed to get module info");
                None
            }
            Err(_) => {
                warn!(module = %safe_id(module), "Module info extraction panicked");
                None
            }
        }
    }

    /// Extract one module, surfacing the first hard failure.
    pub async fn try_extract(&self, module: &dyn LoadedModule) -> Result<ModuleInfoRaw> {
        let id = module.internal_identifier();
        let meta = module.declared_metadata();
        let extra = meta
            .map(|m| parse_extra(id, &m.extra))
            .unwrap_or_default();

        let name = self.display_name(id, meta.map(|m| m.name.as_str()))?;

        let dist = OnceCell::new();
        let get_dist = || {
            dist.get_or_init(|| async {
                match self.host.distribution(module.namespace_path()).await {
                    Ok(d) => d,
                    Err(e) => {
                        warn!(
                            module = %id,
                            namespace = %module.namespace_path(),
                            error = %format!("{:#}", e),
                            "Failed to get distribution info"
                        );
                        None
                    }
                }
            })
        };

        let mut version = extra.version.clone();
        if version.is_none() {
            version = module.version_attribute().and_then(non_blank);
        }
        if version.is_none() {
            version = get_dist()
                .await
                .as_ref()
                .and_then(|d| d.version.as_deref())
                .and_then(non_blank);
        }

        let mut author = extra.author.clone();
        if author.is_none() {
            author = get_dist().await.as_ref().and_then(author_from_distribution);
        }

        let mut description = meta.and_then(|m| non_blank(&m.description));
        if description.is_none() {
            description = get_dist()
                .await
                .as_ref()
                .and_then(|d| d.field("Summary"))
                .and_then(non_blank);
        }

        let usage = meta.and_then(|m| non_blank(&m.usage));

        let is_library = meta.map(|m| m.is_library()).unwrap_or(false);
        let extension = match extra.extension {
            Some(block) => ExtensionSettingsRaw {
                hidden: block.hidden.unwrap_or(Hidden::Literal(is_library)),
                use_markdown: block.markdown,
                template_override: block.template,
            },
            None => ExtensionSettingsRaw {
                hidden: Hidden::Literal(is_library),
                ..Default::default()
            },
        };

        debug!(module = %id, "Completed to get module info");
        Ok(ModuleInfoRaw {
            name: IndexedText::new(name),
            author,
            version,
            description,
            usage,
            functions: extra.functions.unwrap_or_default(),
            extension,
        })
    }

    fn display_name(&self, id: &str, declared: Option<&str>) -> Result<String> {
        let candidates = declared
            .into_iter()
            .map(|n| self.names.normalize(n))
            .chain(std::iter::once(self.names.normalize(id)))
            .chain(std::iter::once(id.trim().to_string()));
        for candidate in candidates {
            if !candidate.is_empty() {
                return Ok(candidate);
            }
        }
        anyhow::bail!("module has neither a usable name nor an identifier")
    }

    /// Extract every module concurrently and return the survivors sorted by
    /// the index key of their display name. Equal keys keep load order.
    pub async fn collect(
        &self,
        modules: &[Arc<dyn LoadedModule>],
    ) -> Vec<(ModuleInfoRaw, Weak<dyn LoadedModule>)> {
        let results = join_all(modules.iter().map(|module| async move {
            self.extract(module.as_ref())
                .await
                .map(|info| (info, Arc::downgrade(module)))
        }))
        .await;

        let mut infos: Vec<_> = results.into_iter().flatten().collect();
        info!(
            collected = infos.len(),
            loaded = modules.len(),
            "Collected module infos"
        );
        infos.sort_by(|(a, _), (b, _)| a.name.key().cmp(b.name.key()));
        infos
    }
}

fn author_from_distribution(dist: &Distribution) -> Option<String> {
    let author = if let Some(person) = dist.field("Author").or_else(|| dist.field("Maintainer")) {
        normalize_metadata_user(person, false)
    } else if let Some(emails) = dist
        .field("Author-Email")
        .or_else(|| dist.field("Maintainer-Email"))
    {
        normalize_metadata_user(emails, true)
    } else {
        return None;
    };
    (!author.is_empty()).then_some(author)
}

/// The module identifier, without letting a panicking host take the log
/// line down with it.
fn safe_id(module: &dyn LoadedModule) -> String {
    std::panic::catch_unwind(AssertUnwindSafe(|| module.internal_identifier().to_string()))
        .unwrap_or_else(|_| "<unknown>".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn strips_prefix_and_title_cases() {
        let names = NameNormalizer::default();
        assert_eq!(names.normalize("nonebot_plugin_status_report"), "Status Report");
        assert_eq!(names.normalize("nonebot-plugin-picmenu-next"), "Picmenu Next");
        assert_eq!(names.normalize("my.pkg:tool"), "My Pkg Tool");
    }

    #[test]
    fn keeps_intentional_casing() {
        let names = NameNormalizer::default();
        assert_eq!(names.normalize("PicMenuNext"), "PicMenuNext");
        assert_eq!(names.normalize("picMenu"), "picMenu");
        assert_eq!(names.normalize("图片菜单"), "图片菜单");
        assert_eq!(names.normalize("图片_menu"), "图片 menu");
    }

    #[test]
    fn prefix_alone_is_not_stripped() {
        let names = NameNormalizer::default();
        assert_eq!(names.normalize("nonebot-plugin-"), "Nonebot Plugin");
    }

    #[test]
    fn title_case_restarts_after_digits() {
        assert_eq!(title_case("abc2def ghi"), "Abc2Def Ghi");
    }

    #[test]
    fn custom_prefix_pattern() {
        let names = NameNormalizer::new("^acme-").unwrap();
        assert_eq!(names.normalize("acme-weather"), "Weather");
        assert!(NameNormalizer::new("(").is_err());
    }

    #[test]
    fn metadata_user_first_only() {
        assert_eq!(
            normalize_metadata_user("Jane Doe <jane@example.com>, Bob <bob@example.com>", false),
            "Jane Doe"
        );
    }

    #[test]
    fn metadata_user_multi_strips_quotes() {
        assert_eq!(
            normalize_metadata_user("\"Jane Doe\" <jane@example.com>, 'Bob' <bob@example.com>", true),
            "Jane Doe & Bob"
        );
    }

    #[test]
    fn extra_author_key_is_case_insensitive() {
        let extra = parse_extra("m", &json!({ "Author": "student" }));
        assert_eq!(extra.author.as_deref(), Some("student"));
        let extra = parse_extra("m", &json!({ "author": ["a", "b"] }));
        assert_eq!(extra.author.as_deref(), Some("a & b"));
        let extra = parse_extra("m", &json!({ "author": 42 }));
        assert_eq!(extra.author, None);
    }

    #[test]
    fn garbage_extra_is_no_extension_data() {
        let extra = parse_extra("m", &json!("not a mapping"));
        assert!(extra.extension.is_none());
        assert!(extra.functions.is_none());

        let extra = parse_extra("m", &json!({ "pmn": { "hidden": [1, 2] }, "version": "1.0" }));
        assert!(extra.extension.is_none());
        assert_eq!(extra.version.as_deref(), Some("1.0"));
    }

    #[test]
    fn malformed_menu_entry_dropped_alone() {
        let extra = parse_extra(
            "m",
            &json!({
                "menu_data": [
                    {
                        "func": "ok",
                        "trigger_method": "cmd",
                        "trigger_condition": "/ok",
                        "brief_des": "b",
                        "detail_des": "d"
                    },
                    { "func": "missing fields" },
                    "garbage"
                ]
            }),
        );
        let functions = extra.functions.unwrap();
        assert_eq!(functions.len(), 1);
        assert_eq!(functions[0].label.as_str(), "ok");
    }

    #[test]
    fn explicit_hidden_is_kept_apart_from_default() {
        let extra = parse_extra("m", &json!({ "pmn": { "markdown": true } }));
        let block = extra.extension.unwrap();
        assert!(block.hidden.is_none());
        assert!(block.markdown);

        let extra = parse_extra("m", &json!({ "pmn": { "hidden": false } }));
        assert_eq!(extra.extension.unwrap().hidden, Some(Hidden::Literal(false)));
    }

    #[test]
    fn author_prefers_name_fields_over_email() {
        let mut dist = Distribution::default();
        dist.metadata
            .insert("Author-Email".into(), "A <a@x.io>, B <b@x.io>".into());
        assert_eq!(author_from_distribution(&dist).as_deref(), Some("A & B"));
        dist.metadata.insert("Maintainer".into(), "M <m@x.io>".into());
        assert_eq!(author_from_distribution(&dist).as_deref(), Some("M"));
    }
}
