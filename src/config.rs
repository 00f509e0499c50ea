use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::extract::{NameNormalizer, DEFAULT_STRIP_PREFIX};
use crate::search::{LookupScope, DEFAULT_THRESHOLD};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub modules: ModulesConfig,
    #[serde(default)]
    pub naming: NamingConfig,
    #[serde(default)]
    pub lookup: LookupConfig,
    #[serde(default)]
    pub menu: MenuConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ModulesConfig {
    #[serde(default = "default_module_dirs")]
    pub dirs: Vec<PathBuf>,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

impl Default for ModulesConfig {
    fn default() -> Self {
        Self {
            dirs: default_module_dirs(),
            include_globs: default_include_globs(),
            follow_symlinks: false,
        }
    }
}

fn default_module_dirs() -> Vec<PathBuf> {
    vec![PathBuf::from("./modules")]
}

fn default_include_globs() -> Vec<String> {
    vec!["**/*.toml".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
pub struct NamingConfig {
    #[serde(default = "default_strip_prefix")]
    pub strip_prefix: String,
}

impl Default for NamingConfig {
    fn default() -> Self {
        Self {
            strip_prefix: default_strip_prefix(),
        }
    }
}

fn default_strip_prefix() -> String {
    DEFAULT_STRIP_PREFIX.to_string()
}

impl NamingConfig {
    pub fn normalizer(&self) -> Result<NameNormalizer> {
        NameNormalizer::new(&self.strip_prefix)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LookupConfig {
    #[serde(default)]
    pub scope: LookupScope,
    #[serde(default = "default_threshold")]
    pub threshold: f64,
}

impl Default for LookupConfig {
    fn default() -> Self {
        Self {
            scope: LookupScope::default(),
            threshold: default_threshold(),
        }
    }
}

fn default_threshold() -> f64 {
    DEFAULT_THRESHOLD
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct MenuConfig {
    #[serde(default)]
    pub include_hidden: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_filter")]
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_filter(),
        }
    }
}

fn default_filter() -> String {
    "info".to_string()
}

impl Config {
    /// Configuration used when no config file is present.
    pub fn minimal() -> Self {
        Self::default()
    }
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    // Validate lookup
    if !(config.lookup.threshold > 0.0 && config.lookup.threshold <= 1.0) {
        anyhow::bail!("lookup.threshold must be in (0.0, 1.0]");
    }

    // Validate naming
    config
        .naming
        .normalizer()
        .with_context(|| "naming.strip_prefix must be a valid regex")?;

    if config.modules.include_globs.is_empty() {
        anyhow::bail!("modules.include_globs must not be empty");
    }

    Ok(config)
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}
