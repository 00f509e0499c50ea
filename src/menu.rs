//! `picmenu` command implementations.
//!
//! Each `run_*` function loads the module host described by the config,
//! refreshes a [`Registry`] once, and prints either a human-readable table
//! or JSON (`--json`) to stdout. When a caller is given (`--as`), every
//! resolved read runs inside a [`RequestContext`] for that caller, so
//! deferred visibility rules see who is asking.

use anyhow::{bail, Result};
use serde::Serialize;
use std::sync::Arc;

use crate::config::Config;
use crate::manifest::ManifestHost;
use crate::models::{FunctionInfo, Hidden, ModuleInfo};
use crate::registry::Registry;
use crate::resolve::RequestContext;
use crate::search::{self, LookupScope};

/// Flags shared by every read command.
#[derive(Debug, Clone, Default)]
pub struct ReadOptions {
    pub include_hidden: bool,
    pub caller: Option<String>,
    pub json: bool,
}

impl ReadOptions {
    fn include_hidden(&self, config: &Config) -> bool {
        self.include_hidden || config.menu.include_hidden
    }
}

/// Build a registry over the configured manifest directories and collect
/// once.
pub async fn open_registry(config: &Config) -> Result<Registry> {
    let host = Arc::new(ManifestHost::load(&config.modules)?);
    let registry = Registry::with_names(host.clone(), host, config.naming.normalizer()?);
    registry.refresh().await?;
    Ok(registry)
}

/// Resolve the current snapshot on behalf of `caller`, if any.
pub async fn resolve_as(
    registry: &Registry,
    include_hidden: bool,
    caller: Option<&str>,
) -> Vec<ModuleInfo> {
    let read = registry.list_resolved(include_hidden);
    match caller {
        Some(caller) => RequestContext::for_caller(caller).scope(read).await,
        None => read.await,
    }
}

#[derive(Serialize)]
struct HitRow<'a> {
    module: &'a str,
    function: Option<&'a str>,
    score: f64,
}

// ═══════════════════════════════════════════════════════════════════════
// list
// ═══════════════════════════════════════════════════════════════════════

pub async fn run_list(config: &Config, opts: &ReadOptions, raw: bool) -> Result<()> {
    let registry = open_registry(config).await?;

    if raw {
        let snapshot = registry.list_raw();
        if opts.json {
            println!("{}", serde_json::to_string_pretty(snapshot.infos())?);
            return Ok(());
        }
        if snapshot.is_empty() {
            println!("No modules.");
            return Ok(());
        }
        println!("{:>3}  {:<28} {:<24} HIDDEN", "#", "NAME", "KEY");
        for (i, info) in snapshot.infos().iter().enumerate() {
            println!(
                "{:>3}  {:<28} {:<24} {}",
                i + 1,
                info.name,
                info.name.key().to_string(),
                describe_hidden(&info.extension.hidden)
            );
        }
        return Ok(());
    }

    let modules = resolve_as(
        &registry,
        opts.include_hidden(config),
        opts.caller.as_deref(),
    )
    .await;

    if opts.json {
        println!("{}", serde_json::to_string_pretty(&modules)?);
        return Ok(());
    }
    if modules.is_empty() {
        println!("No modules.");
        return Ok(());
    }

    println!(
        "{:>3}  {:<28} {:<10} {:<20} FUNCTIONS",
        "#", "NAME", "VERSION", "AUTHOR"
    );
    for (i, module) in modules.iter().enumerate() {
        let marker = if module.is_hidden() { " (hidden)" } else { "" };
        println!(
            "{:>3}  {:<28} {:<10} {:<20} {}{}",
            i + 1,
            module.name,
            module.version.as_deref().unwrap_or("-"),
            module.author.as_deref().unwrap_or("-"),
            module.functions.len(),
            marker
        );
    }
    Ok(())
}

fn describe_hidden(hidden: &Hidden) -> String {
    match hidden {
        Hidden::Literal(value) => value.to_string(),
        Hidden::Deferred(expr) => format!("deferred({})", expr),
    }
}

// ═══════════════════════════════════════════════════════════════════════
// find
// ═══════════════════════════════════════════════════════════════════════

pub async fn run_find(
    config: &Config,
    query: &str,
    functions: bool,
    opts: &ReadOptions,
) -> Result<()> {
    let registry = open_registry(config).await?;
    let modules = resolve_as(
        &registry,
        opts.include_hidden(config),
        opts.caller.as_deref(),
    )
    .await;

    let scope = if functions {
        LookupScope::Functions
    } else {
        config.lookup.scope
    };
    let hits = search::lookup(query, &modules, scope, config.lookup.threshold);

    if opts.json {
        let rows: Vec<HitRow> = hits
            .iter()
            .map(|hit| HitRow {
                module: hit.module.name.as_str(),
                function: hit.function.map(|f| f.label.as_str()),
                score: hit.score,
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    if hits.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, hit) in hits.iter().enumerate() {
        match hit.function {
            Some(function) => println!(
                "{}. [{:.2}] {} / {}",
                i + 1,
                hit.score,
                hit.module.name,
                function.label
            ),
            None => println!("{}. [{:.2}] {}", i + 1, hit.score, hit.module.name),
        }
    }
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════
// show
// ═══════════════════════════════════════════════════════════════════════

pub async fn run_show(
    config: &Config,
    module_selector: &str,
    function_selector: Option<&str>,
    opts: &ReadOptions,
) -> Result<()> {
    let registry = open_registry(config).await?;
    let modules = resolve_as(
        &registry,
        opts.include_hidden(config),
        opts.caller.as_deref(),
    )
    .await;
    let threshold = config.lookup.threshold;

    let Some((_, module)) = search::select(module_selector, &modules, |m| &m.name, threshold)
    else {
        bail!("No module matches '{}'", module_selector);
    };

    match function_selector {
        Some(selector) => {
            let Some((_, function)) =
                search::select(selector, &module.functions, |f| &f.label, threshold)
            else {
                bail!("Module '{}' has no function matching '{}'", module.name, selector);
            };
            if opts.json {
                println!("{}", serde_json::to_string_pretty(function)?);
            } else {
                print_function(function);
            }
        }
        None => {
            if opts.json {
                println!("{}", serde_json::to_string_pretty(module)?);
            } else {
                print_module(module);
            }
        }
    }
    Ok(())
}

fn print_module(module: &ModuleInfo) {
    println!("--- Module ---");
    println!("name:        {}", module.name);
    println!("key:         {}", module.name.key());
    if let Some(ref author) = module.author {
        println!("author:      {}", author);
    }
    if let Some(ref version) = module.version {
        println!("version:     {}", version);
    }
    println!("hidden:      {}", module.is_hidden());
    println!("markdown:    {}", module.extension.use_markdown);
    if let Some(ref template) = module.extension.template_override {
        println!("template:    {}", template);
    }
    if let Some(ref description) = module.description {
        println!();
        println!("{}", description);
    }
    if let Some(ref usage) = module.usage {
        println!();
        println!("--- Usage ---");
        println!("{}", usage);
    }
    println!();

    println!("--- Functions ({}) ---", module.functions.len());
    for (i, function) in module.functions.iter().enumerate() {
        println!(
            "{:>3}. {} [{}: {}]",
            i + 1,
            function.label,
            function.trigger_method,
            function.trigger_condition
        );
        if !function.brief_description.is_empty() {
            println!("     {}", function.brief_description);
        }
    }
}

fn print_function(function: &FunctionInfo) {
    println!("--- Function ---");
    println!("label:     {}", function.label);
    println!("trigger:   {} {}", function.trigger_method, function.trigger_condition);
    println!("hidden:    {}", function.hidden_resolved);
    if let Some(ref template) = function.template_override {
        println!("template:  {}", template);
    }
    println!();
    println!("{}", function.brief_description);
    if !function.detailed_description.is_empty() {
        println!();
        println!("{}", function.detailed_description);
    }
}
