//! Approximate lookup over module names and function labels.
//!
//! Every candidate is scored against the query on three corpora: the
//! case-folded display text, its flattened index key (`"cai4 dan1"`) and
//! the key's plain reading (`"caidan"`). The best of the three counts.
//!
//! | Match | Score |
//! |-------|-------|
//! | exact | `3.0` |
//! | substring | `2.0 + len(query) / len(corpus)` |
//! | otherwise | Jaro-Winkler similarity in `[0.0, 1.0]` |
//!
//! Exact and substring matches always rank above approximate ones and are
//! never cut by the threshold. Equal scores keep the candidates' original
//! order, which for registry output is the name-sorted order.

use serde::Deserialize;
use std::cmp::Ordering;

use crate::models::{FunctionInfo, ModuleInfo};
use crate::text_index::IndexedText;

/// Minimum approximate similarity for a candidate to be returned.
pub const DEFAULT_THRESHOLD: f64 = 0.6;

const EXACT_SCORE: f64 = 3.0;
const SUBSTRING_SCORE: f64 = 2.0;

/// Which labels a lookup searches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LookupScope {
    /// Module names only.
    #[default]
    Modules,
    /// Module names and function labels.
    Functions,
}

/// A candidate with its score and position in the input.
#[derive(Debug, Clone, Copy)]
pub struct Ranked<'a, T> {
    pub item: &'a T,
    pub index: usize,
    pub score: f64,
}

/// Score `text` against an already case-folded, trimmed query.
fn score_folded(query: &str, text: &IndexedText) -> f64 {
    if query.is_empty() {
        return 0.0;
    }
    let key = text.key();
    let corpora = [
        text.folded(),
        key.to_string().to_lowercase(),
        key.plain().to_lowercase(),
    ];
    corpora
        .iter()
        .map(|corpus| {
            if corpus == query {
                EXACT_SCORE
            } else if corpus.contains(query) {
                SUBSTRING_SCORE + query.chars().count() as f64 / corpus.chars().count() as f64
            } else {
                strsim::jaro_winkler(query, corpus)
            }
        })
        .fold(0.0, f64::max)
}

/// Score `text` against `query`.
pub fn score(query: &str, text: &IndexedText) -> f64 {
    score_folded(&query.trim().to_lowercase(), text)
}

/// Rank `candidates` by how well `key_fn(candidate)` matches `query`.
pub fn find<'a, T, F>(
    query: &str,
    candidates: &'a [T],
    key_fn: F,
    threshold: f64,
) -> Vec<Ranked<'a, T>>
where
    F: Fn(&T) -> &IndexedText,
{
    let query = query.trim().to_lowercase();
    if query.is_empty() {
        return Vec::new();
    }

    let mut ranked: Vec<Ranked<'a, T>> = candidates
        .iter()
        .enumerate()
        .map(|(index, item)| Ranked {
            item,
            index,
            score: score_folded(&query, key_fn(item)),
        })
        .filter(|r| r.score >= threshold)
        .collect();

    // Stable: equal scores keep input order.
    ranked.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
    ranked
}

/// Resolve a front-end selector to one candidate: a 1-based index, else a
/// case-insensitive exact match, else the best approximate match.
pub fn select<'a, T, F>(
    selector: &str,
    candidates: &'a [T],
    key_fn: F,
    threshold: f64,
) -> Option<(usize, &'a T)>
where
    F: Fn(&T) -> &IndexedText,
{
    let selector = selector.trim();
    if selector.is_empty() {
        return None;
    }

    if let Ok(n) = selector.parse::<usize>() {
        if (1..=candidates.len()).contains(&n) {
            return Some((n - 1, &candidates[n - 1]));
        }
    }

    let folded = selector.to_lowercase();
    if let Some(found) = candidates
        .iter()
        .enumerate()
        .find(|(_, c)| key_fn(c).folded() == folded)
    {
        return Some(found);
    }

    find(selector, candidates, key_fn, threshold)
        .first()
        .map(|r| (r.index, r.item))
}

/// A lookup result: a module, or one of its functions.
#[derive(Debug, Clone, Copy)]
pub struct Hit<'a> {
    pub module: &'a ModuleInfo,
    pub function: Option<&'a FunctionInfo>,
    pub score: f64,
}

impl Hit<'_> {
    pub fn label(&self) -> &IndexedText {
        match self.function {
            Some(function) => &function.label,
            None => &self.module.name,
        }
    }
}

/// Rank resolved modules (and, depending on `scope`, their functions)
/// against `query`.
pub fn lookup<'a>(
    query: &str,
    modules: &'a [ModuleInfo],
    scope: LookupScope,
    threshold: f64,
) -> Vec<Hit<'a>> {
    let mut candidates: Vec<(&'a ModuleInfo, Option<&'a FunctionInfo>)> = Vec::new();
    for module in modules {
        candidates.push((module, None));
        if scope == LookupScope::Functions {
            candidates.extend(module.functions.iter().map(|f| (module, Some(f))));
        }
    }

    find(
        query,
        &candidates,
        |(module, function)| match function {
            Some(function) => &function.label,
            None => &module.name,
        },
        threshold,
    )
    .into_iter()
    .map(|r| Hit {
        module: r.item.0,
        function: r.item.1,
        score: r.score,
    })
    .collect()
}
