//! # picmenu-index
//!
//! Metadata collection, resolution, and indexing for a bot's plugin help menu.
//!
//! The host application loads modules (plugins); this crate reads what each
//! module declares about itself, normalizes it into a uniform record, sorts
//! the records by a transliteration-aware index key, and serves them to menu
//! front-ends. Visibility flags may be deferred to a callable that is only
//! evaluated while a request is being handled.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌─────────────┐   ┌──────────────┐
//! │ ModuleHost  │──▶│  Extractor  │──▶│   Registry   │
//! │ (manifests) │   │ name/author │   │ ArcSwap snap │
//! └─────────────┘   └─────────────┘   └──────┬───────┘
//!                                            │ list_resolved
//!                      ┌─────────────────────┤
//!                      ▼                     ▼
//!               ┌─────────────┐       ┌────────────┐
//!               │  Resolver   │       │   Lookup   │
//!               │ deferred ⇒  │       │ fuzzy find │
//!               │    bool     │       └────────────┘
//!               └─────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! picmenu list                        # visible modules, sorted
//! picmenu list --raw                  # collected snapshot, unresolved
//! picmenu find caidan --functions     # approximate lookup
//! picmenu show status --as alice      # resolve as a specific caller
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`text_index`] | Transliteration-aware sort keys |
//! | [`models`] | Raw and resolved metadata types |
//! | [`host`] | Traits the host application implements |
//! | [`extract`] | Metadata normalization and collection |
//! | [`resolve`] | Deferred field resolution and request context |
//! | [`registry`] | Snapshot holder |
//! | [`search`] | Approximate lookup and selection |
//! | [`manifest`] | TOML manifest–backed module host |
//! | [`menu`] | CLI command implementations |

pub mod config;
pub mod extract;
pub mod host;
pub mod manifest;
pub mod menu;
pub mod models;
pub mod registry;
pub mod resolve;
pub mod search;
pub mod text_index;
