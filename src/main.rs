//! # picmenu CLI
//!
//! The `picmenu` binary inspects the plugin menu index for a directory of
//! module manifests: it collects every module, sorts it, resolves deferred
//! visibility rules for a given caller, and prints the result.
//!
//! ## Usage
//!
//! ```bash
//! picmenu --config ./config/picmenu.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `picmenu list` | List modules in index order |
//! | `picmenu find <query>` | Approximate lookup over names and labels |
//! | `picmenu show <module> [<function>]` | Show one module or function |
//!
//! ## Examples
//!
//! ```bash
//! # Everything, including hidden entries, as JSON
//! picmenu list --hidden --json
//!
//! # What does the menu look like for a guest?
//! picmenu list --as guest
//!
//! # Look up by pinyin reading
//! picmenu find zhuangtai --functions
//!
//! # Second module, third function
//! picmenu show 2 3
//! ```

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use picmenu_index::config::{self, Config};
use picmenu_index::menu::{self, ReadOptions};

/// Plugin menu index inspector.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. Without one, modules are read from `./modules`.
#[derive(Parser)]
#[command(
    name = "picmenu",
    about = "Inspect the plugin menu index built from module manifests",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/picmenu.toml`. A missing file falls back to
    /// built-in defaults.
    #[arg(long, global = true, default_value = "./config/picmenu.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Flags shared by every read command.
#[derive(Args)]
struct ReadArgs {
    /// Include hidden modules and functions.
    #[arg(long)]
    hidden: bool,

    /// Print JSON instead of a table.
    #[arg(long)]
    json: bool,

    /// Resolve deferred visibility rules as this caller.
    #[arg(long = "as", value_name = "CALLER")]
    caller: Option<String>,
}

impl From<ReadArgs> for ReadOptions {
    fn from(args: ReadArgs) -> Self {
        ReadOptions {
            include_hidden: args.hidden,
            caller: args.caller,
            json: args.json,
        }
    }
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// List modules in index order.
    ///
    /// By default deferred fields are resolved and hidden entries dropped.
    List {
        /// Print the collected snapshot without resolving anything.
        #[arg(long)]
        raw: bool,

        #[command(flatten)]
        read: ReadArgs,
    },

    /// Find modules (and optionally functions) by approximate text.
    ///
    /// Matches against display names and their transliterated readings.
    Find {
        /// The lookup query.
        query: String,

        /// Also match function labels.
        #[arg(long)]
        functions: bool,

        #[command(flatten)]
        read: ReadArgs,
    },

    /// Show one module, or one of its functions.
    ///
    /// Selectors are a 1-based index, an exact name, or approximate text.
    Show {
        /// Module selector.
        module: String,

        /// Function selector within the module.
        function: Option<String>,

        #[command(flatten)]
        read: ReadArgs,
    },
}

fn init_tracing(cfg: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cfg.logging.filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Use config if available, otherwise a minimal default
    let cfg = if cli.config.exists() {
        config::load_config(&cli.config)?
    } else {
        Config::minimal()
    };
    init_tracing(&cfg);

    match cli.command {
        Commands::List { raw, read } => {
            menu::run_list(&cfg, &ReadOptions::from(read), raw).await?;
        }
        Commands::Find {
            query,
            functions,
            read,
        } => {
            menu::run_find(&cfg, &query, functions, &ReadOptions::from(read)).await?;
        }
        Commands::Show {
            module,
            function,
            read,
        } => {
            menu::run_show(&cfg, &module, function.as_deref(), &ReadOptions::from(read)).await?;
        }
    }

    Ok(())
}
