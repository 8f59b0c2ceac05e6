//! Kestrel engine CLI
//!
//! Inspects what the dispatch engine would do without a UI:
//! - Route a query against the configured plugins
//! - List plugin settings and configuration problems
//! - Inspect and maintain the selection history

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use kestrel_core::config::{Config, Directories};
use kestrel_core::dispatch::{DispatchOptions, is_target};
use kestrel_core::history::{HistoryEntry, HistoryStore};
use kestrel_core::{PluginMetadata, query};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::debug;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Kestrel launcher engine CLI
#[derive(Parser)]
#[command(name = "kestrel")]
#[command(about = "Inspect Kestrel query routing, plugin settings and history")]
#[command(version)]
#[command(after_help = "\
Examples:
  kestrel route \"> 2+2\"              Show which plugins would answer
  kestrel plugins                    List configured plugins and problems
  kestrel history list               Show recent selections
  kestrel history list --query rep   Show selections recorded for \"rep\"
  kestrel history forget rep         Remove history for \"rep\"
  kestrel history compact            Rewrite the history journal
")]
struct Cli {
    /// Config file (defaults to the XDG config directory)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// History journal (defaults to the XDG data directory)
    #[arg(long, global = true, value_name = "PATH")]
    history: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Also write logs to this file
    #[arg(long, global = true, value_name = "PATH")]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse a query and list the plugins it would be dispatched to
    Route {
        /// Raw query text, exactly as typed
        text: String,
    },

    /// List configured plugins in configuration order
    Plugins,

    /// Inspect or maintain selection history
    History {
        #[command(subcommand)]
        command: HistoryCommands,
    },
}

#[derive(Subcommand)]
enum HistoryCommands {
    /// List entries, most recent first
    List {
        /// Only entries recorded for this exact query text
        #[arg(long)]
        query: Option<String>,
    },

    /// Remove every entry recorded for a query text
    Forget { text: String },

    /// Rewrite the journal to hold only live entries
    Compact,
}

/// Set up logging to stderr, plus a log file when requested.
/// The returned guard must live until exit so buffered lines are flushed.
fn setup_logging(verbose: bool, log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("kestrel={default_level}")));

    fn stderr_layer<S>(
        verbose: bool,
    ) -> fmt::Layer<S, fmt::format::DefaultFields, fmt::format::Format, fn() -> std::io::Stderr>
    where
        S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
    {
        fmt::layer()
            .with_writer(std::io::stderr as fn() -> std::io::Stderr)
            .with_target(verbose)
    }

    let Some(path) = log_file else {
        tracing_subscriber::registry()
            .with(stderr_layer(verbose))
            .with(filter)
            .init();
        return Ok(None);
    };

    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let name = path
        .file_name()
        .with_context(|| format!("Invalid log file path: {}", path.display()))?;
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create log directory {}", dir.display()))?;

    let file_appender = tracing_appender::rolling::never(dir, name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true)
        .with_line_number(true);

    tracing_subscriber::registry()
        .with(file_layer)
        .with(stderr_layer(verbose))
        .with(filter)
        .init();
    Ok(Some(guard))
}

/// Resolved file locations, flags taking precedence over XDG defaults
struct Paths {
    config_file: PathBuf,
    history_file: PathBuf,
}

impl Paths {
    fn resolve(cli: &Cli) -> Result<Self> {
        let defaults = if cli.config.is_some() && cli.history.is_some() {
            None
        } else {
            Some(Directories::new().context("Failed to determine default directories")?)
        };

        let pick = |flag: Option<&PathBuf>, default: fn(&Directories) -> &PathBuf| {
            flag.cloned()
                .or_else(|| defaults.as_ref().map(|d| default(d).clone()))
                .unwrap_or_default()
        };

        Ok(Self {
            config_file: pick(cli.config.as_ref(), |d| &d.config_file),
            history_file: pick(cli.history.as_ref(), |d| &d.history_file),
        })
    }
}

fn load_config(paths: &Paths) -> Result<Config> {
    debug!("Loading config from {}", paths.config_file.display());
    Config::load(&paths.config_file)
        .with_context(|| format!("Failed to load {}", paths.config_file.display()))
}

fn open_history(paths: &Paths, config: &Config) -> Result<HistoryStore> {
    HistoryStore::open(&paths.history_file, config.history.options())
        .with_context(|| format!("Failed to open {}", paths.history_file.display()))
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let _guard = setup_logging(cli.verbose, cli.log_file.as_deref())?;
    let paths = Paths::resolve(&cli)?;

    match &cli.command {
        Commands::Route { text } => run_route(&paths, text),
        Commands::Plugins => run_plugins(&paths),
        Commands::History { command } => run_history(&paths, command),
    }
}

fn run_route(paths: &Paths, text: &str) -> Result<()> {
    let config = load_config(paths)?;
    let plugins: Vec<PluginMetadata> = config.plugins.iter().map(|p| p.metadata()).collect();

    let keywords: BTreeSet<String> = plugins
        .iter()
        .filter(|m| !m.disabled)
        .filter_map(|m| m.scoped_keyword().map(str::to_string))
        .collect();
    let parsed = query::parse(text, &keywords);
    let options: DispatchOptions = config.search.dispatch_options();

    println!("Raw text:       {:?}", parsed.raw_text);
    println!(
        "Action keyword: {}",
        if parsed.is_keyword_scoped() {
            parsed.action_keyword.as_str()
        } else {
            "(none)"
        }
    );
    println!("Search:         {:?}", parsed.search);
    println!(
        "Timeout:        {}ms per plugin",
        options.plugin_timeout.as_millis()
    );

    let targets: Vec<&PluginMetadata> = plugins
        .iter()
        .filter(|m| is_target(m, &parsed, &options))
        .collect();
    if targets.is_empty() {
        println!("Targets:        (none)");
    } else {
        println!("Targets:");
        for m in targets {
            let reason = if m.is_global { "global" } else { "keyword" };
            println!("  {:<20} {}", m.id, reason);
        }
    }
    Ok(())
}

fn run_plugins(paths: &Paths) -> Result<()> {
    let config = load_config(paths)?;

    if config.plugins.is_empty() {
        println!("No plugins configured in {}", paths.config_file.display());
    } else {
        println!(
            "{:<20} {:<8} {:<7} {:>6}  STATUS",
            "ID", "KEYWORD", "GLOBAL", "BOOST"
        );
        for p in &config.plugins {
            println!(
                "{:<20} {:<8} {:<7} {:>6}  {}",
                p.id,
                if p.action_keyword.trim().is_empty() {
                    "-"
                } else {
                    p.action_keyword.trim()
                },
                if p.is_global { "yes" } else { "no" },
                p.weight_boost,
                if p.disabled { "disabled" } else { "enabled" }
            );
        }
    }

    let problems = config.validate();
    if !problems.is_empty() {
        println!();
        println!("Problems:");
        for problem in problems {
            println!("  {problem}");
        }
    }
    Ok(())
}

fn run_history(paths: &Paths, command: &HistoryCommands) -> Result<()> {
    let config = load_config(paths)?;
    let mut history = open_history(paths, &config)?;

    match command {
        HistoryCommands::List { query } => {
            let entries: Vec<HistoryEntry> = history
                .entries()
                .into_iter()
                .filter(|e| query.as_ref().is_none_or(|q| &e.query_text == q))
                .collect();
            if entries.is_empty() {
                println!("No history entries");
                return Ok(());
            }
            for e in entries {
                println!(
                    "{:<19}  {:>4}x  {:<16} {:<12} {}",
                    format_timestamp(e.last_selected_at),
                    e.selection_count,
                    e.query_text,
                    e.plugin_id,
                    e.result_key.title
                );
            }
        }
        HistoryCommands::Forget { text } => {
            let removed = history.forget(text).context("Failed to update history")?;
            println!("Removed {removed} entries for {text:?}");
        }
        HistoryCommands::Compact => {
            history.compact().context("Failed to compact history")?;
            println!(
                "Compacted {} to {} entries",
                paths.history_file.display(),
                history.len()
            );
        }
    }
    Ok(())
}

fn format_timestamp(millis: u64) -> String {
    i64::try_from(millis)
        .ok()
        .and_then(chrono::DateTime::from_timestamp_millis)
        .map_or_else(
            || "-".to_string(),
            |t| {
                t.with_timezone(&chrono::Local)
                    .format("%Y-%m-%d %H:%M:%S")
                    .to_string()
            },
        )
}
