//! CLI argument definitions for marketpipe.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `collect` | Fetch and store one price per symbol |
//! | `watch` | Collect periodically until Ctrl-C |
//! | `anomaly` | Compare the two latest stored prices |
//! | `history` | List stored prices, most recent first |
//! | `symbols` | List supported symbols |
//!
//! # Global Options
//!
//! | Option | Default | Description |
//! |--------|---------|-------------|
//! | `--pretty` | `false` | Pretty-print JSON output |
//! | `--log-format` | `text` | Log format on stderr (text, json) |
//! | `--caller` | `cli` | Rate-limit key for this invocation |
//! | `--trace-id` | generated | Correlation id (32 hex chars) |
//! | `--db-path` | `$MARKETPIPE_HOME/data/prices.duckdb` | DuckDB file |
//! | `--ephemeral` | `false` | Keep prices in memory only |
//!
//! # Examples
//!
//! ```bash
//! marketpipe collect BTC ETH --pretty
//! marketpipe watch sol --interval-secs 30 --iterations 10
//! marketpipe anomaly BTC
//! marketpipe history BTC --limit 20
//! ```

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

/// Resilient crypto price collector with an anomaly tripwire.
#[derive(Debug, Parser)]
#[command(
    name = "marketpipe",
    author,
    version,
    about = "Resilient crypto price collector",
    long_about = "marketpipe fetches spot prices for BTC, ETH, SOL, ADA and DOT from CoinGecko, \
stores them in a local DuckDB file and flags large moves between the two latest prices.\n\
\n\
Configuration is read from MARKETPIPE_* environment variables and an optional .env file."
)]
pub struct Cli {
    /// Pretty-print JSON output with indentation.
    #[arg(long, global = true, default_value_t = false)]
    pub pretty: bool,

    /// Log line format written to stderr.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// Caller key used for rate limiting.
    #[arg(long, global = true, default_value = "cli")]
    pub caller: String,

    /// Trace id to attach to every event (32 hex characters).
    #[arg(long, global = true)]
    pub trace_id: Option<String>,

    /// DuckDB database file; overrides MARKETPIPE_DB_PATH.
    #[arg(long, global = true)]
    pub db_path: Option<PathBuf>,

    /// Use an in-memory store instead of DuckDB.
    #[arg(long, global = true, default_value_t = false)]
    pub ephemeral: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines.
    Text,
    /// One JSON object per line.
    Json,
}

/// Available CLI commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fetch and store the current price of each symbol.
    Collect(CollectArgs),
    /// Collect repeatedly at a fixed interval.
    Watch(WatchArgs),
    /// Check the two most recent prices of a symbol for an anomaly.
    Anomaly(SymbolArgs),
    /// Show stored prices, most recent first.
    History(HistoryArgs),
    /// List supported symbols and their provider identifiers.
    Symbols,
}

impl Command {
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Collect(_) => "collect",
            Self::Watch(_) => "watch",
            Self::Anomaly(_) => "anomaly",
            Self::History(_) => "history",
            Self::Symbols => "symbols",
        }
    }

    /// Whether the command reads or writes the price store.
    pub const fn needs_store(&self) -> bool {
        !matches!(self, Self::Symbols)
    }
}

#[derive(Debug, Args)]
pub struct CollectArgs {
    /// Symbols to collect (case-insensitive).
    #[arg(required = true)]
    pub symbols: Vec<String>,
}

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Symbols to collect on every tick.
    #[arg(required = true)]
    pub symbols: Vec<String>,

    /// Seconds between ticks.
    #[arg(long, default_value_t = 60, value_parser = clap::value_parser!(u64).range(1..))]
    pub interval_secs: u64,

    /// Stop after this many ticks; runs until Ctrl-C when omitted.
    #[arg(long)]
    pub iterations: Option<u64>,
}

#[derive(Debug, Args)]
pub struct SymbolArgs {
    /// Symbol to inspect (case-insensitive).
    pub symbol: String,
}

#[derive(Debug, Args)]
pub struct HistoryArgs {
    /// Symbol to list (case-insensitive).
    pub symbol: String,

    /// Maximum number of points to return.
    #[arg(long, default_value_t = marketpipe_core::DEFAULT_HISTORY_LIMIT)]
    pub limit: usize,
}
