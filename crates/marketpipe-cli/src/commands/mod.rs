mod anomaly;
mod collect;
mod history;
mod symbols;
mod watch;

use std::path::Path;
use std::sync::Arc;

use marketpipe_core::{
    InMemoryStore, MarketPipeline, PipelineConfig, PipelineError, PriceStore, RequestContext,
};
use marketpipe_warehouse::{Warehouse, WarehouseConfig};
use serde_json::Value;

use crate::cli::{Cli, Command};
use crate::error::CliError;
use crate::output::ErrorRecord;

pub struct CommandResult {
    pub data: Value,
    pub errors: Vec<ErrorRecord>,
}

impl CommandResult {
    pub fn ok(data: Value) -> Self {
        Self {
            data,
            errors: Vec::new(),
        }
    }

    /// Failure of a single-target command, reported inside the envelope.
    pub fn failed(error: &PipelineError, symbol: Option<&str>) -> Self {
        Self {
            data: Value::Null,
            errors: vec![ErrorRecord::from_pipeline(error, symbol)],
        }
    }

    pub fn with_errors(mut self, errors: Vec<ErrorRecord>) -> Self {
        self.errors.extend(errors);
        self
    }
}

pub async fn run(cli: &Cli, ctx: &RequestContext) -> Result<CommandResult, CliError> {
    if !cli.command.needs_store() {
        return symbols::run();
    }

    let pipeline = build_pipeline(cli)?;
    match &cli.command {
        Command::Collect(args) => collect::run(args, &pipeline, &cli.caller, ctx).await,
        Command::Watch(args) => watch::run(args, &pipeline, &cli.caller, ctx).await,
        Command::Anomaly(args) => anomaly::run(args, &pipeline, ctx).await,
        Command::History(args) => history::run(args, &pipeline).await,
        Command::Symbols => symbols::run(),
    }
}

fn build_pipeline(cli: &Cli) -> Result<MarketPipeline, CliError> {
    let config = PipelineConfig::from_env()?;
    let store: Arc<dyn PriceStore> = if cli.ephemeral {
        Arc::new(InMemoryStore::new())
    } else {
        Arc::new(open_warehouse(cli.db_path.as_deref())?)
    };

    Ok(MarketPipeline::from_config(&config, store)?)
}

fn open_warehouse(db_path: Option<&Path>) -> Result<Warehouse, CliError> {
    let mut config = WarehouseConfig::default();
    if let Some(path) = db_path {
        config.db_path = path.to_path_buf();
    }

    tracing::debug!(db_path = %config.db_path.display(), "opening warehouse");
    Ok(Warehouse::open(config)?)
}
