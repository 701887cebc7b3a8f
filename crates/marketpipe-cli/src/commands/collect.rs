use marketpipe_core::{MarketPipeline, RequestContext};
use serde_json::json;

use crate::cli::CollectArgs;
use crate::error::CliError;
use crate::output::ErrorRecord;

use super::CommandResult;

pub async fn run(
    args: &CollectArgs,
    pipeline: &MarketPipeline,
    caller: &str,
    ctx: &RequestContext,
) -> Result<CommandResult, CliError> {
    let symbols = args.symbols.iter().map(String::as_str).collect::<Vec<_>>();

    let mut points = Vec::new();
    let mut errors = Vec::new();
    for (symbol, result) in pipeline.collect_many(&symbols, caller, ctx).await {
        match result {
            Ok(point) => points.push(point),
            Err(error) => errors.push(ErrorRecord::from_pipeline(&error, Some(symbol.as_str()))),
        }
    }

    let data = json!({ "points": serde_json::to_value(&points)? });
    Ok(CommandResult::ok(data).with_errors(errors))
}
