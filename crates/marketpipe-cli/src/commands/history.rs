use marketpipe_core::MarketPipeline;
use serde_json::json;

use crate::cli::HistoryArgs;
use crate::error::CliError;

use super::CommandResult;

pub async fn run(args: &HistoryArgs, pipeline: &MarketPipeline) -> Result<CommandResult, CliError> {
    match pipeline.history(&args.symbol, args.limit).await {
        Ok(points) => Ok(CommandResult::ok(json!({
            "count": points.len(),
            "points": serde_json::to_value(&points)?,
        }))),
        Err(error) => Ok(CommandResult::failed(&error, Some(args.symbol.as_str()))),
    }
}
