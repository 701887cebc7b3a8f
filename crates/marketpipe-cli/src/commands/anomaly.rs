use marketpipe_core::{MarketPipeline, RequestContext};

use crate::cli::SymbolArgs;
use crate::error::CliError;

use super::CommandResult;

pub async fn run(
    args: &SymbolArgs,
    pipeline: &MarketPipeline,
    ctx: &RequestContext,
) -> Result<CommandResult, CliError> {
    match pipeline.check_anomaly(&args.symbol, ctx).await {
        Ok(result) => Ok(CommandResult::ok(serde_json::to_value(&result)?)),
        Err(error) => Ok(CommandResult::failed(&error, Some(args.symbol.as_str()))),
    }
}
