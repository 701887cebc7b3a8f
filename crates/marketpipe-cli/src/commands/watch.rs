use std::io;
use std::time::Duration;

use marketpipe_core::{MarketPipeline, RequestContext};
use serde_json::json;

use crate::cli::WatchArgs;
use crate::error::CliError;
use crate::output::{emit_line, ErrorRecord};

use super::CommandResult;

/// Collect every tick and stream one JSON line per symbol to stdout.
///
/// Stops after `--iterations` ticks or when the context is cancelled (Ctrl-C).
/// Each tick gets its own trace id.
pub async fn run(
    args: &WatchArgs,
    pipeline: &MarketPipeline,
    caller: &str,
    ctx: &RequestContext,
) -> Result<CommandResult, CliError> {
    let symbols = args.symbols.iter().map(String::as_str).collect::<Vec<_>>();
    let interval = Duration::from_secs(args.interval_secs);
    let reached_limit = |tick: u64| args.iterations.is_some_and(|max| tick >= max);

    let mut tick = 0_u64;
    let mut collected = 0_u64;
    let mut failed = 0_u64;

    while !reached_limit(tick) && !ctx.is_cancelled() {
        let tick_ctx = ctx.child();
        tracing::info!(trace_id = %tick_ctx.trace_id(), tick, "watch tick");

        for (symbol, result) in pipeline.collect_many(&symbols, caller, &tick_ctx).await {
            let line = match &result {
                Ok(point) => {
                    collected += 1;
                    json!({
                        "tick": tick,
                        "trace_id": tick_ctx.trace_id().as_str(),
                        "point": point,
                    })
                }
                Err(error) => {
                    failed += 1;
                    json!({
                        "tick": tick,
                        "trace_id": tick_ctx.trace_id().as_str(),
                        "error": ErrorRecord::from_pipeline(error, Some(symbol.as_str())),
                    })
                }
            };
            emit_line(&mut io::stdout().lock(), &line)?;
        }

        tick += 1;
        if reached_limit(tick) {
            break;
        }

        tokio::select! {
            () = ctx.cancelled() => break,
            () = tokio::time::sleep(interval) => {}
        }
    }

    Ok(CommandResult::ok(json!({
        "ticks": tick,
        "collected": collected,
        "failed": failed,
        "stopped_by": if ctx.is_cancelled() { "signal" } else { "iterations" },
    })))
}
