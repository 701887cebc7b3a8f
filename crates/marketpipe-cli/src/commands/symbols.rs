use marketpipe_core::Symbol;
use serde::Serialize;

use crate::error::CliError;

use super::CommandResult;

#[derive(Debug, Serialize)]
struct SymbolEntry {
    symbol: Symbol,
    provider_id: &'static str,
}

pub fn run() -> Result<CommandResult, CliError> {
    let entries = Symbol::ALL
        .iter()
        .map(|&symbol| SymbolEntry {
            symbol,
            provider_id: symbol.provider_id(),
        })
        .collect::<Vec<_>>();

    Ok(CommandResult::ok(serde_json::to_value(entries)?))
}
