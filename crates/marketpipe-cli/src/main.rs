mod cli;
mod commands;
mod error;
mod logging;
mod output;

use std::process::ExitCode;
use std::time::Instant;

use clap::Parser;
use marketpipe_core::{RequestContext, TraceId};

use crate::cli::Cli;
use crate::error::CliError;
use crate::output::Envelope;

#[tokio::main]
async fn main() -> ExitCode {
    // a missing .env file is not an error
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    logging::init(cli.log_format);

    match run(&cli).await {
        Ok(code) => code,
        Err(error) => {
            tracing::error!(error = %error, exit_code = error.exit_code(), "command failed");
            eprintln!("error: {error}");
            ExitCode::from(error.exit_code())
        }
    }
}

async fn run(cli: &Cli) -> Result<ExitCode, CliError> {
    let ctx = build_context(cli)?;

    let token = ctx.cancellation_token().clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, cancelling");
            token.cancel();
        }
    });

    let started = Instant::now();
    let result = commands::run(cli, &ctx).await?;
    let envelope = Envelope::new(
        &ctx,
        cli.command.name(),
        started.elapsed(),
        result.data,
        result.errors,
    );
    output::render(&envelope, cli.pretty)?;

    Ok(ExitCode::from(envelope.exit_code()))
}

fn build_context(cli: &Cli) -> Result<RequestContext, CliError> {
    let ctx = RequestContext::new();
    match cli.trace_id.as_deref() {
        Some(raw) => Ok(ctx.with_trace_id(TraceId::parse(raw)?)),
        None => Ok(ctx),
    }
}
