use std::io::Write;
use std::time::Duration;

use marketpipe_core::{PipelineError, RequestContext, UtcDateTime};
use serde::Serialize;
use serde_json::Value;

use crate::error::{pipeline_exit_code, CliError};

/// Machine-readable failure entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorRecord {
    pub code: &'static str,
    pub message: String,
    pub retryable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    #[serde(skip)]
    pub exit_code: u8,
}

impl ErrorRecord {
    pub fn from_pipeline(error: &PipelineError, symbol: Option<&str>) -> Self {
        Self {
            code: error.code(),
            message: error.to_string(),
            retryable: error.retryable(),
            symbol: symbol.map(str::to_owned),
            exit_code: pipeline_exit_code(error),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct Meta {
    pub trace_id: String,
    pub command: &'static str,
    pub generated_at: UtcDateTime,
    pub latency_ms: u64,
}

/// Top-level JSON document printed for every command.
#[derive(Debug, Serialize)]
pub struct Envelope {
    pub meta: Meta,
    pub data: Value,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ErrorRecord>,
}

impl Envelope {
    pub fn new(
        ctx: &RequestContext,
        command: &'static str,
        latency: Duration,
        data: Value,
        errors: Vec<ErrorRecord>,
    ) -> Self {
        Self {
            meta: Meta {
                trace_id: ctx.trace_id().to_string(),
                command,
                generated_at: UtcDateTime::now(),
                latency_ms: u64::try_from(latency.as_millis()).unwrap_or(u64::MAX),
            },
            data,
            errors,
        }
    }

    /// Exit code of the first error, or 0.
    pub fn exit_code(&self) -> u8 {
        self.errors.first().map_or(0, |error| error.exit_code)
    }
}

pub fn render(envelope: &Envelope, pretty: bool) -> Result<(), CliError> {
    let payload = if pretty {
        serde_json::to_string_pretty(envelope)?
    } else {
        serde_json::to_string(envelope)?
    };
    println!("{payload}");
    Ok(())
}

/// Write one compact JSON line and flush, for streaming commands.
pub fn emit_line<W: Write, T: Serialize>(writer: &mut W, value: &T) -> Result<(), CliError> {
    serde_json::to_writer(&mut *writer, value)?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(())
}
