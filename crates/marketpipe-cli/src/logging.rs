use tracing_subscriber::EnvFilter;

use crate::cli::LogFormat;

/// Filter directives come from `MARKETPIPE_LOG`, then `RUST_LOG`, then `info`.
pub fn init(format: LogFormat) {
    let filter = std::env::var("MARKETPIPE_LOG")
        .ok()
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    // a second init (e.g. in tests) keeps the first subscriber
    let _ = match format {
        LogFormat::Json => builder.json().with_current_span(false).try_init(),
        LogFormat::Text => builder.with_target(true).try_init(),
    };
}
