use marketpipe_core::{PipelineError, PipelineErrorKind};
use thiserror::Error;

/// CLI-level error categories mapped to exit codes.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Validation(#[from] marketpipe_core::ValidationError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Warehouse(#[from] marketpipe_warehouse::WarehouseError),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CliError {
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::Validation(_) => 2,
            Self::Pipeline(error) => pipeline_exit_code(error),
            Self::Warehouse(_) => 5,
            Self::Serialization(_) => 4,
            Self::Io(_) => 10,
        }
    }
}

pub const fn pipeline_exit_code(error: &PipelineError) -> u8 {
    match error.kind() {
        PipelineErrorKind::InvalidSymbol => 2,
        PipelineErrorKind::UpstreamUnavailable
        | PipelineErrorKind::UpstreamRejected
        | PipelineErrorKind::MalformedResponse => 3,
        PipelineErrorKind::Persistence => 5,
        PipelineErrorKind::RateLimitExceeded => 6,
        PipelineErrorKind::InsufficientData => 7,
        PipelineErrorKind::Cancelled => 130,
    }
}
