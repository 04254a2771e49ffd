use thiserror::Error;

/// Errors a generator variant can raise while producing an image.
///
/// All of these collapse to a single `ProviderFailure` at the orchestration
/// boundary (see `orchestrator::error::EngineError`); the variants exist here
/// only so callers can log a more specific message.
#[derive(Debug, Error)]
pub enum GeneratorError {
    #[error("generator request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("generator returned an error response ({status}): {body}")]
    ErrorResponse { status: u16, body: String },

    #[error("generator returned empty data")]
    EmptyResponse,

    #[error("generator request timed out")]
    Timeout,

    #[error("unknown provider type: {0}")]
    UnknownProvider(String),

    #[error("{0}")]
    Other(String),
}
