use generator_api::GeneratorError;
use image_compress::ImageError;
use object_store::StorageError;
use thiserror::Error;

/// Error taxonomy for the engine. `Provider` and `Internal` share the same
/// retry treatment inside `generate_one` (an internal panic-free exception
/// is indistinguishable from a provider hiccup once it's been converted to
/// a `Result`); `Storage` is surfaced without an internal retry; `Config`
/// and `Input` are synchronous failures raised before any `TaskState`
/// exists.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("provider failure: {0}")]
    Provider(String),
    #[error("storage failure: {0}")]
    Storage(String),
    #[error("configuration failure: {0}")]
    Config(String),
    #[error("invalid input: {0}")]
    Input(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    pub fn retryable(&self) -> bool {
        matches!(self, EngineError::Provider(_) | EngineError::Internal(_))
    }
}

impl From<GeneratorError> for EngineError {
    fn from(err: GeneratorError) -> Self {
        EngineError::Provider(err.to_string())
    }
}

impl From<StorageError> for EngineError {
    fn from(err: StorageError) -> Self {
        EngineError::Storage(err.to_string())
    }
}

impl From<ImageError> for EngineError {
    fn from(err: ImageError) -> Self {
        EngineError::Storage(format!("image compression failed: {err}"))
    }
}
