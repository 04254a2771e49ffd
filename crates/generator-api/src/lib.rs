//! Provider-agnostic capability contract for image generation.
//!
//! A generator is polymorphic over a single capability,
//! `generate_image(request) -> bytes`, with three concrete variants that
//! speak to different upstream shapes: a native multimodal API that takes a
//! single reference image, an OpenAI-compatible chat-completions-shaped
//! image endpoint, and a generic HTTP image API that accepts a list of
//! reference images.

mod config;
mod error;
mod factory;
mod image_api;
mod native_multimodal;
mod openai_compatible;
mod request;

pub use config::{ProviderConfig, ProviderType, Quality};
pub use error::GeneratorError;
pub use factory::GeneratorFactory;
pub use image_api::ImageApiGenerator;
pub use native_multimodal::NativeMultimodalGenerator;
pub use openai_compatible::OpenAiCompatibleGenerator;
pub use request::GenerateRequest;

use async_trait::async_trait;
use dyn_clone::DynClone;
use std::time::Duration;

/// Hard per-call timeout enforced at the transport level for every provider.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

dyn_clone::clone_trait_object!(ImageGenerator);

/// Capability contract every generator variant implements.
#[async_trait]
pub trait ImageGenerator: std::fmt::Debug + DynClone + Send + Sync {
    /// Generate a single image, returning its encoded bytes.
    async fn generate_image(&self, request: GenerateRequest) -> Result<Vec<u8>, GeneratorError>;

    /// Cheap connectivity probe used when validating configuration at
    /// startup. Not called on the generation hot path.
    async fn check_health(&self) -> Result<(), GeneratorError>;
}

pub(crate) fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .expect("failed to build reqwest client")
}

pub(crate) fn non_empty(bytes: Vec<u8>) -> Result<Vec<u8>, GeneratorError> {
    if bytes.is_empty() {
        Err(GeneratorError::EmptyResponse)
    } else {
        Ok(bytes)
    }
}
