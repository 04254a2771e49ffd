use crate::config::Quality;

/// Parameter subset handed to a generator for a single image.
///
/// Each variant matches one of the three provider types exactly as
/// enumerated in the provider contract: the common shape (prompt, model)
/// is carried by every variant, everything else is provider-specific.
#[derive(Debug, Clone)]
pub enum GenerateRequest {
    NativeMultimodal {
        prompt: String,
        aspect_ratio: String,
        temperature: f32,
        model: String,
        reference_image: Option<Vec<u8>>,
    },
    OpenaiCompatible {
        prompt: String,
        size: String,
        model: String,
        quality: Quality,
    },
    ImageApi {
        prompt: String,
        aspect_ratio: String,
        temperature: f32,
        model: String,
        reference_images: Option<Vec<Vec<u8>>>,
    },
}

impl GenerateRequest {
    pub fn prompt(&self) -> &str {
        match self {
            GenerateRequest::NativeMultimodal { prompt, .. } => prompt,
            GenerateRequest::OpenaiCompatible { prompt, .. } => prompt,
            GenerateRequest::ImageApi { prompt, .. } => prompt,
        }
    }
}
