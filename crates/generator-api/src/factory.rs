use crate::{
    config::ProviderType, image_api::ImageApiGenerator, native_multimodal::NativeMultimodalGenerator,
    openai_compatible::OpenAiCompatibleGenerator, GeneratorError, ImageGenerator, ProviderConfig,
};

/// Selects and constructs the right generator for a provider descriptor.
pub struct GeneratorFactory;

impl GeneratorFactory {
    pub fn create(config: &ProviderConfig) -> Result<Box<dyn ImageGenerator>, GeneratorError> {
        tracing::debug!(provider_type = ?config.provider_type, "constructing generator");
        let generator: Box<dyn ImageGenerator> = match config.provider_type {
            ProviderType::NativeMultimodal => Box::new(NativeMultimodalGenerator::new(
                config.api_key.clone(),
                config.base_url.clone(),
            )),
            ProviderType::OpenaiCompatible => Box::new(OpenAiCompatibleGenerator::new(
                config.api_key.clone(),
                config.base_url.clone(),
            )),
            ProviderType::ImageApi => {
                let base_url = config.base_url.clone().ok_or_else(|| {
                    GeneratorError::Other("image_api provider requires a base_url".to_string())
                })?;
                Box::new(ImageApiGenerator::new(config.api_key.clone(), base_url))
            }
        };
        Ok(generator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_api_requires_base_url() {
        let config = ProviderConfig {
            provider_type: ProviderType::ImageApi,
            api_key: "key".to_string(),
            base_url: None,
            model: None,
            default_aspect_ratio: "3:4".to_string(),
            default_size: "1024x1024".to_string(),
            temperature: 1.0,
            quality: Default::default(),
            short_prompt: false,
            high_concurrency: false,
        };
        assert!(GeneratorFactory::create(&config).is_err());
    }

    #[test]
    fn native_multimodal_does_not_require_base_url() {
        let config = ProviderConfig {
            provider_type: ProviderType::NativeMultimodal,
            api_key: "key".to_string(),
            base_url: None,
            model: None,
            default_aspect_ratio: "3:4".to_string(),
            default_size: "1024x1024".to_string(),
            temperature: 1.0,
            quality: Default::default(),
            short_prompt: false,
            high_concurrency: false,
        };
        assert!(GeneratorFactory::create(&config).is_ok());
    }
}
