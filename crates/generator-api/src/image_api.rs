use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};

use crate::{http_client, non_empty, GenerateRequest, GeneratorError, ImageGenerator};

/// Generator for a generic HTTP image API that accepts a *list* of
/// reference images (as opposed to `native_multimodal`'s single image).
#[derive(Clone, Debug)]
pub struct ImageApiGenerator {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl ImageApiGenerator {
    pub fn new(api_key: String, base_url: String) -> Self {
        Self {
            client: http_client(),
            base_url,
            api_key,
        }
    }
}

#[derive(Serialize)]
struct ImageApiRequest {
    model: String,
    prompt: String,
    aspect_ratio: String,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    reference_images: Option<Vec<String>>,
}

#[derive(Deserialize)]
struct ImageApiResponse {
    #[serde(default)]
    images: Vec<String>,
}

#[async_trait]
impl ImageGenerator for ImageApiGenerator {
    async fn generate_image(&self, request: GenerateRequest) -> Result<Vec<u8>, GeneratorError> {
        let GenerateRequest::ImageApi {
            prompt,
            aspect_ratio,
            temperature,
            model,
            reference_images,
        } = request
        else {
            return Err(GeneratorError::Other(
                "image_api generator received a mismatched request variant".to_string(),
            ));
        };

        let reference_images = reference_images
            .map(|images| images.into_iter().map(|b| general_purpose::STANDARD.encode(b)).collect());

        let body = ImageApiRequest {
            model,
            prompt,
            aspect_ratio,
            temperature,
            reference_images,
        };

        let url = format!("{}/v1/images/generate", self.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(GeneratorError::ErrorResponse { status, body });
        }

        let parsed: ImageApiResponse = response.json().await?;
        let b64 = parsed.images.into_iter().next().ok_or(GeneratorError::EmptyResponse)?;

        let bytes = general_purpose::STANDARD
            .decode(b64)
            .map_err(|e| GeneratorError::Other(format!("failed to decode image data: {e}")))?;
        non_empty(bytes)
    }

    async fn check_health(&self) -> Result<(), GeneratorError> {
        let url = format!("{}/v1/models", self.base_url.trim_end_matches('/'));
        let response = self.client.get(url).bearer_auth(&self.api_key).send().await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(GeneratorError::ErrorResponse {
                status: response.status().as_u16(),
                body: response.text().await.unwrap_or_default(),
            })
        }
    }
}
