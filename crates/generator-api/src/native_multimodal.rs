use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

use crate::{http_client, non_empty, GenerateRequest, GeneratorError, ImageGenerator};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
const API_VERSION: &str = "v1beta";

/// Generator for native multimodal providers (a single inline reference
/// image, prompt + aspect ratio + temperature as top-level parameters).
#[derive(Clone, Debug)]
pub struct NativeMultimodalGenerator {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl NativeMultimodalGenerator {
    pub fn new(api_key: String, base_url: Option<String>) -> Self {
        Self {
            client: http_client(),
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            api_key,
        }
    }

    fn endpoint(&self, model: &str) -> String {
        format!(
            "{}/{}/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            API_VERSION,
            model
        )
    }
}

#[skip_serializing_none]
#[derive(Serialize)]
struct GenerateContentRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[skip_serializing_none]
#[derive(Serialize)]
struct Part {
    text: Option<String>,
    inline_data: Option<InlineData>,
}

#[derive(Serialize)]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Serialize)]
struct GenerationConfig {
    temperature: f32,
}

#[derive(Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: ResponseContent,
}

#[derive(Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
struct ResponsePart {
    #[serde(default)]
    inline_data: Option<ResponseInlineData>,
}

#[derive(Deserialize)]
struct ResponseInlineData {
    data: String,
}

#[async_trait]
impl ImageGenerator for NativeMultimodalGenerator {
    async fn generate_image(&self, request: GenerateRequest) -> Result<Vec<u8>, GeneratorError> {
        let GenerateRequest::NativeMultimodal {
            prompt,
            temperature,
            model,
            reference_image,
            aspect_ratio: _,
        } = request
        else {
            return Err(GeneratorError::Other(
                "native_multimodal generator received a mismatched request variant".to_string(),
            ));
        };

        let mut parts = vec![Part {
            text: Some(prompt),
            inline_data: None,
        }];
        if let Some(image) = reference_image {
            parts.push(Part {
                text: None,
                inline_data: Some(InlineData {
                    mime_type: "image/png".to_string(),
                    data: general_purpose::STANDARD.encode(image),
                }),
            });
        }

        let body = GenerateContentRequest {
            contents: vec![Content { parts }],
            generation_config: GenerationConfig { temperature },
        };

        let response = self
            .client
            .post(self.endpoint(&model))
            .query(&[("key", self.api_key.as_str())])
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(GeneratorError::ErrorResponse { status, body });
        }

        let parsed: GenerateContentResponse = response.json().await?;
        let image = parsed
            .candidates
            .into_iter()
            .find_map(|c| {
                c.content
                    .parts
                    .into_iter()
                    .find_map(|p| p.inline_data.map(|d| d.data))
            })
            .ok_or(GeneratorError::EmptyResponse)?;

        let bytes = general_purpose::STANDARD
            .decode(image)
            .map_err(|e| GeneratorError::Other(format!("failed to decode image data: {e}")))?;
        non_empty(bytes)
    }

    async fn check_health(&self) -> Result<(), GeneratorError> {
        let url = format!(
            "{}/{}/models",
            self.base_url.trim_end_matches('/'),
            API_VERSION
        );
        let response = self
            .client
            .get(url)
            .query(&[("key", self.api_key.as_str())])
            .send()
            .await?;
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
