use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};

use crate::{http_client, non_empty, GenerateRequest, GeneratorError, ImageGenerator, Quality};

const DEFAULT_BASE_URL: &str = "https://api.openai.com";

/// Generator for OpenAI-compatible image endpoints. No reference image
/// support — `size`, `model`, and `quality` are the only tunables.
#[derive(Clone, Debug)]
pub struct OpenAiCompatibleGenerator {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl OpenAiCompatibleGenerator {
    pub fn new(api_key: String, base_url: Option<String>) -> Self {
        Self {
            client: http_client(),
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            api_key,
        }
    }
}

#[derive(Serialize)]
struct ImageGenerationRequest {
    model: String,
    prompt: String,
    size: String,
    quality: &'static str,
    n: u8,
}

#[derive(Deserialize)]
struct ImageGenerationResponse {
    #[serde(default)]
    data: Vec<ImageDatum>,
}

#[derive(Deserialize)]
struct ImageDatum {
    #[serde(default)]
    b64_json: Option<String>,
}

#[derive(Serialize)]
struct ChatCompletionsProbe {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: &'static str,
}

fn quality_str(quality: Quality) -> &'static str {
    match quality {
        Quality::Standard => "standard",
        Quality::Hd => "hd",
    }
}

#[async_trait]
impl ImageGenerator for OpenAiCompatibleGenerator {
    async fn generate_image(&self, request: GenerateRequest) -> Result<Vec<u8>, GeneratorError> {
        let GenerateRequest::OpenaiCompatible {
            prompt,
            size,
            model,
            quality,
        } = request
        else {
            return Err(GeneratorError::Other(
                "openai_compatible generator received a mismatched request variant".to_string(),
            ));
        };

        let body = ImageGenerationRequest {
            model,
            prompt,
            size,
            quality: quality_str(quality),
            n: 1,
        };

        let url = format!("{}/v1/images/generations", self.base_url.trim_end_matches('/'));
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

        let parsed: ImageGenerationResponse = response.json().await?;
        let b64 = parsed
            .data
            .into_iter()
            .find_map(|d| d.b64_json)
            .ok_or(GeneratorError::EmptyResponse)?;

        let bytes = general_purpose::STANDARD
            .decode(b64)
            .map_err(|e| GeneratorError::Other(format!("failed to decode image data: {e}")))?;
        non_empty(bytes)
    }

    async fn check_health(&self) -> Result<(), GeneratorError> {
        let url = format!("{}/v1/chat/completions", self.base_url.trim_end_matches('/'));
        let body = ChatCompletionsProbe {
            model: "gpt-4o-mini".to_string(),
            messages: vec![ChatMessage {
                role: "user",
                content: "ping",
            }],
            max_tokens: 50,
        };
        let response = self
            .client
            .post(url)
            .bearer_auth(&self.api_key)
            .json(&body)
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
