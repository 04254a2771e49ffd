use serde::{Deserialize, Serialize};

/// One of the three generator variants a `ProviderConfig` can select.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderType {
    NativeMultimodal,
    OpenaiCompatible,
    ImageApi,
}

/// Quality hint understood by the `openai_compatible` variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    Standard,
    Hd,
}

impl Default for Quality {
    fn default() -> Self {
        Quality::Standard
    }
}

/// Configuration for a single image-generation provider.
///
/// Mirrors the recognized options of the original service's provider
/// config block; unused fields for a given `type` are simply ignored by
/// that variant's generator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(rename = "type")]
    pub provider_type: ProviderType,
    pub api_key: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_aspect_ratio")]
    pub default_aspect_ratio: String,
    #[serde(default = "default_size")]
    pub default_size: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub quality: Quality,
    #[serde(default)]
    pub short_prompt: bool,
    #[serde(default)]
    pub high_concurrency: bool,
}

fn default_aspect_ratio() -> String {
    "3:4".to_string()
}

fn default_size() -> String {
    "1024x1024".to_string()
}

fn default_temperature() -> f32 {
    1.0
}

impl ProviderConfig {
    pub fn model_or(&self, fallback: &str) -> String {
        self.model.clone().unwrap_or_else(|| fallback.to_string())
    }
}
