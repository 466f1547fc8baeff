use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

use crate::services::llm::{default_gemini_model, GeminiConfig, GEMINI_BASE_URL};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImagePart {
    Text(String),
    Image { mime_type: String, data: Vec<u8> },
}

/// One image generation call: ordered parts (labeled references first, the
/// prompt last) plus the requested aspect ratio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRequest {
    pub parts: Vec<ImagePart>,
    pub aspect_ratio: String,
}

impl ImageRequest {
    pub fn prompt(&self) -> Option<&str> {
        self.parts.iter().rev().find_map(|p| match p {
            ImagePart::Text(t) => Some(t.as_str()),
            _ => None,
        })
    }
}

/// Image generation provider. Returns the decoded bytes of the first
/// image-bearing output part; no image part is an error.
#[async_trait]
pub trait ImageClient: Send + Sync + Debug {
    async fn generate_image(&self, request: &ImageRequest) -> Result<Vec<u8>>;
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ImageConfig {
    #[serde(default = "default_image_provider")]
    pub provider: String,
    #[serde(default = "default_aspect_ratio")]
    pub aspect_ratio: String,
    pub gemini: Option<GeminiConfig>,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            provider: default_image_provider(),
            aspect_ratio: default_aspect_ratio(),
            gemini: None,
        }
    }
}

fn default_image_provider() -> String {
    "gemini".to_string()
}
fn default_aspect_ratio() -> String {
    "2:3".to_string()
}

/// Build the image client. Falls back to the text provider's Gemini key
/// when the image section has none of its own.
pub fn create_image_client(
    config: &ImageConfig,
    text_gemini: Option<&GeminiConfig>,
) -> Result<Box<dyn ImageClient>> {
    match config.provider.as_str() {
        "gemini" => {
            let cfg = config
                .gemini
                .as_ref()
                .or(text_gemini)
                .context("Gemini image config missing")?;
            Ok(Box::new(GeminiImageClient::new(&cfg.api_key, &cfg.model)))
        }
        _ => Err(anyhow!("Unknown image provider: {}", config.provider)),
    }
}

#[derive(Debug)]
pub struct GeminiImageClient {
    api_key: String,
    model: String,
    base_url: String,
    client: reqwest::Client,
}

impl GeminiImageClient {
    pub fn new(api_key: &str, model: &str) -> Self {
        let model = if model.is_empty() {
            default_gemini_model()
        } else {
            model.to_string()
        };
        Self {
            api_key: api_key.to_string(),
            model,
            base_url: GEMINI_BASE_URL.to_string(),
            client: reqwest::Client::new(),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiImageRequest {
    contents: Vec<GeminiContent>,
    generation_config: GeminiImageGenerationConfig,
}

#[derive(Serialize)]
struct GeminiContent {
    role: String,
    parts: Vec<GeminiRequestPart>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum GeminiRequestPart {
    Text {
        text: String,
    },
    Inline {
        #[serde(rename = "inlineData")]
        inline_data: GeminiInlineData,
    },
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiInlineData {
    mime_type: String,
    data: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiImageGenerationConfig {
    response_modalities: Vec<String>,
    image_config: GeminiAspect,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiAspect {
    aspect_ratio: String,
}

#[derive(Deserialize)]
struct GeminiImageResponse {
    candidates: Option<Vec<GeminiImageCandidate>>,
    error: Option<GeminiError>,
}

#[derive(Deserialize)]
struct GeminiImageCandidate {
    content: Option<GeminiImageContent>,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct GeminiImageContent {
    #[serde(default)]
    parts: Vec<GeminiResponsePart>,
}

#[derive(Deserialize)]
struct GeminiResponsePart {
    #[serde(rename = "inlineData")]
    inline_data: Option<GeminiInlineData>,
}

#[derive(Deserialize, Debug)]
struct GeminiError {
    message: String,
}

fn build_request(request: &ImageRequest) -> GeminiImageRequest {
    let parts = request
        .parts
        .iter()
        .map(|part| match part {
            ImagePart::Text(text) => GeminiRequestPart::Text { text: text.clone() },
            ImagePart::Image { mime_type, data } => GeminiRequestPart::Inline {
                inline_data: GeminiInlineData {
                    mime_type: mime_type.clone(),
                    data: BASE64.encode(data),
                },
            },
        })
        .collect();

    GeminiImageRequest {
        contents: vec![GeminiContent {
            role: "user".to_string(),
            parts,
        }],
        generation_config: GeminiImageGenerationConfig {
            response_modalities: vec!["TEXT".to_string(), "IMAGE".to_string()],
            image_config: GeminiAspect {
                aspect_ratio: request.aspect_ratio.clone(),
            },
        },
    }
}

fn extract_first_image(response_text: &str) -> Result<Vec<u8>> {
    let result: GeminiImageResponse = serde_json::from_str(response_text)
        .map_err(|e| anyhow!("Failed to parse Gemini image response: {}", e))?;

    if let Some(err) = result.error {
        return Err(anyhow!("Gemini API returned error: {}", err.message));
    }

    let first = result
        .candidates
        .as_ref()
        .and_then(|c| c.first())
        .ok_or_else(|| anyhow!("Gemini image response has no candidates"))?;

    let inline = first
        .content
        .as_ref()
        .and_then(|content| content.parts.iter().find_map(|p| p.inline_data.as_ref()));

    match inline {
        Some(data) => BASE64
            .decode(data.data.as_bytes())
            .context("Gemini returned invalid base64 image data"),
        None => {
            let reason = first.finish_reason.as_deref().unwrap_or("UNKNOWN");
            Err(anyhow!("Gemini returned no image. Finish reason: {}", reason))
        }
    }
}

#[async_trait]
impl ImageClient for GeminiImageClient {
    async fn generate_image(&self, request: &ImageRequest) -> Result<Vec<u8>> {
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, self.model, self.api_key
        );

        let resp = self
            .client
            .post(&url)
            .json(&build_request(request))
            .send()
            .await?;

        if !resp.status().is_success() {
            let error_text = resp.text().await?;
            return Err(anyhow!("Gemini image API error: {}", error_text));
        }

        let response_text = resp.text().await?;
        extract_first_image(&response_text)
    }
}
