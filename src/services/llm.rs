use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// Text generation provider. Implementations ask the model for exactly one
/// JSON object and return its raw text, which may still be fenced in
/// markdown code delimiters.
#[async_trait]
pub trait LlmClient: Send + Sync + Debug {
    async fn generate_json(&self, prompt: &str) -> Result<String>;
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LlmConfig {
    pub provider: String, // "gemini" or "openai"
    pub gemini: Option<GeminiConfig>,
    pub openai: Option<OpenAIConfig>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    #[serde(default = "default_gemini_model")]
    pub model: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct OpenAIConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: Option<String>,
}

pub(crate) fn default_gemini_model() -> String {
    "gemini-3-pro-image-preview".to_string()
}

pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

pub fn create_llm(config: &LlmConfig) -> Result<Box<dyn LlmClient>> {
    match config.provider.as_str() {
        "gemini" => {
            let cfg = config.gemini.as_ref().context("Gemini config missing")?;
            Ok(Box::new(GeminiClient::new(&cfg.api_key, &cfg.model)))
        }
        "openai" => {
            let cfg = config.openai.as_ref().context("OpenAI config missing")?;
            Ok(Box::new(OpenAIClient::new(&cfg.api_key, &cfg.model, cfg.base_url.as_deref())))
        }
        _ => Err(anyhow!("Unknown LLM provider: {}", config.provider)),
    }
}

// --- Gemini ---
#[derive(Debug)]
pub struct GeminiClient {
    api_key: String,
    model: String,
    base_url: String,
    client: reqwest::Client,
}

impl GeminiClient {
    pub fn new(api_key: &str, model: &str) -> Self {
        Self::with_base_url(api_key, model, GEMINI_BASE_URL)
    }

    pub fn with_base_url(api_key: &str, model: &str, base_url: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            model: model.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    generation_config: GeminiGenerationConfig,
}

#[derive(Serialize)]
struct GeminiContent {
    role: String,
    parts: Vec<GeminiPart>,
}

#[derive(Serialize)]
struct GeminiPart {
    text: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiGenerationConfig {
    response_mime_type: String,
}

#[derive(Deserialize)]
struct GeminiResponse {
    candidates: Option<Vec<GeminiCandidate>>,
    error: Option<GeminiError>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContentResponse>,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct GeminiContentResponse {
    #[serde(default)]
    parts: Vec<GeminiPartResponse>,
}

#[derive(Deserialize)]
struct GeminiPartResponse {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize, Debug)]
struct GeminiError {
    message: String,
}

fn extract_gemini_text(response_text: &str) -> Result<String> {
    let result: GeminiResponse = serde_json::from_str(response_text).map_err(|e| {
        anyhow!("Failed to parse Gemini response: {}. Body: {}", e, response_text)
    })?;

    if let Some(err) = result.error {
        return Err(anyhow!("Gemini API returned error: {}", err.message));
    }

    let first = result
        .candidates
        .as_ref()
        .and_then(|c| c.first())
        .ok_or_else(|| anyhow!("Gemini response has no candidates. Body: {}", response_text))?;

    let text: String = first
        .content
        .as_ref()
        .map(|content| {
            content
                .parts
                .iter()
                .filter_map(|p| p.text.as_deref())
                .collect()
        })
        .unwrap_or_default();

    if text.is_empty() {
        let reason = first.finish_reason.as_deref().unwrap_or("UNKNOWN");
        return Err(anyhow!("Gemini response empty. Finish reason: {}", reason));
    }
    Ok(text)
}

#[async_trait]
impl LlmClient for GeminiClient {
    async fn generate_json(&self, prompt: &str) -> Result<String> {
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, self.model, self.api_key
        );

        let request_body = GeminiRequest {
            contents: vec![GeminiContent {
                role: "user".to_string(),
                parts: vec![GeminiPart { text: prompt.to_string() }],
            }],
            generation_config: GeminiGenerationConfig {
                response_mime_type: "application/json".to_string(),
            },
        };

        let resp = self.client.post(&url).json(&request_body).send().await?;

        if !resp.status().is_success() {
            let error_text = resp.text().await?;
            return Err(anyhow!("Gemini API error: {}", error_text));
        }

        let response_text = resp.text().await?;
        extract_gemini_text(&response_text)
    }
}

// --- OpenAI-compatible ---

#[derive(Debug)]
pub struct OpenAIClient {
    api_key: String,
    model: String,
    base_url: String,
    client: reqwest::Client,
}

impl OpenAIClient {
    pub fn new(api_key: &str, model: &str, base_url: Option<&str>) -> Self {
        Self {
            api_key: api_key.to_string(),
            model: model.to_string(),
            base_url: base_url
                .unwrap_or("https://api.openai.com/v1")
                .trim_end_matches('/')
                .to_string(),
            client: reqwest::Client::new(),
        }
    }
}

#[derive(Serialize)]
struct OpenAIRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    response_format: OpenAIResponseFormat,
}

#[derive(Serialize)]
struct OpenAIMessage {
    role: String,
    content: String,
}

#[derive(Serialize)]
struct OpenAIResponseFormat {
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Deserialize)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>,
}

#[derive(Deserialize)]
struct OpenAIChoice {
    message: OpenAIMessageResponse,
}

#[derive(Deserialize)]
struct OpenAIMessageResponse {
    content: Option<String>,
}

#[async_trait]
impl LlmClient for OpenAIClient {
    async fn generate_json(&self, prompt: &str) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);

        let request_body = OpenAIRequest {
            model: self.model.clone(),
            messages: vec![OpenAIMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            response_format: OpenAIResponseFormat {
                kind: "json_object".to_string(),
            },
        };

        let resp = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request_body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let error_text = resp.text().await?;
            return Err(anyhow!("OpenAI API error: {}", error_text));
        }

        let result: OpenAIResponse = resp.json().await?;
        result
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| anyhow!("OpenAI response empty or missing content"))
    }
}
