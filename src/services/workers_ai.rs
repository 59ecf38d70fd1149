use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

use crate::services::preprocess;

const DEFAULT_BASE_URL: &str = "https://api.cloudflare.com/client/v4";
const DEFAULT_VISION_MODEL: &str = "@cf/llava-hf/llava-1.5-7b-hf";
const DEFAULT_TEXT_MODEL: &str = "@cf/meta/llama-3.1-8b-instruct";

/// A model that describes a photo in response to an instruction prompt.
#[async_trait]
pub trait VisionModel: Send + Sync {
    async fn describe(&self, image: &str, prompt: &str) -> Result<String, AiError>;
}

/// A model that completes a text prompt.
#[async_trait]
pub trait TextModel: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, AiError>;
}

/// Client for Cloudflare Workers AI (LLaVA for photos, Llama for prose).
pub struct WorkersAiClient {
    http: Client,
    base_url: String,
    account_id: String,
    api_token: String,
    vision_model: String,
    text_model: String,
}

/// Standard Cloudflare API envelope. A 200 response can still carry
/// `success: false` and an error list.
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default = "default_success")]
    success: bool,
    #[serde(default)]
    errors: Vec<ApiMessage>,
    #[serde(default)]
    result: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

fn default_success() -> bool {
    true
}

impl WorkersAiClient {
    /// Build a client. `request_timeout` is a transport ceiling; callers apply
    /// their own tighter deadlines.
    pub fn new(
        account_id: &str,
        api_token: &str,
        request_timeout: Duration,
    ) -> Result<Self, AiError> {
        let http = Client::builder()
            .timeout(request_timeout)
            .user_agent(concat!("eco-scan/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            base_url: DEFAULT_BASE_URL.to_string(),
            account_id: account_id.to_string(),
            api_token: api_token.to_string(),
            vision_model: DEFAULT_VISION_MODEL.to_string(),
            text_model: DEFAULT_TEXT_MODEL.to_string(),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    async fn run(&self, model: &str, body: serde_json::Value) -> Result<serde_json::Value, AiError> {
        let url = format!("{}/accounts/{}/ai/run/{}", self.base_url, self.account_id, model);

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_token)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(AiError::Status {
                status: status.as_u16(),
                body: truncate(&text, 256),
            });
        }

        unwrap_envelope(&text)
    }
}

/// Pull `result` out of a Workers AI envelope, treating embedded error codes as failures.
pub fn unwrap_envelope(body: &str) -> Result<serde_json::Value, AiError> {
    let envelope: Envelope = serde_json::from_str(body)?;

    if !envelope.success || !envelope.errors.is_empty() {
        let (code, message) = envelope
            .errors
            .into_iter()
            .next()
            .map(|e| (e.code, e.message))
            .unwrap_or((0, "request unsuccessful".to_string()));
        return Err(AiError::Upstream { code, message });
    }

    envelope.result.ok_or(AiError::EmptyResult)
}

/// Model text lives under `description` (LLaVA) or `response` (text models).
fn result_text(result: &serde_json::Value) -> Result<String, AiError> {
    ["description", "response"]
        .iter()
        .find_map(|field| result.get(*field).and_then(|v| v.as_str()))
        .map(str::to_string)
        .ok_or(AiError::EmptyResult)
}

#[async_trait]
impl VisionModel for WorkersAiClient {
    async fn describe(&self, image: &str, prompt: &str) -> Result<String, AiError> {
        // Workers AI wants the raw bytes; accept either a data URL or bare base64.
        let bytes = preprocess::decode_payload(image).map_err(|e| AiError::Input(e.to_string()))?;

        let request_body = serde_json::json!({
            "image": bytes,
            "prompt": prompt,
            "max_tokens": 512
        });

        let result = self.run(&self.vision_model, request_body).await?;
        result_text(&result)
    }
}

#[async_trait]
impl TextModel for WorkersAiClient {
    async fn generate(&self, prompt: &str) -> Result<String, AiError> {
        let request_body = serde_json::json!({
            "prompt": prompt,
            "max_tokens": 256
        });

        let result = self.run(&self.text_model, request_body).await?;
        result_text(&result)
    }
}

/// Return the first balanced `{...}` block in free-form model output.
///
/// Braces inside JSON string literals are ignored.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

fn truncate(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

#[derive(Debug, thiserror::Error)]
pub enum AiError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Workers AI returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Workers AI reported error {code}: {message}")]
    Upstream { code: i64, message: String },

    #[error("Failed to parse Workers AI response: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Workers AI returned no result")]
    EmptyResult,

    #[error("Invalid model input: {0}")]
    Input(String),
}
