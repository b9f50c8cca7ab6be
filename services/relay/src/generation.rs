//! Gemini `generateContent` adapter.
//!
//! One outbound call per request: the instruction and any inline images go
//! out together, and the first usable image or the text of the first
//! candidate comes back. No caching or retry happens here.

use crate::config::GeminiConfig;
use anyhow::Context;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

/// Longest upstream error body kept in an error value
const MAX_ERROR_BODY_CHARS: usize = 512;

/// Failures of a generation call, split by the stage that went wrong
#[derive(Error, Debug)]
pub enum GenerationError {
    #[error("request to generation service failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("generation service returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("failed to decode generation response: {0}")]
    Decode(String),

    #[error("response contained no candidates")]
    NoCandidates,

    #[error("response candidates contained no content parts")]
    NoContentParts,

    #[error("response contained no inline image data{}", model_text_suffix(.model_text))]
    NoInlineImage { model_text: Option<String> },

    #[error("response contained no text")]
    NoText,
}

/// What the model said instead of drawing, for the error's log line
fn model_text_suffix(model_text: &Option<String>) -> String {
    match model_text.as_deref().map(str::trim) {
        Some(text) if !text.is_empty() => format!(" (model said: {text})"),
        _ => String::new(),
    }
}

impl GenerationError {
    /// Short label used as a log field and metric tag
    pub fn kind(&self) -> &'static str {
        match self {
            GenerationError::Http(e) if e.is_timeout() => "timeout",
            GenerationError::Http(_) => "http",
            GenerationError::Status { .. } => "status",
            GenerationError::Decode(_) => "decode",
            GenerationError::NoCandidates => "no_candidates",
            GenerationError::NoContentParts => "no_content_parts",
            GenerationError::NoInlineImage { .. } => "no_inline_image",
            GenerationError::NoText => "no_text",
        }
    }
}

/// An input image: raw bytes plus declared media type
#[derive(Debug, Clone)]
pub struct ImagePart {
    pub mime_type: String,
    pub data: Bytes,
}

/// Image returned by the model
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedImage {
    pub mime_type: String,
    pub data: Vec<u8>,
}

/// Generative model seam used by the HTTP handlers
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GenerativeModel: Send + Sync {
    /// Send the instruction and images in one call and return the first inline image
    async fn generate_image(
        &self,
        instruction: &str,
        images: &[ImagePart],
    ) -> Result<GeneratedImage, GenerationError>;

    /// Send a text-only instruction and return the model's text verbatim
    async fn generate_text(&self, instruction: &str) -> Result<String, GenerationError>;
}

// Wire types. The REST surface accepts and returns lowerCamelCase.

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<Blob>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    pub mime_type: String,
    /// Base64 payload
    pub data: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_modalities: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    pub prompt_feedback: Option<PromptFeedback>,
    pub usage_metadata: Option<UsageMetadata>,
    pub model_version: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    pub content: Option<Content>,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptFeedback {
    pub block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageMetadata {
    pub prompt_token_count: Option<u32>,
    pub candidates_token_count: Option<u32>,
    pub total_token_count: Option<u32>,
}

impl GenerateContentResponse {
    fn candidate_parts(&self) -> impl Iterator<Item = &[Part]> + '_ {
        self.candidates
            .iter()
            .filter_map(|c| c.content.as_ref())
            .map(|content| content.parts.as_slice())
            .filter(|parts| !parts.is_empty())
    }
}

/// Pick the first part carrying inline image bytes
pub fn extract_image(response: &GenerateContentResponse) -> Result<GeneratedImage, GenerationError> {
    if response.candidates.is_empty() {
        return Err(GenerationError::NoCandidates);
    }

    let mut parts = response.candidate_parts().flatten().peekable();
    if parts.peek().is_none() {
        return Err(GenerationError::NoContentParts);
    }

    let mut model_text = None;
    for part in parts {
        match &part.inline_data {
            Some(blob) if !blob.data.is_empty() => {
                let data = STANDARD
                    .decode(blob.data.as_bytes())
                    .map_err(|e| GenerationError::Decode(format!("inline image data: {e}")))?;
                return Ok(GeneratedImage {
                    mime_type: blob.mime_type.clone(),
                    data,
                });
            }
            _ => {
                if model_text.is_none() {
                    model_text = part.text.clone();
                }
            }
        }
    }

    Err(GenerationError::NoInlineImage { model_text })
}

/// Concatenate the text parts of the first candidate that has any parts
pub fn extract_text(response: &GenerateContentResponse) -> Result<String, GenerationError> {
    if response.candidates.is_empty() {
        return Err(GenerationError::NoCandidates);
    }

    let parts = response
        .candidate_parts()
        .next()
        .ok_or(GenerationError::NoContentParts)?;

    let text: String = parts.iter().filter_map(|p| p.text.as_deref()).collect();
    if text.is_empty() {
        return Err(GenerationError::NoText);
    }

    Ok(text)
}

/// REST client for the Gemini API
pub struct GeminiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    image_model: String,
    text_model: String,
}

impl GeminiClient {
    /// Create a new client with a whole-request timeout
    pub fn new(config: &GeminiConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .context("Failed to build Gemini HTTP client")?;

        info!(
            image_model = %config.image_model,
            text_model = %config.text_model,
            "Gemini client initialized"
        );

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            image_model: config.image_model.clone(),
            text_model: config.text_model.clone(),
        })
    }

    async fn generate_content(
        &self,
        model: &str,
        request: &GenerateContentRequest,
    ) -> Result<GenerateContentResponse, GenerationError> {
        let url = format!("{}/models/{}:generateContent", self.base_url, model);

        let response = self
            .http
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::Status {
                status: status.as_u16(),
                body: body.chars().take(MAX_ERROR_BODY_CHARS).collect(),
            });
        }

        let body = response.bytes().await?;
        let parsed: GenerateContentResponse =
            serde_json::from_slice(&body).map_err(|e| GenerationError::Decode(e.to_string()))?;

        let finish_reasons: Vec<&str> = parsed
            .candidates
            .iter()
            .filter_map(|c| c.finish_reason.as_deref())
            .collect();
        let usage = parsed.usage_metadata.as_ref();

        info!(
            model = %model,
            model_version = parsed.model_version.as_deref().unwrap_or("unknown"),
            candidates = parsed.candidates.len(),
            finish_reasons = ?finish_reasons,
            prompt_tokens = usage.and_then(|u| u.prompt_token_count),
            candidates_tokens = usage.and_then(|u| u.candidates_token_count),
            total_tokens = usage.and_then(|u| u.total_token_count),
            "Gemini response received"
        );

        if let Some(reason) = parsed
            .prompt_feedback
            .as_ref()
            .and_then(|f| f.block_reason.as_deref())
        {
            warn!(model = %model, block_reason = %reason, "Prompt blocked by Gemini");
        }

        Ok(parsed)
    }
}

#[async_trait]
impl GenerativeModel for GeminiClient {
    #[instrument(skip(self, instruction, images), fields(model = %self.image_model, images = images.len()))]
    async fn generate_image(
        &self,
        instruction: &str,
        images: &[ImagePart],
    ) -> Result<GeneratedImage, GenerationError> {
        let mut parts = Vec::with_capacity(images.len() + 1);
        parts.push(Part {
            text: Some(instruction.to_string()),
            inline_data: None,
        });
        parts.extend(images.iter().map(|image| Part {
            text: None,
            inline_data: Some(Blob {
                mime_type: image.mime_type.clone(),
                data: STANDARD.encode(&image.data),
            }),
        }));

        let request = GenerateContentRequest {
            contents: vec![Content {
                role: Some("user".to_string()),
                parts,
            }],
            generation_config: Some(GenerationConfig {
                response_modalities: vec!["TEXT".to_string(), "IMAGE".to_string()],
            }),
        };

        let response = self.generate_content(&self.image_model, &request).await?;
        let image = extract_image(&response)?;

        debug!(
            mime_type = %image.mime_type,
            size_bytes = image.data.len(),
            "Extracted generated image"
        );

        Ok(image)
    }

    #[instrument(skip(self, instruction), fields(model = %self.text_model))]
    async fn generate_text(&self, instruction: &str) -> Result<String, GenerationError> {
        let request = GenerateContentRequest {
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![Part {
                    text: Some(instruction.to_string()),
                    inline_data: None,
                }],
            }],
            generation_config: None,
        };

        let response = self.generate_content(&self.text_model, &request).await?;
        extract_text(&response)
    }
}
