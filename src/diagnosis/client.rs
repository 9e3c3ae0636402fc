//! Outbound call to the hosted multimodal model.
//!
//! Every diagnosis sends the user's photo to Google's Gemini API. Whatever is
//! in the picture leaves this process: faces, documents, or location hints in
//! the background are transmitted along with the leaf. Operators deploying
//! this service should say so on the upload page.

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use serde::{Deserialize, Serialize};
use std::time::Instant;

use super::prompt::DIAGNOSIS_INSTRUCTION;
use crate::config::{ApiKey, Config};
use crate::processing::EncodedImage;

/// One instruction plus one PNG. The instruction is always
/// [`DIAGNOSIS_INSTRUCTION`]; there is no way to build a request with another.
#[derive(Debug, Clone)]
pub struct DiagnosisRequest {
    instruction: &'static str,
    image: EncodedImage,
}

impl DiagnosisRequest {
    pub fn new(image: EncodedImage) -> Self {
        Self {
            instruction: DIAGNOSIS_INSTRUCTION,
            image,
        }
    }

    pub fn instruction(&self) -> &str {
        self.instruction
    }

    pub fn image(&self) -> &EncodedImage {
        &self.image
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DiagnosisError {
    #[error("provider rejected the credential ({status}): {body}")]
    Unauthorized { status: u16, body: String },
    #[error("provider rate limit or quota exceeded: {body}")]
    RateLimited { body: String },
    #[error("provider request timed out")]
    Timeout,
    #[error("could not reach provider: {0}")]
    Transport(String),
    #[error("provider error {status}: {body}")]
    Upstream { status: u16, body: String },
    #[error("provider rejected the request ({status}): {body}")]
    Rejected { status: u16, body: String },
    #[error("malformed provider response: {0}")]
    MalformedResponse(String),
    #[error("provider returned an empty diagnosis")]
    EmptyResponse,
}

impl DiagnosisError {
    /// Whether the same request might succeed later. Used for logging only;
    /// nothing is retried automatically.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DiagnosisError::RateLimited { .. }
                | DiagnosisError::Timeout
                | DiagnosisError::Transport(_)
                | DiagnosisError::Upstream { .. }
                | DiagnosisError::EmptyResponse
        )
    }

    pub fn kind(&self) -> &'static str {
        match self {
            DiagnosisError::Unauthorized { .. } => "unauthorized",
            DiagnosisError::RateLimited { .. } => "rate_limited",
            DiagnosisError::Timeout => "timeout",
            DiagnosisError::Transport(_) => "transport",
            DiagnosisError::Upstream { .. } => "upstream",
            DiagnosisError::Rejected { .. } => "rejected",
            DiagnosisError::MalformedResponse(_) => "malformed_response",
            DiagnosisError::EmptyResponse => "empty_response",
        }
    }

    fn from_status(status: reqwest::StatusCode, body: String) -> Self {
        match status.as_u16() {
            401 | 403 => DiagnosisError::Unauthorized {
                status: status.as_u16(),
                body,
            },
            429 => DiagnosisError::RateLimited { body },
            s if status.is_server_error() => DiagnosisError::Upstream { status: s, body },
            s => DiagnosisError::Rejected { status: s, body },
        }
    }
}

impl From<reqwest::Error> for DiagnosisError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            DiagnosisError::Timeout
        } else {
            DiagnosisError::Transport(e.to_string())
        }
    }
}

#[async_trait]
pub trait DiagnosisProvider: Send + Sync {
    /// Returns the model's text exactly as produced.
    async fn diagnose(&self, request: &DiagnosisRequest) -> Result<String, DiagnosisError>;

    fn model(&self) -> &str;
}

#[derive(Debug, Serialize)]
struct GenerateContentRequest<'a> {
    contents: Vec<GeminiContent<'a>>,
}

#[derive(Debug, Serialize)]
struct GeminiContent<'a> {
    parts: Vec<GeminiPart<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
enum GeminiPart<'a> {
    Text(&'a str),
    InlineData(GeminiInlineData<'a>),
}

#[derive(Debug, Serialize)]
struct GeminiInlineData<'a> {
    #[serde(rename = "mimeType")]
    mime_type: &'a str,
    data: String,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    #[serde(rename = "promptFeedback")]
    prompt_feedback: Option<GeminiPromptFeedback>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiResponseContent>,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponseContent {
    #[serde(default)]
    parts: Vec<GeminiResponsePart>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponsePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiPromptFeedback {
    #[serde(rename = "blockReason")]
    block_reason: Option<String>,
}

impl<'a> GenerateContentRequest<'a> {
    fn from_diagnosis(request: &'a DiagnosisRequest) -> Self {
        let image = request.image();
        Self {
            contents: vec![GeminiContent {
                parts: vec![
                    GeminiPart::Text(request.instruction()),
                    GeminiPart::InlineData(GeminiInlineData {
                        mime_type: image.mime_type(),
                        data: BASE64.encode(&image.bytes),
                    }),
                ],
            }],
        }
    }
}

impl GenerateContentResponse {
    fn into_text(self) -> Result<String, DiagnosisError> {
        let Some(candidate) = self.candidates.into_iter().next() else {
            let reason = self
                .prompt_feedback
                .and_then(|f| f.block_reason)
                .unwrap_or_else(|| "none given".to_string());
            return Err(DiagnosisError::MalformedResponse(format!(
                "no candidates returned (block reason: {})",
                reason
            )));
        };

        let text: String = candidate
            .content
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();

        if text.trim().is_empty() {
            tracing::warn!(
                "Gemini candidate had no text (finish reason: {:?})",
                candidate.finish_reason
            );
            return Err(DiagnosisError::EmptyResponse);
        }

        Ok(text)
    }
}

/// `generateContent` client for the Gemini REST API.
pub struct GeminiClient {
    http_client: reqwest::Client,
    api_key: ApiKey,
    model: String,
    endpoint: String,
}

impl GeminiClient {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self {
            http_client,
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            endpoint: config.endpoint.clone(),
        })
    }

    fn url(&self) -> String {
        format!("{}/v1beta/models/{}:generateContent", self.endpoint, self.model)
    }
}

#[async_trait]
impl DiagnosisProvider for GeminiClient {
    async fn diagnose(&self, request: &DiagnosisRequest) -> Result<String, DiagnosisError> {
        let req_body = GenerateContentRequest::from_diagnosis(request);
        let started = Instant::now();

        let res = self
            .http_client
            .post(self.url())
            .header("x-goog-api-key", self.api_key.expose())
            .json(&req_body)
            .send()
            .await?;

        let status = res.status();
        let body = res.text().await?;

        tracing::debug!(
            "Gemini responded {} in {}ms",
            status,
            started.elapsed().as_millis()
        );

        if !status.is_success() {
            return Err(DiagnosisError::from_status(status, body));
        }

        let parsed: GenerateContentResponse = serde_json::from_str(&body)
            .map_err(|e| DiagnosisError::MalformedResponse(format!("{} | body: {}", e, body)))?;

        parsed.into_text()
    }

    fn model(&self) -> &str {
        &self.model
    }
}
