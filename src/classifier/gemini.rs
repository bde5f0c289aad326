//! Google Gemini image classifier

use super::{Assessment, ClassifierError, ImageClassifier};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

const SCREENING_PROMPT: &str = "You are assessing a medical photo of the inside of a human mouth. \
Determine whether the photo shows signs consistent with oral or mouth cancer. \
Respond ONLY with JSON that matches this exact schema: {\"Answer\": boolean, \"Rationale\": string}. \
Set Answer to true only if the image likely shows mouth cancer.";

const DEFAULT_MIME: &str = "image/jpeg";
const API_KEY_HEADER: &str = "x-goog-api-key";

#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: String,
}

/// Gemini classifier implementation
pub struct GeminiClassifier {
    client: Client,
    api_key: Option<String>,
    model: String,
    base_url: String,
}

impl GeminiClassifier {
    pub fn new(config: GeminiConfig) -> Result<Self, ClassifierError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| ClassifierError::unknown(format!("Failed to create HTTP client: {e}")))?;

        if config.api_key.is_none() {
            tracing::warn!("GEMINI_API_KEY not set, classification requests will fail");
        }

        Ok(Self {
            client,
            api_key: config.api_key,
            model: config.model,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        )
    }

    fn build_request(bytes: &[u8], mime_type: &str) -> GeminiRequest {
        GeminiRequest {
            contents: vec![GeminiContent {
                role: Some("user".to_string()),
                parts: vec![
                    GeminiPart::Text {
                        text: SCREENING_PROMPT.to_string(),
                    },
                    GeminiPart::InlineData {
                        inline_data: GeminiBlob {
                            mime_type: mime_type.to_string(),
                            data: STANDARD.encode(bytes),
                        },
                    },
                ],
            }],
            generation_config: GeminiGenerationConfig {
                response_mime_type: "application/json".to_string(),
                response_schema: serde_json::json!({
                    "type": "OBJECT",
                    "properties": {
                        "Answer": {"type": "BOOLEAN"},
                        "Rationale": {"type": "STRING"}
                    },
                    "required": ["Answer", "Rationale"]
                }),
            },
        }
    }

    fn parse_response(resp: GeminiResponse) -> Result<Assessment, ClassifierError> {
        let candidate = resp
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| ClassifierError::malformed("No candidates in response"))?;

        let text = candidate
            .content
            .map(|c| c.parts)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|part| match part {
                GeminiPart::Text { text } => Some(text),
                GeminiPart::InlineData { .. } => None,
            })
            .collect::<Vec<_>>()
            .join("\n");

        parse_verdict(&text)
    }
}

/// Parse the model's `{"Answer": bool, "Rationale": string}` reply
fn parse_verdict(text: &str) -> Result<Assessment, ClassifierError> {
    let body = strip_code_fence(text.trim());
    if body.is_empty() {
        return Err(ClassifierError::malformed("Empty model reply"));
    }
    let verdict: Verdict = serde_json::from_str(body)
        .map_err(|e| ClassifierError::malformed(format!("Unexpected model reply: {e} - {body}")))?;
    Ok(Assessment {
        is_positive: verdict.answer,
        rationale: verdict.rationale.trim().to_string(),
    })
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// Media type from magic bytes, then the file extension, then JPEG
pub(crate) fn detect_mime(path: &Path, bytes: &[u8]) -> String {
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return "image/jpeg".to_string();
    }
    if bytes.starts_with(b"\x89PNG\r\n\x1a\n") {
        return "image/png".to_string();
    }
    if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
        return "image/gif".to_string();
    }
    if bytes.starts_with(b"RIFF") && bytes.get(8..12) == Some(b"WEBP".as_slice()) {
        return "image/webp".to_string();
    }

    mime_guess::from_path(path)
        .first()
        .filter(|m| m.type_().as_str() == "image")
        .map_or_else(|| DEFAULT_MIME.to_string(), |m| m.essence_str().to_string())
}

#[async_trait]
impl ImageClassifier for GeminiClassifier {
    async fn classify(&self, path: &Path) -> Result<Assessment, ClassifierError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ClassifierError::auth("GEMINI_API_KEY not configured"))?;

        let bytes = tokio::fs::read(path).await.map_err(|e| {
            ClassifierError::input(format!("Failed to read {}: {e}", path.display()))
        })?;
        let mime_type = detect_mime(path, &bytes);
        let request = Self::build_request(&bytes, &mime_type);

        let response = self
            .client
            .post(self.endpoint())
            .header(API_KEY_HEADER, api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                let e = e.without_url();
                if e.is_timeout() {
                    ClassifierError::timeout(format!("Request timeout: {e}"))
                } else if e.is_connect() {
                    ClassifierError::network(format!("Connection failed: {e}"))
                } else {
                    ClassifierError::unknown(format!("Request failed: {e}"))
                }
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| {
                ClassifierError::network(format!("Failed to read response: {}", e.without_url()))
            })?;

        if !status.is_success() {
            let message = serde_json::from_str::<GeminiErrorResponse>(&body)
                .map_or(body, |r| r.error.message);
            return Err(match status.as_u16() {
                400 => ClassifierError::invalid_request(format!("Invalid request: {message}")),
                401 | 403 => ClassifierError::auth(format!("Authentication failed: {message}")),
                429 => ClassifierError::rate_limit(format!("Rate limit exceeded: {message}")),
                500..=599 => ClassifierError::server_error(format!("Server error: {message}")),
                _ => ClassifierError::unknown(format!("HTTP {status}: {message}")),
            });
        }

        let gemini_response: GeminiResponse = serde_json::from_str(&body).map_err(|e| {
            ClassifierError::malformed(format!("Failed to parse response: {e} - body: {body}"))
        })?;

        Self::parse_response(gemini_response)
    }

    fn model_id(&self) -> &str {
        &self.model
    }
}

// Gemini API types

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    generation_config: GeminiGenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum GeminiPart {
    Text {
        text: String,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: GeminiBlob,
    },
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiBlob {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiGenerationConfig {
    response_mime_type: String,
    response_schema: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorResponse {
    error: GeminiError,
}

#[derive(Debug, Deserialize)]
struct GeminiError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct Verdict {
    #[serde(rename = "Answer")]
    answer: bool,
    #[serde(rename = "Rationale", default)]
    rationale: String,
}
