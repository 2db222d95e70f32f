//! Hosted vision-language-model backend
//!
//! Sends the spine photo to an OpenAI-compatible chat-completions endpoint
//! and asks for `{title, author, text}` JSON. Responses that are not valid
//! JSON degrade to raw text with no title/author guess.

use anyhow::Context;
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{OcrError, SpineOcr, SpineText};
use crate::config::OcrConfig;

const SYSTEM_PROMPT: &str =
    "You are an OCR extraction helper. Extract the book title and author from the provided \
     book spine photo.";
const USER_PROMPT: &str =
    "Extract the book title and author from this book spine photo. Return JSON with keys \
     title, author, text.";

pub struct VisionOcr {
    client: reqwest::Client,
    api_base: String,
    api_key: String,
    model: String,
}

impl VisionOcr {
    pub fn new(config: &OcrConfig) -> anyhow::Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .context("OPENAI_API_KEY is required for the vision OCR backend")?;

        Ok(Self {
            client: reqwest::Client::new(),
            api_base: config.api_base.trim_end_matches('/').to_string(),
            api_key,
            model: config.model.clone(),
        })
    }
}

#[async_trait]
impl SpineOcr for VisionOcr {
    fn name(&self) -> &'static str {
        "vision"
    }

    async fn extract(&self, image_data: &[u8]) -> Result<SpineText, OcrError> {
        let data_url = format!("data:image/jpeg;base64,{}", BASE64.encode(image_data));

        let request = ChatCompletionRequest {
            model: self.model.clone(),
            messages: vec![
                Message {
                    role: "system",
                    content: MessageContent::Text(SYSTEM_PROMPT.to_string()),
                },
                Message {
                    role: "user",
                    content: MessageContent::Parts(vec![
                        ContentPart::Text {
                            text: USER_PROMPT.to_string(),
                        },
                        ContentPart::ImageUrl {
                            image_url: ImageUrl { url: data_url },
                        },
                    ]),
                },
            ],
            max_tokens: 1024,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.api_base))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| OcrError::ApiError(format!("Failed to call vision API: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(OcrError::ApiError(format!(
                "Vision API returned {}: {}",
                status, body
            )));
        }

        let completion: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| OcrError::ApiError(format!("Failed to parse vision response: {}", e)))?;

        let output = completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();

        debug!("Vision OCR output ({} chars)", output.len());
        Ok(parse_spine_json(&output))
    }
}

/// Parse the model's `{title, author, text}` JSON, tolerating markdown code
/// fences. Anything unparseable becomes plain text output.
fn parse_spine_json(output: &str) -> SpineText {
    let trimmed = strip_code_fence(output.trim());

    match serde_json::from_str::<serde_json::Value>(trimmed) {
        Ok(parsed) => {
            let field = |key: &str| {
                parsed
                    .get(key)
                    .and_then(|v| v.as_str())
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
            };
            SpineText {
                text: field("text").unwrap_or_else(|| output.trim().to_string()),
                title: field("title"),
                author: field("author"),
            }
        }
        Err(_) => SpineText {
            text: output.trim().to_string(),
            title: None,
            author: None,
        },
    }
}

fn strip_code_fence(s: &str) -> &str {
    let s = s
        .strip_prefix("```json")
        .or_else(|| s.strip_prefix("```"))
        .unwrap_or(s);
    s.strip_suffix("```").unwrap_or(s).trim()
}

// ── Wire types ──────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<Message>,
    max_tokens: u32,
}

#[derive(Serialize)]
struct Message {
    role: &'static str,
    content: MessageContent,
}

#[derive(Serialize)]
#[serde(untagged)]
enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_spine_json_full() {
        let result = parse_spine_json(
            r#"{"title": "Moby Dick", "author": "Herman Melville", "text": "MOBY DICK\nHERMAN MELVILLE"}"#,
        );
        assert_eq!(result.title.as_deref(), Some("Moby Dick"));
        assert_eq!(result.author.as_deref(), Some("Herman Melville"));
        assert_eq!(result.text, "MOBY DICK\nHERMAN MELVILLE");
    }

    #[test]
    fn test_parse_spine_json_with_code_fence() {
        let result = parse_spine_json("```json\n{\"title\": \"Dune\", \"text\": \"DUNE\"}\n```");
        assert_eq!(result.title.as_deref(), Some("Dune"));
        assert_eq!(result.author, None);
    }

    #[test]
    fn test_parse_spine_json_empty_fields_become_none() {
        let result = parse_spine_json(r#"{"title": "", "author": "  ", "text": "SOMETHING"}"#);
        assert_eq!(result.title, None);
        assert_eq!(result.author, None);
        assert_eq!(result.text, "SOMETHING");
    }

    #[test]
    fn test_parse_spine_json_falls_back_to_raw_text() {
        let result = parse_spine_json("The spine says: Moby Dick by Herman Melville");
        assert_eq!(result.title, None);
        assert_eq!(result.author, None);
        assert_eq!(result.text, "The spine says: Moby Dick by Herman Melville");
    }
}
