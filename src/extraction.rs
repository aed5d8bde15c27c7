use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::errors::{AppError, AppResult};

pub const EXTRACTION_INSTRUCTION: &str =
    "Extract a concrete, geocodable place name from the following text. \
     Reply with the place name only, written so a geocoding service can find it.";
pub const EXTRACTION_DIRECTIVE: &str = "Extract location";

const MAX_ERROR_BODY_CHARS: usize = 200;

/// Turns free text into a place name that a geocoder can look up.
#[async_trait]
pub trait PlaceExtractor: Send + Sync {
    async fn extract_place(&self, description: &str) -> AppResult<String>;
}

pub struct ChatCompletionExtractor {
    http: Client,
    endpoint: String,
    api_key: SecretString,
    model: String,
}

impl ChatCompletionExtractor {
    pub fn new(
        http: Client,
        endpoint: impl Into<String>,
        api_key: SecretString,
        model: impl Into<String>,
    ) -> Self {
        Self {
            http,
            endpoint: endpoint.into(),
            api_key,
            model: model.into(),
        }
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 3],
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[async_trait]
impl PlaceExtractor for ChatCompletionExtractor {
    async fn extract_place(&self, description: &str) -> AppResult<String> {
        let body = ChatRequest {
            model: &self.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: EXTRACTION_INSTRUCTION,
                },
                ChatMessage {
                    role: "system",
                    content: EXTRACTION_DIRECTIVE,
                },
                ChatMessage {
                    role: "user",
                    content: description,
                },
            ],
        };

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(AppError::from_http)?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            let detail: String = detail.chars().take(MAX_ERROR_BODY_CHARS).collect();
            return Err(AppError::Service(format!(
                "extraction service returned {status}: {detail}"
            )));
        }

        let parsed: ChatResponse = response.json().await.map_err(AppError::from_http)?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty())
            .ok_or_else(|| AppError::Service("extraction service returned no usable text".into()))
    }
}
