//! Vision-language model client.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::{error::ServiceError, parser::ModelOutput, prompts::SYSTEM_PERSONA};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o-mini";
const MAX_TOKENS: u32 = 1000;

/// Raw result of one completion call, before any parsing.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub content: Option<ModelOutput>,
    pub refusal: Option<String>,
    pub finish_reason: String,
}

#[async_trait]
pub trait VisionClient: Send + Sync {
    async fn complete(&self, image: &[u8], instruction: &str) -> Result<Completion, ServiceError>;
}

#[derive(Debug, Clone)]
pub struct OpenAiSettings {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub timeout: Duration,
}

impl OpenAiSettings {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            timeout: Duration::from_secs(120),
        }
    }
}

/// Chat-completions client for OpenAI-compatible endpoints.
pub struct OpenAiVisionClient {
    settings: OpenAiSettings,
    http: reqwest::Client,
}

impl OpenAiVisionClient {
    pub fn new(settings: OpenAiSettings) -> Result<Self, ServiceError> {
        let http = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| ServiceError::Vision(e.to_string()))?;
        Ok(Self { settings, http })
    }

    fn request_body(&self, image: &[u8], instruction: &str) -> Value {
        let image_base64 = STANDARD.encode(image);
        json!({
            "model": self.settings.model,
            "messages": [
                { "role": "system", "content": SYSTEM_PERSONA },
                {
                    "role": "user",
                    "content": [
                        { "type": "text", "text": instruction },
                        {
                            "type": "image_url",
                            "image_url": { "url": format!("data:image/png;base64,{image_base64}") }
                        }
                    ]
                }
            ],
            "max_tokens": MAX_TOKENS,
            "response_format": { "type": "json_object" }
        })
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<Value>,
    refusal: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

impl ChatResponse {
    fn into_completion(self) -> Result<Completion, ServiceError> {
        let choice = self
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ServiceError::Vision("response contained no choices".into()))?;

        let content = match choice.message.content {
            Some(Value::String(text)) => Some(ModelOutput::RawText(text)),
            Some(Value::Null) | None => None,
            Some(other) => Some(ModelOutput::Structured(other)),
        };

        Ok(Completion {
            content,
            refusal: choice.message.refusal.filter(|r| !r.trim().is_empty()),
            finish_reason: choice.finish_reason.unwrap_or_else(|| "unknown".into()),
        })
    }
}

#[async_trait]
impl VisionClient for OpenAiVisionClient {
    async fn complete(&self, image: &[u8], instruction: &str) -> Result<Completion, ServiceError> {
        let url = format!(
            "{}/chat/completions",
            self.settings.base_url.trim_end_matches('/')
        );
        tracing::debug!(model = %self.settings.model, bytes = image.len(), "requesting prompt variants");

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.settings.api_key)
            .json(&self.request_body(image, instruction))
            .send()
            .await
            .map_err(|e| ServiceError::Vision(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .json::<ApiErrorBody>()
                .await
                .map(|body| body.error.message)
                .unwrap_or_else(|_| "unknown error".into());
            return Err(ServiceError::Vision(format!("API error ({status}): {message}")));
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| ServiceError::Vision(format!("failed to decode response: {e}")))?;
        body.into_completion()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(value: Value) -> Completion {
        serde_json::from_value::<ChatResponse>(value)
            .unwrap()
            .into_completion()
            .unwrap()
    }

    #[test]
    fn string_content_is_raw_text() {
        let completion = decode(json!({
            "choices": [{ "message": { "content": "{\"variants\": []}" }, "finish_reason": "stop" }]
        }));

        assert_eq!(
            completion.content,
            Some(ModelOutput::RawText("{\"variants\": []}".into()))
        );
        assert_eq!(completion.finish_reason, "stop");
    }

    #[test]
    fn refusal_without_content_is_kept() {
        let completion = decode(json!({
            "choices": [{
                "message": { "content": null, "refusal": "I can't help with that." },
                "finish_reason": "stop"
            }]
        }));

        assert_eq!(completion.content, None);
        assert_eq!(completion.refusal.as_deref(), Some("I can't help with that."));
    }

    #[test]
    fn object_content_is_structured() {
        let completion = decode(json!({
            "choices": [{ "message": { "content": { "variants": [] } } }]
        }));

        assert!(matches!(completion.content, Some(ModelOutput::Structured(_))));
        assert_eq!(completion.finish_reason, "unknown");
    }

    #[test]
    fn request_embeds_image_as_data_url() {
        let client = OpenAiVisionClient::new(OpenAiSettings::new("sk-test")).unwrap();
        let body = client.request_body(&[1, 2, 3], "describe");

        assert_eq!(body["messages"][1]["content"][0]["text"], "describe");
        assert_eq!(
            body["messages"][1]["content"][1]["image_url"]["url"],
            "data:image/png;base64,AQID"
        );
        assert_eq!(body["response_format"]["type"], "json_object");
    }
}
