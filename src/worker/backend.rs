use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

use crate::error::ServiceError;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderRequest {
    pub model: String,
    pub prompt: String,
    pub negative_prompt: String,
    pub width: u32,
    pub height: u32,
    pub num_inference_steps: u32,
    pub guidance_scale: f32,
    pub seed: u64,
}

/// Model internals of a generation worker: loaded once, then renders PNG bytes.
#[async_trait]
pub trait ImageBackend: Send + Sync {
    async fn load(&mut self) -> Result<(), ServiceError>;

    async fn render(&self, request: &RenderRequest) -> Result<Vec<u8>, ServiceError>;
}

/// Talks to a diffusion inference server that exposes `/health` and
/// `/generate`.
pub struct HttpDiffusionBackend {
    endpoint: String,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct RenderResponse {
    images: Vec<String>,
}

impl HttpDiffusionBackend {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, ServiceError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ServiceError::WorkerStartup(e.to_string()))?;
        Ok(Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            http,
        })
    }
}

#[async_trait]
impl ImageBackend for HttpDiffusionBackend {
    async fn load(&mut self) -> Result<(), ServiceError> {
        let url = format!("{}/health", self.endpoint);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| ServiceError::WorkerStartup(format!("{url}: {e}")))?;
        if !response.status().is_success() {
            return Err(ServiceError::WorkerStartup(format!(
                "{url} returned {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn render(&self, request: &RenderRequest) -> Result<Vec<u8>, ServiceError> {
        let url = format!("{}/generate", self.endpoint);
        let response = self
            .http
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| ServiceError::Generation(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ServiceError::Generation(format!(
                "inference server returned {status}: {body}"
            )));
        }

        let body: RenderResponse = response
            .json()
            .await
            .map_err(|e| ServiceError::Generation(format!("invalid inference response: {e}")))?;
        decode_first_image(body)
    }
}

fn decode_first_image(body: RenderResponse) -> Result<Vec<u8>, ServiceError> {
    let encoded = body
        .images
        .into_iter()
        .next()
        .ok_or_else(|| ServiceError::Generation("no images generated".into()))?;
    STANDARD
        .decode(encoded.as_bytes())
        .map_err(|e| ServiceError::Generation(format!("image payload is not base64: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_image_is_decoded() {
        let body = RenderResponse {
            images: vec!["iVBORw==".into(), "ignored".into()],
        };
        assert_eq!(decode_first_image(body).unwrap(), vec![0x89, b'P', b'N', b'G']);
    }

    #[test]
    fn empty_image_list_is_a_generation_error() {
        let err = decode_first_image(RenderResponse { images: vec![] }).unwrap_err();
        assert!(matches!(err, ServiceError::Generation(_)));
    }

    #[test]
    fn endpoint_trailing_slash_is_trimmed() {
        let backend = HttpDiffusionBackend::new("http://gpu:7860/", Duration::from_secs(1)).unwrap();
        assert_eq!(backend.endpoint, "http://gpu:7860");
    }
}
