use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("no image found at {0}")]
    NotFound(String),
    #[error("network error: {0}")]
    Network(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("model returned an empty response")]
    EmptyResponse,
    #[error("model output is not valid JSON: {0}")]
    MalformedOutput(String),
    #[error("model output does not match the variant schema: {0}")]
    SchemaViolation(String),
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("failed to download reference image: {0}")]
    Download(#[from] DownloadError),
    #[error("failed to read prompt variants: {0}")]
    Parse(#[from] ParseError),
    #[error("LLM refused to generate prompt: {0}")]
    ModelRefusal(String),
    #[error("LLM returned no content. Finish reason: {0}")]
    NoContent(String),
    #[error("vision model request failed: {0}")]
    Vision(String),
    #[error("generation worker failed to start: {0}")]
    WorkerStartup(String),
    #[error("image generation failed: {0}")]
    Generation(String),
    #[error("invalid request: {0}")]
    BadRequest(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServiceError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServiceError::Download(DownloadError::NotFound(_)) => StatusCode::NOT_FOUND,
            ServiceError::Download(DownloadError::Network(_))
            | ServiceError::Parse(_)
            | ServiceError::ModelRefusal(_)
            | ServiceError::NoContent(_)
            | ServiceError::Vision(_) => StatusCode::BAD_GATEWAY,
            ServiceError::WorkerStartup(_) => StatusCode::SERVICE_UNAVAILABLE,
            ServiceError::Generation(_) | ServiceError::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = serde_json::json!({
            "error": self.to_string(),
        });

        (status, axum::Json(body)).into_response()
    }
}
