pub mod config;
pub mod dispatch;
pub mod download;
pub mod error;
pub mod modes;
pub mod parser;
pub mod pipeline;
pub mod prompts;
pub mod server;
pub mod storage;
pub mod variants;
pub mod vision;
pub mod worker;

pub use config::AppConfig;
pub use dispatch::{FanoutPolicy, TaskOutcome};
pub use error::ServiceError;
pub use pipeline::{GenerationRequest, Pipeline, PipelineResponse};
pub use server::build_router;
