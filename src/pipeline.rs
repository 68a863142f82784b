use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::{
    config::{AppConfig, DownloaderKind},
    dispatch::{FanoutPolicy, TaskOutcome, dispatch},
    download::{Downloader, GalleryDlDownloader, HttpDownloader},
    error::ServiceError,
    modes::{self, PoolId},
    prompts::{DEFAULT_VARIANT_COUNT, VariantOptions},
    variants::generate_variants,
    vision::{OpenAiSettings, OpenAiVisionClient, VisionClient},
    worker::{DiffusionWorkerFactory, GenerationPreset, GenerationTask, PoolStatus, WorkerPool},
};

fn default_mode() -> String {
    modes::PROFILE_PICTURE_TOKEN.to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct GenerationRequest {
    pub url: String,
    #[serde(default = "default_mode")]
    pub mode: String,
    #[serde(default)]
    pub instruction: Option<String>,
    #[serde(default)]
    pub style: Option<String>,
    #[serde(default)]
    pub count: Option<usize>,
}

impl GenerationRequest {
    pub fn new(url: impl Into<String>, mode: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            mode: mode.into(),
            instruction: None,
            style: None,
            count: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PipelineResponse {
    Completed {
        mode: String,
        generator: String,
        results: Vec<TaskOutcome>,
    },
    Failed {
        error: String,
    },
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PhaseTimings {
    pub prompt_generation: Duration,
    pub fan_out: Duration,
    pub total: Duration,
}

/// Builds the success payload. Timings are logged only.
pub fn aggregate(
    mode: &str,
    generator: &str,
    results: Vec<TaskOutcome>,
    timings: &PhaseTimings,
) -> PipelineResponse {
    let failed = results
        .iter()
        .filter(|r| matches!(r, TaskOutcome::Failed { .. }))
        .count();
    tracing::info!(
        %mode,
        %generator,
        images = results.len() - failed,
        failed,
        prompt_ms = timings.prompt_generation.as_millis() as u64,
        fan_out_ms = timings.fan_out.as_millis() as u64,
        total_ms = timings.total.as_millis() as u64,
        "generation complete"
    );

    PipelineResponse::Completed {
        mode: mode.to_string(),
        generator: generator.to_string(),
        results,
    }
}

pub struct Pipeline {
    downloader: Arc<dyn Downloader>,
    vision: Arc<dyn VisionClient>,
    pools: HashMap<PoolId, Arc<WorkerPool>>,
    policy: FanoutPolicy,
    variant_count: usize,
}

impl Pipeline {
    pub fn new(
        downloader: Arc<dyn Downloader>,
        vision: Arc<dyn VisionClient>,
        pools: Vec<Arc<WorkerPool>>,
    ) -> Self {
        Self {
            downloader,
            vision,
            pools: pools.into_iter().map(|pool| (pool.id(), pool)).collect(),
            policy: FanoutPolicy::default(),
            variant_count: DEFAULT_VARIANT_COUNT,
        }
    }

    /// Wires the HTTP collaborators and one diffusion pool per mode.
    pub fn initialize(config: &AppConfig) -> Result<Self, ServiceError> {
        let downloader: Arc<dyn Downloader> = match config.downloader {
            DownloaderKind::Http => Arc::new(HttpDownloader::new(config.download_timeout)?),
            DownloaderKind::GalleryDl => {
                Arc::new(GalleryDlDownloader::new(config.download_dir.clone()))
            }
        };

        let vision = Arc::new(OpenAiVisionClient::new(OpenAiSettings {
            api_key: config.openai_api_key.clone(),
            base_url: config.openai_base_url.clone(),
            model: config.vision_model.clone(),
            timeout: config.vision_timeout,
        })?);

        let pools = [
            (PoolId::ProfilePicture, &config.pfp_backend_url),
            (PoolId::Wallpaper, &config.wallpaper_backend_url),
        ]
        .into_iter()
        .map(|(id, endpoint)| {
            let factory = DiffusionWorkerFactory::http(
                GenerationPreset::for_pool(id),
                endpoint.clone(),
                config.generation_timeout,
            )
            .with_storage(config.storage.clone())
            .with_output_dir(config.output_dir.clone());
            Arc::new(WorkerPool::new(
                id,
                generator_name(id),
                Arc::new(factory),
                config.worker_idle_timeout,
            ))
        })
        .collect();

        Ok(Self::new(downloader, vision, pools)
            .with_policy(config.fanout_policy)
            .with_variant_count(config.variant_count))
    }

    pub fn with_policy(mut self, policy: FanoutPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_variant_count(mut self, count: usize) -> Self {
        self.variant_count = count;
        self
    }

    pub fn pools(&self) -> impl Iterator<Item = &Arc<WorkerPool>> {
        self.pools.values()
    }

    pub fn pool_statuses(&self) -> Vec<PoolStatus> {
        let mut statuses: Vec<_> = self.pools().map(|pool| pool.status()).collect();
        statuses.sort_by_key(|status| status.generator.clone());
        statuses
    }

    pub async fn run(&self, request: &GenerationRequest) -> Result<PipelineResponse, ServiceError> {
        let started = Instant::now();
        if request.url.trim().is_empty() {
            return Err(ServiceError::BadRequest("url must not be empty".into()));
        }

        let resolved = modes::resolve(&request.mode);
        let pool = self.pools.get(&resolved.pool).ok_or_else(|| {
            ServiceError::WorkerStartup(format!("no worker pool for {:?}", resolved.pool))
        })?;

        let image = self.downloader.fetch(&request.url).await?;
        tracing::info!(bytes = image.len(), mode = %request.mode, "reference image downloaded");

        let options = VariantOptions::new(resolved.prompt_format)
            .with_count(request.count.unwrap_or(self.variant_count))
            .with_instruction(request.instruction.clone())
            .with_style(request.style.clone());
        let prompt_started = Instant::now();
        let variants = generate_variants(self.vision.as_ref(), &image, &options).await?;
        let prompt_generation = prompt_started.elapsed();
        tracing::debug!(?variants, "prompt variants");

        let tasks: Vec<GenerationTask> = variants
            .iter()
            .map(|variant| GenerationTask::from_variant(resolved.aspect_ratio, variant))
            .collect();
        let fan_out_started = Instant::now();
        let results = dispatch(pool, tasks, self.policy).await?;

        let timings = PhaseTimings {
            prompt_generation,
            fan_out: fan_out_started.elapsed(),
            total: started.elapsed(),
        };
        Ok(aggregate(&request.mode, resolved.display_name, results, &timings))
    }

    /// Transport-free entry point: like [`Pipeline::run`], with any failure
    /// folded into the `{error}` payload. The HTTP handler calls `run` instead
    /// so errors keep their status codes.
    pub async fn handle(&self, request: &GenerationRequest) -> PipelineResponse {
        match self.run(request).await {
            Ok(response) => response,
            Err(err) => {
                tracing::warn!(error = %err, url = %request.url, "generation request failed");
                PipelineResponse::Failed {
                    error: err.to_string(),
                }
            }
        }
    }
}

pub fn generator_name(pool: PoolId) -> &'static str {
    match pool {
        PoolId::ProfilePicture => modes::resolve(modes::PROFILE_PICTURE_TOKEN).display_name,
        PoolId::Wallpaper => modes::resolve(modes::WALLPAPER_TOKEN).display_name,
    }
}
