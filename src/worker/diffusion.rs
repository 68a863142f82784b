use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::fs;

use crate::{
    error::ServiceError,
    modes::PoolId,
    storage::{ArtifactStore, StorageBackend, storage_key},
    worker::{
        GenerationResult, GenerationTask, HttpDiffusionBackend, ImageBackend, RenderRequest,
        Worker, WorkerFactory,
    },
};

const SEED: u64 = 42;

/// Model id and sampling settings for one worker pool.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationPreset {
    pub model: &'static str,
    pub positive_suffix: &'static str,
    pub negative_prompt: &'static str,
    pub steps: u32,
    pub guidance_scale: f32,
    pub file_prefix: &'static str,
    pub storage_prefix: &'static str,
}

impl GenerationPreset {
    pub fn qwen_profile() -> Self {
        Self {
            model: "Qwen/Qwen-Image",
            positive_suffix: ", Ultra HD, 4K, cinematic composition.",
            negative_prompt: "low quality, worst quality, blurry, pixelated, jpeg artifacts, \
                overexposed, underexposed, bad anatomy, bad proportions, deformed body, \
                extra limbs, missing limbs, extra fingers, fused fingers, malformed hands, \
                duplicate character, multiple faces, crossed eyes, text, watermark, logo, \
                signature, UI elements, border, frame, oversaturated, 3d render, cgi",
            steps: 20,
            guidance_scale: 4.0,
            file_prefix: "premium",
            storage_prefix: "premium_raw_images",
        }
    }

    pub fn sdxl_wallpaper() -> Self {
        Self {
            model: "stabilityai/stable-diffusion-xl-base-1.0",
            positive_suffix: ", highly detailed, photorealistic, 8k resolution, cinematic lighting",
            negative_prompt: "artistic, drawing, painting, sketch, cartoon, anime, blurry, \
                low quality, distorted",
            steps: 30,
            guidance_scale: 7.5,
            file_prefix: "sdxl",
            storage_prefix: "sdxl_raw_images",
        }
    }

    pub fn for_pool(pool: PoolId) -> Self {
        match pool {
            PoolId::ProfilePicture => Self::qwen_profile(),
            PoolId::Wallpaper => Self::sdxl_wallpaper(),
        }
    }

    pub fn render_request(&self, task: &GenerationTask) -> RenderRequest {
        RenderRequest {
            model: self.model.to_string(),
            prompt: format!("{}{}", task.prompt, self.positive_suffix),
            negative_prompt: self.negative_prompt.to_string(),
            width: task.aspect_ratio.width,
            height: task.aspect_ratio.height,
            num_inference_steps: self.steps,
            guidance_scale: self.guidance_scale,
            seed: SEED,
        }
    }
}

pub struct DiffusionWorker {
    preset: GenerationPreset,
    backend: Box<dyn ImageBackend>,
    store: Option<Arc<dyn ArtifactStore>>,
    output_dir: PathBuf,
    timeout: Duration,
}

impl DiffusionWorker {
    async fn render_and_store(
        &self,
        task: &GenerationTask,
    ) -> Result<GenerationResult, ServiceError> {
        tracing::info!(
            model = self.preset.model,
            prompt = %preview(&task.prompt),
            category = %task.category,
            "generating image"
        );

        let request = self.preset.render_request(task);
        let png = self.backend.render(&request).await?;

        fs::create_dir_all(&self.output_dir).await?;
        // Never derived from model text.
        let filename = format!(
            "{}_{}_{}.png",
            self.preset.file_prefix,
            chrono::Utc::now().timestamp(),
            &uuid::Uuid::new_v4().simple().to_string()[..8]
        );
        let local_path = self.output_dir.join(&filename);
        fs::write(&local_path, &png).await?;

        let Some(store) = &self.store else {
            return Ok(GenerationResult::local_only(local_path));
        };

        let key = storage_key(self.preset.storage_prefix, &task.category, &filename);
        match store.upload(&local_path, &key).await {
            Ok(()) => {
                tracing::info!(%key, "artifact uploaded");
                Ok(GenerationResult::stored(key, local_path))
            }
            Err(err) => {
                tracing::warn!(%key, error = %err, "upload failed, keeping local artifact");
                Ok(GenerationResult::local_only(local_path))
            }
        }
    }
}

#[async_trait]
impl Worker for DiffusionWorker {
    async fn generate(&mut self, task: &GenerationTask) -> Result<GenerationResult, ServiceError> {
        tokio::time::timeout(self.timeout, self.render_and_store(task))
            .await
            .map_err(|_| {
                ServiceError::Generation(format!(
                    "generation timed out after {}s",
                    self.timeout.as_secs()
                ))
            })?
    }
}

type BackendBuilder =
    Box<dyn Fn() -> Result<Box<dyn ImageBackend>, ServiceError> + Send + Sync>;

/// Starts [`DiffusionWorker`]s: loads the backend model, then connects the
/// artifact store. A store that fails to connect leaves the worker usable
/// with local-only results.
pub struct DiffusionWorkerFactory {
    preset: GenerationPreset,
    build_backend: BackendBuilder,
    storage: StorageBackend,
    output_dir: PathBuf,
    timeout: Duration,
}

impl DiffusionWorkerFactory {
    pub fn new<F>(preset: GenerationPreset, build_backend: F) -> Self
    where
        F: Fn() -> Result<Box<dyn ImageBackend>, ServiceError> + Send + Sync + 'static,
    {
        Self {
            preset,
            build_backend: Box::new(build_backend),
            storage: StorageBackend::Disabled,
            output_dir: PathBuf::from("/tmp/generated_images"),
            timeout: Duration::from_secs(1200),
        }
    }

    pub fn http(preset: GenerationPreset, endpoint: String, timeout: Duration) -> Self {
        Self::new(preset, move || {
            let backend: Box<dyn ImageBackend> =
                Box::new(HttpDiffusionBackend::new(endpoint.clone(), timeout)?);
            Ok(backend)
        })
        .with_timeout(timeout)
    }

    pub fn with_storage(mut self, storage: StorageBackend) -> Self {
        self.storage = storage;
        self
    }

    pub fn with_output_dir(mut self, output_dir: impl Into<PathBuf>) -> Self {
        self.output_dir = output_dir.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl WorkerFactory for DiffusionWorkerFactory {
    async fn start(&self) -> Result<Box<dyn Worker>, ServiceError> {
        tracing::info!(model = self.preset.model, "loading model");
        let mut backend = (self.build_backend)()?;
        backend.load().await?;

        let store = match self.storage.connect().await {
            Ok(Some(store)) => {
                tracing::info!(store = %store.describe(), "artifact storage configured");
                Some(store)
            }
            Ok(None) => None,
            Err(err) => {
                tracing::warn!(error = %err, "storage unavailable, results will be local only");
                None
            }
        };

        Ok(Box::new(DiffusionWorker {
            preset: self.preset.clone(),
            backend,
            store,
            output_dir: self.output_dir.clone(),
            timeout: self.timeout,
        }))
    }
}

fn preview(prompt: &str) -> String {
    let mut short: String = prompt.chars().take(40).collect();
    if short.len() < prompt.len() {
        short.push_str("...");
    }
    short
}
