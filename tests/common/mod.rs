#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use fanout_art_service::{
    Pipeline,
    download::Downloader,
    error::{DownloadError, ServiceError},
    modes::PoolId,
    parser::ModelOutput,
    vision::{Completion, VisionClient},
    worker::{GenerationResult, GenerationTask, Worker, WorkerFactory, WorkerPool},
};

pub const IMAGE: &[u8] = b"\x89PNG reference";

/// Serves one fixed image, or 404s for URLs containing "missing".
pub struct FixedDownloader;

#[async_trait]
impl Downloader for FixedDownloader {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, DownloadError> {
        if url.contains("missing") {
            return Err(DownloadError::NotFound(url.to_string()));
        }
        Ok(IMAGE.to_vec())
    }
}

pub struct ScriptedVision {
    completion: Completion,
    pub calls: AtomicUsize,
}

impl ScriptedVision {
    pub fn variants(prompts: &[&str]) -> Self {
        let variants: Vec<_> = prompts
            .iter()
            .enumerate()
            .map(|(i, prompt)| {
                serde_json::json!({"variant": i + 1, "category": "Anime Characters", "prompt": prompt})
            })
            .collect();
        let body = serde_json::json!({ "variants": variants }).to_string();
        Self::with(Completion {
            content: Some(ModelOutput::RawText(format!("```json\n{body}\n```"))),
            refusal: None,
            finish_reason: "stop".into(),
        })
    }

    pub fn refusal(text: &str) -> Self {
        Self::with(Completion {
            content: None,
            refusal: Some(text.to_string()),
            finish_reason: "stop".into(),
        })
    }

    fn with(completion: Completion) -> Self {
        Self {
            completion,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl VisionClient for ScriptedVision {
    async fn complete(&self, image: &[u8], _instruction: &str) -> Result<Completion, ServiceError> {
        assert_eq!(image, IMAGE);
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.completion.clone())
    }
}

/// Records every start and prompt. Prompts containing "bad" fail.
#[derive(Default)]
pub struct RecordingFactory {
    pub starts: AtomicUsize,
    pub prompts: Arc<Mutex<Vec<String>>>,
}

struct RecordingWorker {
    prompts: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl Worker for RecordingWorker {
    async fn generate(&mut self, task: &GenerationTask) -> Result<GenerationResult, ServiceError> {
        self.prompts.lock().push(task.prompt.clone());
        tokio::task::yield_now().await;
        if task.prompt.contains("bad") {
            return Err(ServiceError::Generation(format!("diffusion failed on '{}'", task.prompt)));
        }
        let name = format!("{}x{}_{}.png", task.aspect_ratio.width, task.aspect_ratio.height, task.prompt);
        Ok(GenerationResult::local_only(PathBuf::from(name)))
    }
}

#[async_trait]
impl WorkerFactory for RecordingFactory {
    async fn start(&self) -> Result<Box<dyn Worker>, ServiceError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(RecordingWorker {
            prompts: self.prompts.clone(),
        }))
    }
}

pub struct Harness {
    pub pipeline: Pipeline,
    pub vision: Arc<ScriptedVision>,
    pub pfp: Arc<RecordingFactory>,
    pub wallpaper: Arc<RecordingFactory>,
}

pub fn harness(vision: ScriptedVision) -> Harness {
    let vision = Arc::new(vision);
    let pfp = Arc::new(RecordingFactory::default());
    let wallpaper = Arc::new(RecordingFactory::default());

    let pools = vec![
        Arc::new(WorkerPool::new(
            PoolId::ProfilePicture,
            "Qwen (PFP)",
            pfp.clone(),
            Duration::from_secs(30),
        )),
        Arc::new(WorkerPool::new(
            PoolId::Wallpaper,
            "SDXL (Mobile Wallpaper)",
            wallpaper.clone(),
            Duration::from_secs(30),
        )),
    ];
    let pipeline = Pipeline::new(Arc::new(FixedDownloader), vision.clone(), pools);

    Harness {
        pipeline,
        vision,
        pfp,
        wallpaper,
    }
}
