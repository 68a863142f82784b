use std::{
    env,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::PathBuf,
    time::Duration,
};

use anyhow::Context;

use crate::{dispatch::FanoutPolicy, prompts::DEFAULT_VARIANT_COUNT, storage::StorageBackend};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloaderKind {
    Http,
    GalleryDl,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub listen_addr: SocketAddr,
    pub openai_api_key: String,
    pub openai_base_url: String,
    pub vision_model: String,
    pub vision_timeout: Duration,
    pub downloader: DownloaderKind,
    pub download_dir: PathBuf,
    pub download_timeout: Duration,
    pub output_dir: PathBuf,
    pub pfp_backend_url: String,
    pub wallpaper_backend_url: String,
    pub generation_timeout: Duration,
    pub worker_idle_timeout: Duration,
    pub storage: StorageBackend,
    pub variant_count: usize,
    pub fanout_policy: FanoutPolicy,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let listen_addr = env::var("SERVER_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:8080".into())
            .parse()
            .unwrap_or_else(|_| SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 8080));

        let openai_api_key = env::var("OPENAI_API_KEY").context("OPENAI_API_KEY must be set")?;
        let openai_base_url =
            env::var("OPENAI_BASE_URL").unwrap_or_else(|_| "https://api.openai.com/v1".into());
        let vision_model = env::var("VISION_MODEL").unwrap_or_else(|_| "gpt-4o-mini".into());
        let vision_timeout = secs_var("VISION_TIMEOUT_SECS", 120);

        let downloader = match env::var("DOWNLOADER").as_deref() {
            Ok("gallery-dl") => DownloaderKind::GalleryDl,
            _ => DownloaderKind::Http,
        };
        let download_dir = PathBuf::from(
            env::var("DOWNLOAD_DIR").unwrap_or_else(|_| "/tmp/downloads".to_string()),
        );
        let download_timeout = secs_var("DOWNLOAD_TIMEOUT_SECS", 60);
        let output_dir = PathBuf::from(
            env::var("OUTPUT_DIR").unwrap_or_else(|_| "/tmp/generated_images".to_string()),
        );

        let pfp_backend_url =
            env::var("PFP_BACKEND_URL").unwrap_or_else(|_| "http://127.0.0.1:7860".into());
        let wallpaper_backend_url =
            env::var("WALLPAPER_BACKEND_URL").unwrap_or_else(|_| "http://127.0.0.1:7861".into());
        let generation_timeout = secs_var("GENERATION_TIMEOUT_SECS", 1200);
        let worker_idle_timeout = secs_var("WORKER_IDLE_SECS", 30);

        let storage = match env::var("STORAGE_BACKEND").as_deref() {
            Ok("local") => StorageBackend::LocalMirror(PathBuf::from(
                env::var("STORAGE_MIRROR_DIR").unwrap_or_else(|_| "/data/artifacts".to_string()),
            )),
            Ok("s3") => StorageBackend::S3 {
                bucket: env::var("AWS_BUCKET_NAME").ok(),
                region: env::var("AWS_DEFAULT_REGION").ok(),
            },
            _ => StorageBackend::Disabled,
        };

        let variant_count = env::var("VARIANT_COUNT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_VARIANT_COUNT);
        let fanout_policy = match env::var("FANOUT_POLICY") {
            Ok(raw) => raw.parse().map_err(anyhow::Error::msg)?,
            Err(_) => FanoutPolicy::default(),
        };

        Ok(Self {
            listen_addr,
            openai_api_key,
            openai_base_url,
            vision_model,
            vision_timeout,
            downloader,
            download_dir,
            download_timeout,
            output_dir,
            pfp_backend_url,
            wallpaper_backend_url,
            generation_timeout,
            worker_idle_timeout,
            storage,
            variant_count,
            fanout_policy,
        })
    }
}

fn secs_var(name: &str, default: u64) -> Duration {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Duration::from_secs)
        .unwrap_or_else(|| Duration::from_secs(default))
}
