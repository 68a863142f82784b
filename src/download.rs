use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use tokio::{fs, process::Command};

use crate::error::DownloadError;

#[async_trait]
pub trait Downloader: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, DownloadError>;
}

/// Plain HTTP GET of a direct image URL.
pub struct HttpDownloader {
    http: reqwest::Client,
}

impl HttpDownloader {
    pub fn new(timeout: Duration) -> Result<Self, DownloadError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DownloadError::Network(e.to_string()))?;
        Ok(Self { http })
    }
}

#[async_trait]
impl Downloader for HttpDownloader {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, DownloadError> {
        tracing::info!(%url, "downloading reference image");
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| DownloadError::Network(e.to_string()))?;

        match response.status() {
            StatusCode::NOT_FOUND | StatusCode::GONE => {
                return Err(DownloadError::NotFound(url.to_string()));
            }
            status if !status.is_success() => {
                return Err(DownloadError::Network(format!("{url} returned {status}")));
            }
            _ => {}
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| DownloadError::Network(e.to_string()))?;
        if bytes.is_empty() {
            return Err(DownloadError::NotFound(url.to_string()));
        }
        Ok(bytes.to_vec())
    }
}

/// Resolves gallery pages (Pinterest and friends) through the `gallery-dl`
/// binary and returns the first file it writes.
pub struct GalleryDlDownloader {
    binary: PathBuf,
    scratch_dir: PathBuf,
}

impl GalleryDlDownloader {
    pub fn new(scratch_dir: impl Into<PathBuf>) -> Self {
        Self {
            binary: PathBuf::from("gallery-dl"),
            scratch_dir: scratch_dir.into(),
        }
    }

    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = binary.into();
        self
    }

    async fn make_call_dir(&self) -> Result<PathBuf, DownloadError> {
        // One directory per call so concurrent requests never share files.
        let dir = self.scratch_dir.join(uuid::Uuid::new_v4().simple().to_string());
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| DownloadError::Network(format!("cannot prepare {}: {e}", dir.display())))?;
        Ok(dir)
    }

    async fn run(&self, dir: &Path, url: &str) -> Result<Vec<u8>, DownloadError> {
        let output = Command::new(&self.binary)
            .arg("--directory")
            .arg(dir)
            .arg(url)
            .output()
            .await
            .map_err(|e| DownloadError::Network(format!("failed to run gallery-dl: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            tracing::warn!(%url, stderr = %stderr.trim(), "gallery-dl failed");
            return Err(DownloadError::Network(format!(
                "failed to download image from {url}"
            )));
        }

        let path = first_file(dir)
            .await
            .ok_or_else(|| DownloadError::NotFound(url.to_string()))?;
        fs::read(&path)
            .await
            .map_err(|e| DownloadError::Network(e.to_string()))
    }
}

#[async_trait]
impl Downloader for GalleryDlDownloader {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, DownloadError> {
        let dir = self.make_call_dir().await?;
        tracing::info!(%url, dir = %dir.display(), "downloading reference image with gallery-dl");

        let result = self.run(&dir, url).await;
        if let Err(err) = fs::remove_dir_all(&dir).await {
            tracing::debug!(error = %err, "could not clean up download directory");
        }
        result
    }
}

async fn first_file(root: &Path) -> Option<PathBuf> {
    let mut pending = vec![root.to_path_buf()];
    let mut files = Vec::new();

    while let Some(dir) = pending.pop() {
        let Ok(mut entries) = fs::read_dir(&dir).await else {
            continue;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            match entry.file_type().await {
                Ok(kind) if kind.is_dir() => pending.push(path),
                Ok(kind) if kind.is_file() => files.push(path),
                _ => {}
            }
        }
    }

    files.sort();
    files.into_iter().next()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_file_walks_nested_directories() {
        let tmp = tempfile::tempdir().unwrap();
        let nested = tmp.path().join("pinterest").join("board");
        fs::create_dir_all(&nested).await.unwrap();
        fs::write(nested.join("b.jpg"), b"b").await.unwrap();
        fs::write(nested.join("a.jpg"), b"a").await.unwrap();

        assert_eq!(first_file(tmp.path()).await, Some(nested.join("a.jpg")));
    }

    #[tokio::test]
    async fn empty_directory_has_no_file() {
        let tmp = tempfile::tempdir().unwrap();
        assert_eq!(first_file(tmp.path()).await, None);
    }

    #[tokio::test]
    async fn missing_binary_is_a_network_error() {
        let tmp = tempfile::tempdir().unwrap();
        let downloader =
            GalleryDlDownloader::new(tmp.path()).with_binary(tmp.path().join("no-such-binary"));

        let err = downloader.fetch("https://example.com/img.jpg").await.unwrap_err();

        assert!(matches!(err, DownloadError::Network(_)));
    }
}
