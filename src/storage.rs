//! Durable storage for generated artifacts.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::fs;

pub const UNCATEGORIZED: &str = "uncategorized";

/// Reduces untrusted category text to `[a-z0-9_-]`, falling back to
/// [`UNCATEGORIZED`] when nothing survives.
pub fn sanitize_category(category: &str) -> String {
    let safe: String = category
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
        .flat_map(char::to_lowercase)
        .collect();
    if safe.is_empty() {
        UNCATEGORIZED.to_string()
    } else {
        safe
    }
}

pub fn storage_key(prefix: &str, category: &str, filename: &str) -> String {
    format!("{prefix}/{}/{filename}", sanitize_category(category))
}

#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn upload(&self, local_path: &Path, key: &str) -> anyhow::Result<()>;

    fn describe(&self) -> String;
}

/// Copies artifacts into a mirror directory laid out by key.
pub struct LocalMirrorStore {
    root: PathBuf,
}

impl LocalMirrorStore {
    pub async fn connect(root: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }
}

#[async_trait]
impl ArtifactStore for LocalMirrorStore {
    async fn upload(&self, local_path: &Path, key: &str) -> anyhow::Result<()> {
        if key.split('/').any(|part| part.is_empty() || part == "..") {
            anyhow::bail!("refusing unsafe storage key {key:?}");
        }
        let target = self.root.join(key);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::copy(local_path, &target).await?;
        Ok(())
    }

    fn describe(&self) -> String {
        format!("mirror:{}", self.root.display())
    }
}

/// Which store a worker connects to during start-up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackend {
    Disabled,
    LocalMirror(PathBuf),
    S3 {
        bucket: Option<String>,
        region: Option<String>,
    },
}

impl StorageBackend {
    pub async fn connect(&self) -> anyhow::Result<Option<Arc<dyn ArtifactStore>>> {
        match self {
            StorageBackend::Disabled => Ok(None),
            StorageBackend::LocalMirror(root) => {
                let store: Arc<dyn ArtifactStore> =
                    Arc::new(LocalMirrorStore::connect(root.clone()).await?);
                Ok(Some(store))
            }
            #[cfg(feature = "s3")]
            StorageBackend::S3 { bucket, region } => {
                let store: Arc<dyn ArtifactStore> =
                    Arc::new(S3Store::connect(bucket.clone(), region.clone()).await?);
                Ok(Some(store))
            }
            #[cfg(not(feature = "s3"))]
            StorageBackend::S3 { .. } => anyhow::bail!("built without the `s3` feature"),
        }
    }
}

#[cfg(feature = "s3")]
pub use s3::S3Store;

#[cfg(feature = "s3")]
mod s3 {
    use std::path::Path;

    use anyhow::Context;
    use async_trait::async_trait;
    use aws_sdk_s3::{Client, config::Region, primitives::ByteStream};

    use super::ArtifactStore;

    pub struct S3Store {
        client: Client,
        bucket: String,
    }

    impl S3Store {
        pub async fn connect(bucket: Option<String>, region: Option<String>) -> anyhow::Result<Self> {
            let bucket = bucket.context("AWS_BUCKET_NAME not set")?;
            let region = region.unwrap_or_else(|| "us-east-1".to_string());
            let config = aws_config::from_env()
                .region(Region::new(region))
                .load()
                .await;
            Ok(Self {
                client: Client::new(&config),
                bucket,
            })
        }
    }

    #[async_trait]
    impl ArtifactStore for S3Store {
        async fn upload(&self, local_path: &Path, key: &str) -> anyhow::Result<()> {
            let body = ByteStream::from_path(local_path).await?;
            self.client
                .put_object()
                .bucket(&self.bucket)
                .key(key)
                .body(body)
                .send()
                .await?;
            Ok(())
        }

        fn describe(&self) -> String {
            format!("s3://{}", self.bucket)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_keeps_only_safe_characters() {
        assert_eq!(sanitize_category("Anime Characters!!"), "animecharacters");
        assert_eq!(sanitize_category("sci-fi_Cars"), "sci-fi_cars");
        assert_eq!(sanitize_category("../../etc"), "etc");
    }

    #[test]
    fn sanitize_falls_back_when_nothing_survives() {
        assert_eq!(sanitize_category("???"), UNCATEGORIZED);
        assert_eq!(sanitize_category(""), UNCATEGORIZED);
    }

    #[test]
    fn key_always_uses_sanitized_category() {
        assert_eq!(
            storage_key("premium_raw_images", "Dark Fantasy/..", "a.png"),
            "premium_raw_images/darkfantasy/a.png"
        );
    }

    #[tokio::test]
    async fn mirror_store_copies_by_key() {
        let tmp = tempfile::tempdir().unwrap();
        let source = tmp.path().join("a.png");
        fs::write(&source, b"png").await.unwrap();
        let store = LocalMirrorStore::connect(tmp.path().join("mirror")).await.unwrap();

        store.upload(&source, "prefix/cars/a.png").await.unwrap();

        let copied = fs::read(tmp.path().join("mirror/prefix/cars/a.png")).await.unwrap();
        assert_eq!(copied, b"png");
        assert!(store.upload(&source, "prefix/../a.png").await.is_err());
    }

    #[tokio::test]
    async fn disabled_backend_connects_to_nothing() {
        assert!(StorageBackend::Disabled.connect().await.unwrap().is_none());
    }
}
