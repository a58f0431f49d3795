//! On-disk model store and artifact download

use futures_util::StreamExt;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::catalog::ModelDescriptor;
use crate::error::{UpscaleError, UpscaleResult};

/// Transfer timeout applied to each download request
pub const DEFAULT_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);

const PART_SUFFIX: &str = "part";

type BoxedSource = Box<dyn std::error::Error + Send + Sync>;

/// Result of a download request
#[derive(Debug, Clone, Serialize)]
pub struct DownloadOutcome {
    /// Final artifact path
    pub path: PathBuf,
    /// Artifact size on disk
    pub size_bytes: u64,
    /// True when nothing was fetched because the file already existed
    pub already_present: bool,
}

impl DownloadOutcome {
    /// Size in megabytes, rounded to two decimals
    pub fn size_mb(&self) -> f64 {
        let mb = self.size_bytes as f64 / (1024.0 * 1024.0);
        (mb * 100.0).round() / 100.0
    }
}

/// Directory of downloaded model artifacts
///
/// A model counts as downloaded exactly when `<models_dir>/<id>.<ext>` exists.
/// Transfers stream into a sibling `.part` file and are renamed into place
/// once complete.
pub struct ModelStore {
    models_dir: PathBuf,
    client: reqwest::Client,
    download_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl ModelStore {
    pub fn new(models_dir: impl Into<PathBuf>, timeout: Duration) -> UpscaleResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| UpscaleError::internal("failed to build HTTP client", Some(Box::new(e))))?;

        Ok(Self {
            models_dir: models_dir.into(),
            client,
            download_locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    /// Creates the models directory if missing
    pub async fn ensure_dir(&self) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.models_dir).await
    }

    pub fn path_for(&self, descriptor: &ModelDescriptor) -> PathBuf {
        self.models_dir.join(descriptor.file_name())
    }

    fn part_path_for(&self, descriptor: &ModelDescriptor) -> PathBuf {
        self.models_dir
            .join(format!("{}.{PART_SUFFIX}", descriptor.file_name()))
    }

    pub fn is_downloaded(&self, descriptor: &ModelDescriptor) -> bool {
        self.path_for(descriptor).is_file()
    }

    fn lock_for(&self, id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.download_locks.lock();
        Arc::clone(locks.entry(id.to_string()).or_default())
    }

    /// Downloads the artifact unless it is already present
    ///
    /// Concurrent calls for the same id are serialized; the second caller sees
    /// the finished file and returns without fetching. Sources are tried in
    /// order and the first complete transfer wins.
    pub async fn download(&self, descriptor: &ModelDescriptor) -> UpscaleResult<DownloadOutcome> {
        if !descriptor.available {
            return Err(UpscaleError::Unavailable(descriptor.id.clone()));
        }

        let lock = self.lock_for(&descriptor.id);
        let _guard = lock.lock().await;

        let path = self.path_for(descriptor);
        if let Ok(meta) = tokio::fs::metadata(&path).await {
            if meta.is_file() {
                debug!(model_id = %descriptor.id, "model already downloaded");
                return Ok(DownloadOutcome {
                    path,
                    size_bytes: meta.len(),
                    already_present: true,
                });
            }
        }

        self.ensure_dir().await.map_err(|e| {
            UpscaleError::download_failed(
                &descriptor.id,
                format!("cannot create {}", self.models_dir.display()),
                Some(Box::new(e)),
            )
        })?;

        let part_path = self.part_path_for(descriptor);
        let mut last_error = None;

        for url in &descriptor.urls {
            info!(model_id = %descriptor.id, url = %url, "downloading model");
            match self.fetch_to(url, &part_path).await {
                Ok(size_bytes) => {
                    if let Err(e) = tokio::fs::rename(&part_path, &path).await {
                        remove_partial(&part_path).await;
                        return Err(UpscaleError::download_failed(
                            &descriptor.id,
                            "failed to move download into place",
                            Some(Box::new(e)),
                        ));
                    }
                    info!(model_id = %descriptor.id, size_bytes, "model downloaded");
                    return Ok(DownloadOutcome {
                        path,
                        size_bytes,
                        already_present: false,
                    });
                }
                Err(e) => {
                    warn!(model_id = %descriptor.id, url = %url, error = %e, "download attempt failed");
                    remove_partial(&part_path).await;
                    last_error = Some(e);
                }
            }
        }

        let (message, source): (String, Option<BoxedSource>) = match last_error {
            Some(FetchError::Status(status)) => (format!("HTTP {status}"), None),
            Some(FetchError::Empty) => ("empty response body".to_string(), None),
            Some(FetchError::Transfer(e)) => (e.to_string(), Some(Box::new(e) as _)),
            Some(FetchError::Io(e)) => (e.to_string(), Some(Box::new(e) as _)),
            None => ("no download source configured".to_string(), None),
        };
        Err(UpscaleError::download_failed(&descriptor.id, message, source))
    }

    async fn fetch_to(&self, url: &str, part_path: &Path) -> Result<u64, FetchError> {
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(FetchError::Status(response.status().as_u16()));
        }

        let mut stream = response.bytes_stream();
        let mut file = tokio::fs::File::create(part_path).await?;
        let mut written = 0u64;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        file.sync_all().await?;

        if written == 0 {
            return Err(FetchError::Empty);
        }
        Ok(written)
    }
}

async fn remove_partial(part_path: &Path) {
    match tokio::fs::remove_file(part_path).await {
        Ok(()) => debug!(path = %part_path.display(), "removed partial download"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %part_path.display(), error = %e, "failed to remove partial download"),
    }
}

#[derive(Debug, thiserror::Error)]
enum FetchError {
    #[error("HTTP status {0}")]
    Status(u16),
    #[error("empty response body")]
    Empty,
    #[error(transparent)]
    Transfer(#[from] reqwest::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ModelDescriptor;
    use tempfile::TempDir;

    #[test]
    fn test_paths() {
        let dir = TempDir::new().unwrap();
        let store = ModelStore::new(dir.path(), DEFAULT_DOWNLOAD_TIMEOUT).unwrap();
        let model = ModelDescriptor::classical("espcn-x2", "espcn", 2, "http://localhost/x.pb");

        assert_eq!(store.path_for(&model), dir.path().join("espcn-x2.pb"));
        assert_eq!(
            store.part_path_for(&model),
            dir.path().join("espcn-x2.pb.part")
        );
        assert!(!store.is_downloaded(&model));
    }

    #[test]
    fn test_partial_file_is_not_downloaded() {
        let dir = TempDir::new().unwrap();
        let store = ModelStore::new(dir.path(), DEFAULT_DOWNLOAD_TIMEOUT).unwrap();
        let model = ModelDescriptor::tensor_graph("realesrgan-x2", 2, "http://localhost/x.onnx");

        std::fs::write(store.part_path_for(&model), b"partial").unwrap();
        assert!(!store.is_downloaded(&model));

        std::fs::write(store.path_for(&model), b"complete").unwrap();
        assert!(store.is_downloaded(&model));
    }

    #[test]
    fn test_size_mb_rounding() {
        let outcome = DownloadOutcome {
            path: PathBuf::from("x"),
            size_bytes: 1_572_864,
            already_present: false,
        };
        assert!((outcome.size_mb() - 1.5).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_unavailable_touches_nothing() {
        let dir = TempDir::new().unwrap();
        let models_dir = dir.path().join("models");
        let store = ModelStore::new(&models_dir, DEFAULT_DOWNLOAD_TIMEOUT).unwrap();
        let mut model = ModelDescriptor::classical("edsr-x2", "edsr", 2, "http://localhost/x.pb");
        model.available = false;

        let err = store.download(&model).await.unwrap_err();
        assert!(matches!(err, UpscaleError::Unavailable(_)));
        assert!(!models_dir.exists());
    }
}
