//! Active backend slot and the load state machine

use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{error, info};

use crate::catalog::{BackendKind, ModelCatalog};
use crate::engine::{EngineFactory, EngineHandle, EngineRequest};
use crate::error::{UpscaleError, UpscaleResult};
use crate::store::ModelStore;

/// The loaded model
#[derive(Debug)]
pub struct ActiveBackend {
    pub model_id: String,
    pub kind: BackendKind,
    pub scale: u32,
    pub using_gpu: bool,
    pub providers: Vec<String>,
    pub engine: EngineHandle,
}

/// Holds at most one [`ActiveBackend`]
///
/// The write lock is only taken to swap the reference. Readers clone the
/// `Arc` and run inference without holding the lock, so a request that
/// started on the old backend finishes on it.
#[derive(Debug, Default)]
pub struct BackendSlot {
    inner: RwLock<Option<Arc<ActiveBackend>>>,
}

impl BackendSlot {
    pub fn current(&self) -> Option<Arc<ActiveBackend>> {
        self.inner.read().clone()
    }

    /// Installs a backend and returns the one it replaced
    pub fn replace(&self, backend: Arc<ActiveBackend>) -> Option<Arc<ActiveBackend>> {
        self.inner.write().replace(backend)
    }

    pub fn clear(&self) -> Option<Arc<ActiveBackend>> {
        self.inner.write().take()
    }
}

/// Resolves, builds and installs backends
pub struct BackendLoader {
    catalog: Arc<ModelCatalog>,
    store: Arc<ModelStore>,
    factory: Arc<dyn EngineFactory>,
    slot: Arc<BackendSlot>,
    load_lock: tokio::sync::Mutex<()>,
}

impl BackendLoader {
    pub fn new(
        catalog: Arc<ModelCatalog>,
        store: Arc<ModelStore>,
        factory: Arc<dyn EngineFactory>,
        slot: Arc<BackendSlot>,
    ) -> Self {
        Self {
            catalog,
            store,
            factory,
            slot,
            load_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Loads `id` and makes it the active backend
    ///
    /// The loader never downloads. On any failure the previous backend stays
    /// active.
    pub async fn load(&self, id: &str, prefer_gpu: bool) -> UpscaleResult<Arc<ActiveBackend>> {
        let descriptor = self.catalog.resolve(id)?;
        if !descriptor.available {
            return Err(UpscaleError::Unavailable(id.to_string()));
        }
        if !self.store.is_downloaded(descriptor) {
            return Err(UpscaleError::NotDownloaded(id.to_string()));
        }

        let request = EngineRequest {
            model_id: descriptor.id.clone(),
            path: self.store.path_for(descriptor),
            format: descriptor.format,
            scale: descriptor.scale,
            architecture: descriptor.architecture.clone(),
            prefer_gpu,
        };
        let expected_kind = descriptor.backend_kind;

        let _guard = self.load_lock.lock().await;
        info!(model_id = %id, prefer_gpu, backend = %expected_kind, "loading model");

        let factory = Arc::clone(&self.factory);
        let loaded = tokio::task::spawn_blocking(move || factory.build(&request))
            .await
            .map_err(|e| UpscaleError::load_failed(id, "engine construction panicked", Some(Box::new(e))))?
            .map_err(|e| {
                error!(model_id = %id, error = %e, "failed to load model");
                UpscaleError::load_failed(id, e.to_string(), Some(Box::new(e)))
            })?;

        if loaded.handle.kind() != expected_kind {
            return Err(UpscaleError::load_failed(
                id,
                format!(
                    "engine kind {} does not match model format {}",
                    loaded.handle.kind(),
                    expected_kind
                ),
                None,
            ));
        }

        let backend = Arc::new(ActiveBackend {
            model_id: descriptor.id.clone(),
            kind: expected_kind,
            scale: descriptor.scale,
            using_gpu: loaded.using_gpu,
            providers: loaded.providers,
            engine: loaded.handle,
        });

        let previous = self.slot.replace(Arc::clone(&backend));
        info!(
            model_id = %id,
            scale = backend.scale,
            using_gpu = backend.using_gpu,
            providers = ?backend.providers,
            replaced = previous.as_ref().map(|p| p.model_id.as_str()),
            "model loaded"
        );
        Ok(backend)
    }
}
