//! Service context
//!
//! [`UpscalerService`] owns every piece of mutable state: the active backend,
//! the admission counter, runtime settings, the connection registry and the
//! last benchmark. A transport holds one instance and calls its methods.

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use upscaler_inference::{
    AdmissionController, BackendKind, BackendLoader, BackendSlot, BenchmarkResult,
    BenchmarkRunner, EngineCapabilities, EngineFactory, InferencePipeline, ModelCatalog,
    ModelCategory, ModelStore, NativeEngineFactory, UpscaleError, UpscaleResult,
};
use upscaler_shared::{HardwareInspector, HardwareSnapshot, Result, UpscalerError};

use crate::config::{ConfigUpdate, RuntimeSettings, ServiceConfig, MAX_CONCURRENT_CEILING};
use crate::connections::{ConnectionRecord, ConnectionRegistry};

/// One row of `list_models`
#[derive(Debug, Clone, Serialize)]
pub struct ModelListing {
    pub id: String,
    pub name: String,
    pub description: String,
    pub scale: u32,
    pub category: ModelCategory,
    pub backend_kind: BackendKind,
    pub downloaded: bool,
    pub loaded: bool,
    pub available: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct DownloadResponse {
    pub status: &'static str,
    pub model: String,
    pub size_mb: f64,
    pub already_present: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoadResponse {
    pub status: &'static str,
    pub model: String,
    pub backend_kind: BackendKind,
    pub using_gpu: bool,
    pub providers: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub current_model: Option<String>,
    pub backend_kind: Option<BackendKind>,
    pub model_scale: Option<u32>,
    /// Accelerated execution preference for the next load
    pub using_gpu: bool,
    /// Providers of the loaded backend, or every usable provider when idle
    pub provider_list: Vec<String>,
    pub processing_count: usize,
    pub max_concurrent: usize,
    pub accelerator_available: bool,
    pub tensor_runtime_available: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub model_loaded: bool,
    pub current_model: Option<String>,
}

/// The upscaler service context
pub struct UpscalerService {
    config: ServiceConfig,
    use_gpu: RwLock<bool>,
    catalog: Arc<ModelCatalog>,
    store: Arc<ModelStore>,
    slot: Arc<BackendSlot>,
    loader: BackendLoader,
    pipeline: InferencePipeline,
    admission: AdmissionController,
    capabilities: EngineCapabilities,
    hardware: HardwareSnapshot,
    connections: ConnectionRegistry,
    last_benchmark: Mutex<Option<BenchmarkResult>>,
}

impl UpscalerService {
    /// Probes hardware and native runtimes, then builds the service
    pub async fn start(config: ServiceConfig) -> Result<Self> {
        config.validate_config()?;

        let inspector =
            HardwareInspector::new(Duration::from_secs(config.probe_timeout_secs));
        let hardware = inspector.probe().await;

        let factory = tokio::task::spawn_blocking(NativeEngineFactory::detect)
            .await
            .map_err(|e| UpscalerError::internal("runtime detection failed", Some(Box::new(e))))?;

        Self::with_factory(config, Arc::new(factory), hardware).await
    }

    /// Builds the service around an explicit engine factory and hardware snapshot
    pub async fn with_factory(
        config: ServiceConfig,
        factory: Arc<dyn EngineFactory>,
        hardware: HardwareSnapshot,
    ) -> Result<Self> {
        config.validate_config()?;

        let capabilities = factory.capabilities();
        let catalog = Arc::new(ModelCatalog::builtin().with_capabilities(&capabilities));
        let store = Arc::new(ModelStore::new(
            &config.models_dir,
            Duration::from_secs(config.download_timeout_secs),
        )?);
        store.ensure_dir().await.map_err(|e| {
            UpscalerError::io(
                format!("creating models directory {}", config.models_dir.display()),
                e,
            )
        })?;

        let slot = Arc::new(BackendSlot::default());
        let loader = BackendLoader::new(
            Arc::clone(&catalog),
            Arc::clone(&store),
            factory,
            Arc::clone(&slot),
        );
        let pipeline = InferencePipeline::new(Arc::clone(&slot));
        let admission = AdmissionController::new(config.max_concurrent);

        let unavailable = catalog.iter().filter(|m| !m.available).count();
        info!(
            models_dir = %config.models_dir.display(),
            models = catalog.len(),
            unavailable,
            use_gpu = config.use_gpu,
            max_concurrent = config.max_concurrent,
            "upscaler service starting"
        );

        let service = Self {
            use_gpu: RwLock::new(config.use_gpu),
            config,
            catalog,
            store,
            slot,
            loader,
            pipeline,
            admission,
            capabilities,
            hardware,
            connections: ConnectionRegistry::new(),
            last_benchmark: Mutex::new(None),
        };

        if let Some(model) = service.config.default_model.clone() {
            match service.load_model(&model, None).await {
                Ok(loaded) => info!(model = %loaded.model, "default model loaded"),
                Err(e) => warn!(model = %model, error = %e, "failed to load default model"),
            }
        }

        Ok(service)
    }

    /// Drops the active backend
    pub fn shutdown(&self) {
        let in_flight = self.admission.active();
        if let Some(previous) = self.slot.clear() {
            info!(model = %previous.model_id, in_flight, "upscaler service stopped");
        } else {
            info!(in_flight, "upscaler service stopped");
        }
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn list_models(&self) -> Vec<ModelListing> {
        let current = self.slot.current();
        self.catalog
            .iter()
            .map(|m| ModelListing {
                id: m.id.clone(),
                name: m.name.clone(),
                description: m.description.clone(),
                scale: m.scale,
                category: m.category,
                backend_kind: m.backend_kind,
                downloaded: self.store.is_downloaded(m),
                loaded: current.as_ref().is_some_and(|b| b.model_id == m.id),
                available: m.available,
            })
            .collect()
    }

    pub async fn download_model(&self, id: &str) -> UpscaleResult<DownloadResponse> {
        let descriptor = self.catalog.resolve(id)?;
        let outcome = self.store.download(descriptor).await?;
        Ok(DownloadResponse {
            status: "success",
            model: descriptor.id.clone(),
            size_mb: outcome.size_mb(),
            already_present: outcome.already_present,
        })
    }

    /// Loads a model; after a successful load `prefer_gpu` also becomes the
    /// preference for later loads
    pub async fn load_model(&self, id: &str, prefer_gpu: Option<bool>) -> UpscaleResult<LoadResponse> {
        let requested = prefer_gpu.unwrap_or_else(|| *self.use_gpu.read());
        let backend = self.loader.load(id, requested).await?;
        if let Some(value) = prefer_gpu {
            *self.use_gpu.write() = value;
        }

        Ok(LoadResponse {
            status: "success",
            model: backend.model_id.clone(),
            backend_kind: backend.kind,
            using_gpu: backend.using_gpu,
            providers: backend.providers.clone(),
        })
    }

    pub async fn upscale(&self, image: Vec<u8>) -> UpscaleResult<Vec<u8>> {
        let permit = self.admission.try_enter().map_err(|rejected| {
            warn!(
                active = rejected.active,
                limit = rejected.limit,
                "rejecting upscale request"
            );
            UpscaleError::TooManyConcurrent {
                active: rejected.active,
                limit: rejected.limit,
            }
        })?;
        self.pipeline.upscale(image, permit).await
    }

    pub fn status(&self) -> StatusResponse {
        let current = self.slot.current();
        StatusResponse {
            current_model: current.as_ref().map(|b| b.model_id.clone()),
            backend_kind: current.as_ref().map(|b| b.kind),
            model_scale: current.as_ref().map(|b| b.scale),
            using_gpu: *self.use_gpu.read(),
            provider_list: current
                .as_ref()
                .map(|b| b.providers.clone())
                .unwrap_or_else(|| self.capabilities.available_providers.clone()),
            processing_count: self.admission.active(),
            max_concurrent: self.admission.limit(),
            accelerator_available: self.hardware.accelerator_available(),
            tensor_runtime_available: self.capabilities.tensor_graph,
        }
    }

    pub fn hardware_info(&self) -> HardwareSnapshot {
        self.hardware.clone()
    }

    /// Benchmarks the active backend and keeps the result
    pub async fn benchmark(&self) -> UpscaleResult<BenchmarkResult> {
        let result = BenchmarkRunner::new(Arc::clone(&self.slot))
            .with_sample_size(self.config.benchmark_size)
            .with_iterations(self.config.benchmark_iterations)
            .run()
            .await?;
        *self.last_benchmark.lock() = Some(result.clone());
        Ok(result)
    }

    pub fn last_benchmark(&self) -> Option<BenchmarkResult> {
        self.last_benchmark.lock().clone()
    }

    pub fn update_config(&self, update: ConfigUpdate) -> UpscaleResult<RuntimeSettings> {
        if let Some(max) = update.max_concurrent {
            if !(1..=MAX_CONCURRENT_CEILING).contains(&max) {
                return Err(UpscaleError::InvalidArgument(format!(
                    "max_concurrent must be between 1 and {MAX_CONCURRENT_CEILING}, got {max}"
                )));
            }
        }

        if let Some(max) = update.max_concurrent {
            self.admission.set_limit(max);
        }
        if let Some(use_gpu) = update.use_gpu {
            *self.use_gpu.write() = use_gpu;
        }

        let settings = RuntimeSettings {
            use_gpu: *self.use_gpu.read(),
            max_concurrent: self.admission.limit(),
        };
        info!(
            use_gpu = settings.use_gpu,
            max_concurrent = settings.max_concurrent,
            "configuration updated"
        );
        Ok(settings)
    }

    pub fn register_connection(
        &self,
        caller_id: &str,
        endpoint_url: &str,
    ) -> UpscaleResult<ConnectionRecord> {
        self.connections.register_or_update(caller_id, endpoint_url)
    }

    pub fn connections(&self) -> Vec<ConnectionRecord> {
        self.connections.list()
    }

    pub fn health(&self) -> HealthResponse {
        let current = self.slot.current();
        HealthResponse {
            status: "healthy",
            model_loaded: current.is_some(),
            current_model: current.map(|b| b.model_id.clone()),
        }
    }
}
