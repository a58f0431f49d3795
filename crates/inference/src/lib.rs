//! # Upscaler Inference
//!
//! Model lifecycle and the upscale forward path.
//!
//! ## Components
//!
//! - **Catalog**: built-in model descriptors and availability
//! - **Store**: downloaded artifacts on disk
//! - **Engine**: OpenCV `dnn_superres` and ONNX Runtime engine families
//! - **Loader**: the single active backend slot
//! - **Pipeline**: decode, tensor conversion, forward pass, PNG encode
//! - **Admission**: bounded concurrency
//! - **Benchmark**: latency measurement of the active backend
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use upscaler_inference::{
//!     AdmissionController, BackendLoader, BackendSlot, EngineFactory, InferencePipeline,
//!     ModelCatalog, ModelStore, NativeEngineFactory, DEFAULT_DOWNLOAD_TIMEOUT,
//! };
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let factory = Arc::new(NativeEngineFactory::detect());
//! let catalog = Arc::new(ModelCatalog::builtin().with_capabilities(&factory.capabilities()));
//! let store = Arc::new(ModelStore::new("/tmp/models", DEFAULT_DOWNLOAD_TIMEOUT)?);
//! let slot = Arc::new(BackendSlot::default());
//!
//! store.download(catalog.resolve("realesrgan-x2")?).await?;
//! let loader = BackendLoader::new(catalog, store, factory, Arc::clone(&slot));
//! loader.load("realesrgan-x2", true).await?;
//!
//! let admission = AdmissionController::default();
//! let pipeline = InferencePipeline::new(slot);
//! let png = pipeline
//!     .upscale(std::fs::read("input.png")?, admission.try_enter().map_err(|_| "busy")?)
//!     .await?;
//! # Ok(())
//! # }
//! ```

#![warn(rust_2018_idioms)]

pub mod admission;
pub mod benchmark;
pub mod catalog;
pub mod engine;
pub mod error;
pub mod loader;
pub mod pipeline;
pub mod store;
pub mod test_utils;

pub use admission::{AdmissionController, AdmissionPermit, AdmissionRejected, DEFAULT_MAX_CONCURRENT};
pub use benchmark::{BenchmarkResult, BenchmarkRunner, DEFAULT_ITERATIONS, DEFAULT_SAMPLE_SIZE};
pub use catalog::{BackendKind, ModelCatalog, ModelCategory, ModelDescriptor, StorageFormat};
pub use engine::{
    EngineCapabilities, EngineError, EngineFactory, EngineHandle, EngineRequest, LoadedEngine,
    NativeEngineFactory, SuperResEngine, TensorGraphEngine,
};
pub use error::{UpscaleError, UpscaleResult};
pub use loader::{ActiveBackend, BackendLoader, BackendSlot};
pub use pipeline::{decode_image, encode_png, InferencePipeline, PixelGrid};
pub use store::{DownloadOutcome, ModelStore, DEFAULT_DOWNLOAD_TIMEOUT};
