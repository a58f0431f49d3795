//! Inference engine families and their construction
//!
//! Two engine families exist. The classical family consumes pixel grids
//! directly. The tensor-graph family consumes normalized planar tensors. The
//! loader talks to both through an [`EngineFactory`] so alternative engines can
//! be substituted.

use ndarray::Array4;
use std::path::PathBuf;
use thiserror::Error;

use crate::catalog::{BackendKind, StorageFormat};
use crate::pipeline::PixelGrid;

#[cfg(feature = "opencv")]
mod classical;
#[cfg(not(feature = "opencv"))]
#[path = "classical_stub.rs"]
mod classical;
pub mod tensor_graph;

pub use tensor_graph::{provider_order, with_provider_fallback, ExecutionProviderKind, OrtEngine};

/// Engine-level failure
#[derive(Error, Debug)]
pub enum EngineError {
    /// The engine could not be constructed
    #[error("Engine initialization failed: {0}")]
    InitializationError(String),

    /// A forward pass failed
    #[error("Processing failed: {0}")]
    ProcessingError(String),

    /// Input did not satisfy the engine's contract
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

/// Dedicated super-resolution engine fed with B-G-R pixel grids
pub trait SuperResEngine: Send + Sync {
    /// Upscales a pixel grid by the engine's configured scale
    fn upsample(&self, input: &PixelGrid) -> Result<PixelGrid, EngineError>;
}

/// General inference session fed with `[1,3,H,W]` f32 tensors
pub trait TensorGraphEngine: Send + Sync {
    /// Runs one forward pass
    fn run(&self, input: Array4<f32>) -> Result<Array4<f32>, EngineError>;

    /// Execution providers registered with the session, in priority order
    fn providers(&self) -> Vec<String>;
}

/// A constructed engine of either family
pub enum EngineHandle {
    Classical(Box<dyn SuperResEngine>),
    TensorGraph(Box<dyn TensorGraphEngine>),
}

impl EngineHandle {
    pub fn kind(&self) -> BackendKind {
        match self {
            Self::Classical(_) => BackendKind::OpenCvDnn,
            Self::TensorGraph(_) => BackendKind::OnnxRuntime,
        }
    }
}

impl std::fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("EngineHandle").field(&self.kind()).finish()
    }
}

/// Everything the factory needs to construct one engine
#[derive(Debug, Clone)]
pub struct EngineRequest {
    pub model_id: String,
    pub path: PathBuf,
    pub format: StorageFormat,
    pub scale: u32,
    /// Algorithm name, required by the classical family
    pub architecture: Option<String>,
    pub prefer_gpu: bool,
}

/// A successfully constructed engine plus what it ended up running on
#[derive(Debug)]
pub struct LoadedEngine {
    pub handle: EngineHandle,
    /// True when an accelerated backend or provider was selected
    pub using_gpu: bool,
    /// Providers or backend names, highest priority first
    pub providers: Vec<String>,
}

/// Runtimes present in this process
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineCapabilities {
    pub classical: bool,
    pub tensor_graph: bool,
    /// Execution providers the tensor runtime reports as usable
    pub available_providers: Vec<String>,
}

impl EngineCapabilities {
    pub fn supports(&self, format: StorageFormat) -> bool {
        match format {
            StorageFormat::ClassicalGraph => self.classical,
            StorageFormat::TensorGraph => self.tensor_graph,
        }
    }
}

/// Constructs engines for the loader
///
/// `build` is blocking and is called from the blocking worker pool.
pub trait EngineFactory: Send + Sync {
    /// Runtimes this factory can instantiate, resolved once at startup
    fn capabilities(&self) -> EngineCapabilities;

    /// Builds an engine for the requested model file
    fn build(&self, request: &EngineRequest) -> Result<LoadedEngine, EngineError>;
}

/// Factory backed by the native runtimes linked into this build
#[derive(Debug, Clone)]
pub struct NativeEngineFactory {
    capabilities: EngineCapabilities,
}

impl NativeEngineFactory {
    /// Probes the native runtimes
    pub fn detect() -> Self {
        let (tensor_graph, available_providers) = tensor_graph::probe_runtime();
        let capabilities = EngineCapabilities {
            classical: classical::runtime_available(),
            tensor_graph,
            available_providers,
        };
        tracing::info!(
            classical = capabilities.classical,
            tensor_graph = capabilities.tensor_graph,
            providers = ?capabilities.available_providers,
            "detected inference runtimes"
        );
        Self { capabilities }
    }
}

impl EngineFactory for NativeEngineFactory {
    fn capabilities(&self) -> EngineCapabilities {
        self.capabilities.clone()
    }

    fn build(&self, request: &EngineRequest) -> Result<LoadedEngine, EngineError> {
        match request.format {
            StorageFormat::ClassicalGraph => classical::build(request),
            StorageFormat::TensorGraph => {
                tensor_graph::build(request, &self.capabilities.available_providers)
            }
        }
    }
}
