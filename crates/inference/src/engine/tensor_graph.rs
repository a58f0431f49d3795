//! ONNX Runtime session engine

use ndarray::{Array4, Ix4};
use ort::execution_providers::{
    CPUExecutionProvider, CUDAExecutionProvider, ExecutionProvider,
    ExecutionProviderDispatch, TensorRTExecutionProvider,
};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Tensor;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::{EngineError, EngineHandle, EngineRequest, LoadedEngine, TensorGraphEngine};

/// Execution providers the service knows how to register
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionProviderKind {
    TensorRt,
    Cuda,
    Cpu,
}

impl ExecutionProviderKind {
    /// Name as reported by ONNX Runtime
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TensorRt => "TensorrtExecutionProvider",
            Self::Cuda => "CUDAExecutionProvider",
            Self::Cpu => "CPUExecutionProvider",
        }
    }

    pub fn is_accelerated(self) -> bool {
        !matches!(self, Self::Cpu)
    }

    /// Accelerated providers fail the session build instead of silently
    /// dropping out, so the caller learns what actually registered
    fn dispatch(self) -> ExecutionProviderDispatch {
        match self {
            Self::TensorRt => TensorRTExecutionProvider::default().build().error_on_failure(),
            Self::Cuda => CUDAExecutionProvider::default().build().error_on_failure(),
            Self::Cpu => CPUExecutionProvider::default().build(),
        }
    }
}

/// Calls `attempt` with `order`, dropping the highest priority accelerated
/// provider after each failure until only CPU is left
///
/// Returns the built value with the providers it was built with.
pub fn with_provider_fallback<T, E: std::fmt::Display>(
    mut order: Vec<ExecutionProviderKind>,
    mut attempt: impl FnMut(&[ExecutionProviderKind]) -> Result<T, E>,
) -> Result<(T, Vec<ExecutionProviderKind>), E> {
    loop {
        match attempt(&order) {
            Ok(value) => return Ok((value, order)),
            Err(e) => match order.iter().position(|k| k.is_accelerated()) {
                Some(pos) => {
                    warn!(
                        provider = order[pos].as_str(),
                        error = %e,
                        "execution provider failed to register, retrying without it"
                    );
                    order.remove(pos);
                }
                None => return Err(e),
            },
        }
    }
}

/// Orders providers for a session
///
/// With `prefer_gpu`, TensorRT then CUDA are added when `available` lists
/// them. CPU is always present and always last.
pub fn provider_order(prefer_gpu: bool, available: &[String]) -> Vec<ExecutionProviderKind> {
    let mut order = Vec::with_capacity(3);
    if prefer_gpu {
        for kind in [ExecutionProviderKind::TensorRt, ExecutionProviderKind::Cuda] {
            if available.iter().any(|p| p == kind.as_str()) {
                order.push(kind);
            }
        }
    }
    order.push(ExecutionProviderKind::Cpu);
    order
}

/// Initializes the runtime and lists usable providers
///
/// With dynamic loading a missing shared library panics inside `ort`, so the
/// probe is isolated with `catch_unwind`.
pub(crate) fn probe_runtime() -> (bool, Vec<String>) {
    let initialized = std::panic::catch_unwind(|| {
        ort::init().with_name("upscaler").commit().is_ok()
    })
    .unwrap_or(false);

    if !initialized {
        warn!("ONNX Runtime is not available; tensor-graph models are disabled");
        return (false, Vec::new());
    }

    let mut providers = Vec::new();
    if TensorRTExecutionProvider::default().is_available().unwrap_or(false) {
        providers.push(ExecutionProviderKind::TensorRt.as_str().to_string());
    }
    if CUDAExecutionProvider::default().is_available().unwrap_or(false) {
        providers.push(ExecutionProviderKind::Cuda.as_str().to_string());
    }
    providers.push(ExecutionProviderKind::Cpu.as_str().to_string());
    (true, providers)
}

/// Session wrapper; `Session::run` needs exclusive access
pub struct OrtEngine {
    session: Mutex<Session>,
    input_name: String,
    output_name: String,
    providers: Vec<String>,
}

impl OrtEngine {
    pub fn open(request: &EngineRequest, available: &[String]) -> Result<Self, EngineError> {
        let order = provider_order(request.prefer_gpu, available);
        debug!(model_id = %request.model_id, providers = ?order, "building ONNX session");

        let (session, registered) = with_provider_fallback(order, |kinds| {
            Session::builder()
                .and_then(|b| b.with_optimization_level(GraphOptimizationLevel::Level3))
                .and_then(|b| {
                    b.with_execution_providers(kinds.iter().map(|k| k.dispatch()).collect::<Vec<_>>())
                })
                .and_then(|b| b.commit_from_file(&request.path))
        })
        .map_err(|e| EngineError::InitializationError(e.to_string()))?;
        let providers: Vec<String> = registered.iter().map(|k| k.as_str().to_string()).collect();

        let input_name = session
            .inputs
            .first()
            .map(|i| i.name.clone())
            .ok_or_else(|| EngineError::InitializationError("model has no inputs".into()))?;
        let output_name = session
            .outputs
            .first()
            .map(|o| o.name.clone())
            .ok_or_else(|| EngineError::InitializationError("model has no outputs".into()))?;

        info!(
            model_id = %request.model_id,
            input = %input_name,
            output = %output_name,
            "ONNX session ready"
        );

        Ok(Self {
            session: Mutex::new(session),
            input_name,
            output_name,
            providers,
        })
    }
}

impl TensorGraphEngine for OrtEngine {
    fn run(&self, input: Array4<f32>) -> Result<Array4<f32>, EngineError> {
        let tensor =
            Tensor::from_array(input).map_err(|e| EngineError::InvalidArgument(e.to_string()))?;

        let mut session = self.session.lock();
        let outputs = session
            .run(ort::inputs![self.input_name.as_str() => tensor])
            .map_err(|e| EngineError::ProcessingError(e.to_string()))?;

        let output = outputs[self.output_name.as_str()]
            .try_extract_array::<f32>()
            .map_err(|e| EngineError::ProcessingError(e.to_string()))?;

        output
            .to_owned()
            .into_dimensionality::<Ix4>()
            .map_err(|e| EngineError::ProcessingError(format!("unexpected output rank: {e}")))
    }

    fn providers(&self) -> Vec<String> {
        self.providers.clone()
    }
}

pub(crate) fn build(request: &EngineRequest, available: &[String]) -> Result<LoadedEngine, EngineError> {
    let engine = OrtEngine::open(request, available)?;
    let providers = engine.providers();
    let using_gpu = providers
        .first()
        .is_some_and(|p| p != ExecutionProviderKind::Cpu.as_str());

    Ok(LoadedEngine {
        handle: EngineHandle::TensorGraph(Box::new(engine)),
        using_gpu,
        providers,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(kinds: &[ExecutionProviderKind]) -> Vec<&'static str> {
        kinds.iter().map(|k| k.as_str()).collect()
    }

    #[test]
    fn test_cpu_only_without_gpu_preference() {
        let available = vec![
            "TensorrtExecutionProvider".to_string(),
            "CUDAExecutionProvider".to_string(),
            "CPUExecutionProvider".to_string(),
        ];
        assert_eq!(names(&provider_order(false, &available)), ["CPUExecutionProvider"]);
    }

    #[test]
    fn test_accelerated_first_cpu_last() {
        let available = vec![
            "CPUExecutionProvider".to_string(),
            "CUDAExecutionProvider".to_string(),
            "TensorrtExecutionProvider".to_string(),
        ];
        assert_eq!(
            names(&provider_order(true, &available)),
            [
                "TensorrtExecutionProvider",
                "CUDAExecutionProvider",
                "CPUExecutionProvider"
            ]
        );
    }

    #[test]
    fn test_fallback_drops_failing_accelerators() {
        let order = provider_order(
            true,
            &[
                "TensorrtExecutionProvider".to_string(),
                "CUDAExecutionProvider".to_string(),
            ],
        );
        let mut attempts = Vec::new();
        let (value, registered) = with_provider_fallback(order, |kinds| {
            attempts.push(names(kinds));
            if kinds.contains(&ExecutionProviderKind::TensorRt) {
                Err("libnvinfer missing")
            } else {
                Ok(kinds.len())
            }
        })
        .unwrap();

        assert_eq!(value, 2);
        assert_eq!(names(&registered), ["CUDAExecutionProvider", "CPUExecutionProvider"]);
        assert_eq!(attempts.len(), 2);
    }

    #[test]
    fn test_fallback_ends_on_cpu() {
        let order = provider_order(true, &["CUDAExecutionProvider".to_string()]);
        let (_, registered) = with_provider_fallback(order, |kinds| {
            if kinds.iter().any(|k| k.is_accelerated()) {
                Err("cuda init failed")
            } else {
                Ok(())
            }
        })
        .unwrap();
        assert_eq!(names(&registered), ["CPUExecutionProvider"]);
    }

    #[test]
    fn test_fallback_reports_cpu_failure() {
        let mut calls = 0;
        let result: Result<((), Vec<_>), _> =
            with_provider_fallback(vec![ExecutionProviderKind::Cpu], |_| {
                calls += 1;
                Err("corrupt model")
            });
        assert_eq!(result.unwrap_err(), "corrupt model");
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_missing_accelerators_skipped() {
        let available = vec!["CUDAExecutionProvider".to_string()];
        assert_eq!(
            names(&provider_order(true, &available)),
            ["CUDAExecutionProvider", "CPUExecutionProvider"]
        );
        assert_eq!(names(&provider_order(true, &[])), ["CPUExecutionProvider"]);
    }
}
