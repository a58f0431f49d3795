//! OpenCV `dnn_superres` engine for classical-graph models

use opencv::core::{Mat, CV_8UC3};
use opencv::dnn;
use opencv::dnn_superres::DnnSuperResImpl;
use opencv::prelude::*;
use parking_lot::Mutex;
use tracing::{info, warn};

use super::{EngineError, EngineHandle, EngineRequest, LoadedEngine, SuperResEngine};
use crate::pipeline::PixelGrid;

const CUDA_BACKEND: &str = "OpenCV-DNN-CUDA";
const CPU_BACKEND: &str = "OpenCV-DNN-CPU";

pub(crate) fn runtime_available() -> bool {
    true
}

fn init_err(e: opencv::Error) -> EngineError {
    EngineError::InitializationError(e.to_string())
}

fn processing_err(e: opencv::Error) -> EngineError {
    EngineError::ProcessingError(e.to_string())
}

/// `DnnSuperResImpl` bound to one model file
pub struct OpenCvSuperRes {
    inner: Mutex<opencv::core::Ptr<DnnSuperResImpl>>,
    scale: u32,
}

impl SuperResEngine for OpenCvSuperRes {
    fn upsample(&self, input: &PixelGrid) -> Result<PixelGrid, EngineError> {
        let rows = i32::try_from(input.height)
            .map_err(|_| EngineError::InvalidArgument("image too tall".into()))?;

        let flat = Mat::from_slice(&input.data).map_err(processing_err)?;
        let src = flat
            .reshape(3, rows)
            .and_then(|m| m.try_clone())
            .map_err(processing_err)?;

        let mut dst = Mat::default();
        self.inner
            .lock()
            .upsample(&src, &mut dst)
            .map_err(processing_err)?;

        if dst.typ() != CV_8UC3 {
            return Err(EngineError::ProcessingError(format!(
                "unexpected output type {}",
                dst.typ()
            )));
        }

        let width = usize::try_from(dst.cols()).unwrap_or_default();
        let height = usize::try_from(dst.rows()).unwrap_or_default();
        let data = dst.data_bytes().map_err(processing_err)?.to_vec();

        tracing::trace!(scale = self.scale, width, height, "classical forward pass");
        PixelGrid::new(width, height, data)
            .map_err(|e| EngineError::ProcessingError(e.to_string()))
    }
}

pub(crate) fn build(request: &EngineRequest) -> Result<LoadedEngine, EngineError> {
    let architecture = request.architecture.as_deref().ok_or_else(|| {
        EngineError::InitializationError(format!(
            "model {} has no super-resolution architecture",
            request.model_id
        ))
    })?;
    let path = request.path.to_str().ok_or_else(|| {
        EngineError::InitializationError(format!("non UTF-8 path {}", request.path.display()))
    })?;
    let scale = i32::try_from(request.scale)
        .map_err(|_| EngineError::InvalidArgument(format!("scale {}", request.scale)))?;

    let mut sr = DnnSuperResImpl::create().map_err(init_err)?;
    sr.read_model(path).map_err(init_err)?;
    sr.set_model(architecture, scale).map_err(init_err)?;

    let mut using_gpu = false;
    if request.prefer_gpu {
        let cuda = sr
            .set_preferable_backend(dnn::DNN_BACKEND_CUDA)
            .and_then(|()| sr.set_preferable_target(dnn::DNN_TARGET_CUDA));
        match cuda {
            Ok(()) => {
                info!(model_id = %request.model_id, "using CUDA backend for OpenCV DNN");
                using_gpu = true;
            }
            Err(e) => {
                warn!(model_id = %request.model_id, error = %e, "CUDA not available for OpenCV DNN, using CPU");
                sr.set_preferable_backend(dnn::DNN_BACKEND_DEFAULT)
                    .and_then(|()| sr.set_preferable_target(dnn::DNN_TARGET_CPU))
                    .map_err(init_err)?;
            }
        }
    }

    let backend = if using_gpu { CUDA_BACKEND } else { CPU_BACKEND };
    Ok(LoadedEngine {
        handle: EngineHandle::Classical(Box::new(OpenCvSuperRes {
            inner: Mutex::new(sr),
            scale: request.scale,
        })),
        using_gpu,
        providers: vec![backend.to_string()],
    })
}
