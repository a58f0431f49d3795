//! Classical-graph engine placeholder for builds without the `opencv` feature
//!
//! The runtime reports itself unavailable, which marks every classical-graph
//! catalog entry unavailable at startup. `build` is unreachable through the
//! loader and fails if called directly.

use super::{EngineError, EngineRequest, LoadedEngine};

pub(crate) fn runtime_available() -> bool {
    false
}

pub(crate) fn build(request: &EngineRequest) -> Result<LoadedEngine, EngineError> {
    Err(EngineError::InitializationError(format!(
        "model {} needs OpenCV; rebuild with the `opencv` feature",
        request.model_id
    )))
}
