//! Test Utilities
//!
//! In-process engines for exercising the loader, pipeline and service without
//! native runtimes or real model files.

use ndarray::Array4;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::catalog::StorageFormat;
use crate::engine::{
    EngineCapabilities, EngineError, EngineFactory, EngineHandle, EngineRequest, LoadedEngine,
    SuperResEngine, TensorGraphEngine,
};
use crate::error::UpscaleResult;
use crate::pipeline::PixelGrid;

/// Nearest-neighbour upscaler standing in for the classical engine
#[derive(Debug, Clone)]
pub struct NearestSuperRes {
    pub scale: usize,
    pub delay: Duration,
}

impl SuperResEngine for NearestSuperRes {
    fn upsample(&self, input: &PixelGrid) -> Result<PixelGrid, EngineError> {
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        let (w, h, s) = (input.width, input.height, self.scale);
        let mut data = Vec::with_capacity(w * h * s * s * 3);
        for y in 0..h * s {
            for x in 0..w * s {
                let src = ((y / s) * w + x / s) * 3;
                data.extend_from_slice(&input.data[src..src + 3]);
            }
        }
        PixelGrid::new(w * s, h * s, data).map_err(|e| EngineError::ProcessingError(e.to_string()))
    }
}

/// Nearest-neighbour upscaler over planar tensors
#[derive(Debug, Clone)]
pub struct NearestTensorGraph {
    pub scale: usize,
    /// When set, returns a tensor with this many channels instead of 3
    pub wrong_channels: Option<usize>,
}

impl TensorGraphEngine for NearestTensorGraph {
    fn run(&self, input: Array4<f32>) -> Result<Array4<f32>, EngineError> {
        let (_, channels, h, w) = input.dim();
        let s = self.scale;
        let out_channels = self.wrong_channels.unwrap_or(channels);
        Ok(Array4::from_shape_fn((1, out_channels, h * s, w * s), |(_, c, y, x)| {
            input[[0, c % channels, y / s, x / s]]
        }))
    }

    fn providers(&self) -> Vec<String> {
        vec!["CPUExecutionProvider".to_string()]
    }
}

/// Factory that builds the fake engines above
///
/// Ids registered with [`fail_on`](FakeEngineFactory::fail_on) fail to build.
#[derive(Debug)]
pub struct FakeEngineFactory {
    capabilities: EngineCapabilities,
    failing: Mutex<HashSet<String>>,
    builds: AtomicUsize,
    delay: Duration,
    wrong_channels: Option<usize>,
}

impl Default for FakeEngineFactory {
    fn default() -> Self {
        Self {
            capabilities: EngineCapabilities {
                classical: true,
                tensor_graph: true,
                available_providers: vec!["CPUExecutionProvider".to_string()],
            },
            failing: Mutex::new(HashSet::new()),
            builds: AtomicUsize::new(0),
            delay: Duration::ZERO,
            wrong_channels: None,
        }
    }
}

impl FakeEngineFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capabilities(mut self, capabilities: EngineCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Slows every classical forward pass down
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Makes tensor-graph engines emit a malformed output tensor
    pub fn with_wrong_channels(mut self, channels: usize) -> Self {
        self.wrong_channels = Some(channels);
        self
    }

    pub fn fail_on(&self, model_id: &str) {
        self.failing.lock().insert(model_id.to_string());
    }

    pub fn build_count(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }

    pub fn into_arc(self) -> Arc<Self> {
        Arc::new(self)
    }
}

impl EngineFactory for FakeEngineFactory {
    fn capabilities(&self) -> EngineCapabilities {
        self.capabilities.clone()
    }

    fn build(&self, request: &EngineRequest) -> Result<LoadedEngine, EngineError> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        if self.failing.lock().contains(&request.model_id) {
            return Err(EngineError::InitializationError(format!(
                "corrupt model file {}",
                request.path.display()
            )));
        }

        let scale = request.scale as usize;
        let handle = match request.format {
            StorageFormat::ClassicalGraph => EngineHandle::Classical(Box::new(NearestSuperRes {
                scale,
                delay: self.delay,
            })),
            StorageFormat::TensorGraph => EngineHandle::TensorGraph(Box::new(NearestTensorGraph {
                scale,
                wrong_channels: self.wrong_channels,
            })),
        };
        Ok(LoadedEngine {
            handle,
            using_gpu: false,
            providers: vec!["CPUExecutionProvider".to_string()],
        })
    }
}

/// Encodes a solid-colour PNG of the given size
pub fn solid_png(width: usize, height: usize, bgr: [u8; 3]) -> UpscaleResult<Vec<u8>> {
    let grid = PixelGrid::new(width, height, bgr.repeat(width * height))?;
    crate::pipeline::encode_png(&grid)
}
