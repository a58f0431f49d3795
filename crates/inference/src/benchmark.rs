//! Latency benchmark of the active backend

use rand::Rng;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;

use crate::catalog::BackendKind;
use crate::error::{UpscaleError, UpscaleResult};
use crate::loader::{ActiveBackend, BackendSlot};
use crate::pipeline::{encode_png, process, PixelGrid};

pub const DEFAULT_SAMPLE_SIZE: usize = 256;
pub const DEFAULT_ITERATIONS: usize = 5;

/// Timing of one benchmark run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BenchmarkResult {
    pub model_id: String,
    pub backend_kind: BackendKind,
    pub scale: u32,
    /// `WxH` of the synthetic input
    pub input_size: String,
    /// `WxH` of the produced output
    pub output_size: String,
    pub avg_latency_ms: f64,
    /// Images per second, `1000 / avg_latency_ms`
    pub throughput_fps: f64,
    pub using_gpu: bool,
    pub iterations: usize,
}

/// Times full decode-forward-encode passes on a random square image
#[derive(Debug, Clone)]
pub struct BenchmarkRunner {
    slot: Arc<BackendSlot>,
    sample_size: usize,
    iterations: usize,
}

impl BenchmarkRunner {
    pub fn new(slot: Arc<BackendSlot>) -> Self {
        Self {
            slot,
            sample_size: DEFAULT_SAMPLE_SIZE,
            iterations: DEFAULT_ITERATIONS,
        }
    }

    pub fn with_sample_size(mut self, sample_size: usize) -> Self {
        self.sample_size = sample_size;
        self
    }

    pub fn with_iterations(mut self, iterations: usize) -> Self {
        self.iterations = iterations;
        self
    }

    /// Runs one untimed warm-up pass followed by the timed passes
    pub async fn run(&self) -> UpscaleResult<BenchmarkResult> {
        if self.sample_size == 0 || self.iterations == 0 {
            return Err(UpscaleError::InvalidArgument(
                "benchmark sample size and iterations must be positive".into(),
            ));
        }
        let backend = self.slot.current().ok_or(UpscaleError::NoModelLoaded)?;
        let (sample_size, iterations) = (self.sample_size, self.iterations);

        tokio::task::spawn_blocking(move || run_blocking(&backend, sample_size, iterations))
            .await
            .map_err(|e| UpscaleError::internal("benchmark worker failed", Some(Box::new(e))))?
    }
}

fn random_grid(size: usize) -> UpscaleResult<PixelGrid> {
    let mut data = vec![0u8; size * size * 3];
    rand::thread_rng().fill(&mut data[..]);
    PixelGrid::new(size, size, data)
}

fn run_blocking(
    backend: &ActiveBackend,
    sample_size: usize,
    iterations: usize,
) -> UpscaleResult<BenchmarkResult> {
    let input = encode_png(&random_grid(sample_size)?)?;

    process(backend, &input).map_err(|e| {
        UpscaleError::internal(
            format!("benchmark warm-up failed for {}: {e}", backend.model_id),
            Some(Box::new(e)),
        )
    })?;

    let mut total = Duration::ZERO;
    for _ in 0..iterations {
        let start = Instant::now();
        process(backend, &input)?;
        total += start.elapsed();
    }

    let avg_latency_ms = total.as_secs_f64() * 1000.0 / iterations as f64;
    let throughput_fps = if avg_latency_ms > 0.0 {
        1000.0 / avg_latency_ms
    } else {
        f64::INFINITY
    };
    let output_edge = sample_size * backend.scale as usize;

    let result = BenchmarkResult {
        model_id: backend.model_id.clone(),
        backend_kind: backend.kind,
        scale: backend.scale,
        input_size: format!("{sample_size}x{sample_size}"),
        output_size: format!("{output_edge}x{output_edge}"),
        avg_latency_ms,
        throughput_fps,
        using_gpu: backend.using_gpu,
        iterations,
    };
    info!(
        model_id = %result.model_id,
        avg_latency_ms = result.avg_latency_ms,
        throughput_fps = result.throughput_fps,
        "benchmark finished"
    );
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_requires_loaded_model() {
        let runner = BenchmarkRunner::new(Arc::new(BackendSlot::default()));
        assert!(matches!(runner.run().await, Err(UpscaleError::NoModelLoaded)));
    }

    #[tokio::test]
    async fn test_rejects_zero_iterations() {
        let runner = BenchmarkRunner::new(Arc::new(BackendSlot::default())).with_iterations(0);
        assert!(matches!(
            runner.run().await,
            Err(UpscaleError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_random_grid_shape() {
        let grid = random_grid(8).unwrap();
        assert_eq!((grid.width, grid.height, grid.data.len()), (8, 8, 192));
    }
}
