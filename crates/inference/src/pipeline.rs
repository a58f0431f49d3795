//! Image decode, tensor conversion and the upscale forward path
//!
//! Pixel grids are 8-bit, three channel, interleaved, B-G-R ordered. The
//! tensor-graph family takes R-G-B planar f32 in `[0, 1]` with a batch axis.

use image::{ImageFormat, RgbImage};
use ndarray::Array4;
use std::io::Cursor;
use std::sync::Arc;
use tracing::{debug, error};

use crate::admission::AdmissionPermit;
use crate::engine::EngineHandle;
use crate::error::{UpscaleError, UpscaleResult};
use crate::loader::{ActiveBackend, BackendSlot};

const CHANNELS: usize = 3;

/// Interleaved B-G-R pixel buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelGrid {
    pub width: usize,
    pub height: usize,
    pub data: Vec<u8>,
}

impl PixelGrid {
    pub fn new(width: usize, height: usize, data: Vec<u8>) -> UpscaleResult<Self> {
        let expected = width * height * CHANNELS;
        if data.len() != expected {
            return Err(UpscaleError::InvalidArgument(format!(
                "pixel buffer has {} bytes, expected {expected} for {width}x{height}",
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// Swaps the first and third channel of every pixel
    fn swap_red_blue(mut data: Vec<u8>) -> Vec<u8> {
        for px in data.chunks_exact_mut(CHANNELS) {
            px.swap(0, 2);
        }
        data
    }
}

/// Decodes PNG, JPEG, BMP or WebP bytes into a B-G-R grid
pub fn decode_image(bytes: &[u8]) -> UpscaleResult<PixelGrid> {
    if bytes.is_empty() {
        return Err(UpscaleError::DecodeError("empty input".into()));
    }

    let rgb = image::load_from_memory(bytes)
        .map_err(|e| UpscaleError::DecodeError(e.to_string()))?
        .to_rgb8();
    let (width, height) = rgb.dimensions();

    PixelGrid::new(
        width as usize,
        height as usize,
        PixelGrid::swap_red_blue(rgb.into_raw()),
    )
}

pub fn encode_png(grid: &PixelGrid) -> UpscaleResult<Vec<u8>> {
    let width = u32::try_from(grid.width)
        .map_err(|_| UpscaleError::internal("output width overflows u32", None))?;
    let height = u32::try_from(grid.height)
        .map_err(|_| UpscaleError::internal("output height overflows u32", None))?;

    let rgb = RgbImage::from_raw(width, height, PixelGrid::swap_red_blue(grid.data.clone()))
        .ok_or_else(|| UpscaleError::internal("pixel buffer does not match dimensions", None))?;

    let mut out = Cursor::new(Vec::new());
    rgb.write_to(&mut out, ImageFormat::Png)
        .map_err(|e| UpscaleError::internal("PNG encoding failed", Some(Box::new(e))))?;
    Ok(out.into_inner())
}

/// B-G-R interleaved `u8` to R-G-B planar `[1,3,H,W]` in `[0, 1]`
pub fn to_planar_tensor(grid: &PixelGrid) -> Array4<f32> {
    let width = grid.width;
    Array4::from_shape_fn((1, CHANNELS, grid.height, width), |(_, c, y, x)| {
        f32::from(grid.data[(y * width + x) * CHANNELS + (CHANNELS - 1 - c)]) / 255.0
    })
}

/// R-G-B planar `[1,3,H,W]` back to B-G-R interleaved `u8`
///
/// Values are scaled by 255, clipped to `[0, 255]` and rounded.
pub fn from_planar_tensor(tensor: &Array4<f32>) -> UpscaleResult<PixelGrid> {
    let (batch, channels, height, width) = tensor.dim();
    if batch != 1 || channels != CHANNELS {
        return Err(UpscaleError::internal(
            format!("unexpected output tensor shape {:?}", tensor.shape()),
            None,
        ));
    }

    let mut data = Vec::with_capacity(width * height * CHANNELS);
    for y in 0..height {
        for x in 0..width {
            for c in (0..CHANNELS).rev() {
                let v = (tensor[[0, c, y, x]] * 255.0).clamp(0.0, 255.0).round();
                data.push(v as u8);
            }
        }
    }
    PixelGrid::new(width, height, data)
}

/// Runs one full decode, forward and encode pass against a loaded backend
///
/// Blocking; call from the blocking worker pool.
pub fn process(backend: &ActiveBackend, bytes: &[u8]) -> UpscaleResult<Vec<u8>> {
    let input = decode_image(bytes)?;
    let output = upscale_grid(backend, &input)?;
    encode_png(&output)
}

/// Forward pass on an already decoded grid
pub fn upscale_grid(backend: &ActiveBackend, input: &PixelGrid) -> UpscaleResult<PixelGrid> {
    let output = match &backend.engine {
        EngineHandle::Classical(engine) => engine
            .upsample(input)
            .map_err(|e| UpscaleError::internal("forward pass failed", Some(Box::new(e))))?,
        EngineHandle::TensorGraph(engine) => {
            let tensor = to_planar_tensor(input);
            let result = engine
                .run(tensor)
                .map_err(|e| UpscaleError::internal("forward pass failed", Some(Box::new(e))))?;
            from_planar_tensor(&result)?
        }
    };

    let scale = backend.scale as usize;
    if output.width != input.width * scale || output.height != input.height * scale {
        return Err(UpscaleError::internal(
            format!(
                "model {} produced {}x{} from {}x{}, expected scale {}",
                backend.model_id, output.width, output.height, input.width, input.height, scale
            ),
            None,
        ));
    }

    debug!(
        model_id = %backend.model_id,
        input = %format!("{}x{}", input.width, input.height),
        output = %format!("{}x{}", output.width, output.height),
        "upscaled image"
    );
    Ok(output)
}

/// Async front of the forward path
///
/// Reads the active backend once per request and runs the pass on the
/// blocking pool. The admission permit travels into the blocking task so the
/// slot stays occupied until the pass is finished.
#[derive(Clone)]
pub struct InferencePipeline {
    slot: Arc<BackendSlot>,
}

impl InferencePipeline {
    pub fn new(slot: Arc<BackendSlot>) -> Self {
        Self { slot }
    }

    pub async fn upscale(&self, bytes: Vec<u8>, permit: AdmissionPermit) -> UpscaleResult<Vec<u8>> {
        let backend = self.slot.current().ok_or(UpscaleError::NoModelLoaded)?;

        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            process(&backend, &bytes)
        })
        .await
        .map_err(|e| {
            error!(error = %e, "upscale worker failed");
            UpscaleError::internal("upscale worker failed", Some(Box::new(e)))
        })?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid_from_fn(width: usize, height: usize, f: impl Fn(usize, usize) -> [u8; 3]) -> PixelGrid {
        let mut data = Vec::with_capacity(width * height * 3);
        for y in 0..height {
            for x in 0..width {
                data.extend_from_slice(&f(x, y));
            }
        }
        PixelGrid::new(width, height, data).unwrap()
    }

    #[test]
    fn test_pixel_grid_rejects_bad_length() {
        assert!(PixelGrid::new(2, 2, vec![0; 11]).is_err());
        assert!(PixelGrid::new(2, 2, vec![0; 12]).is_ok());
    }

    #[test]
    fn test_tensor_layout_and_channel_order() {
        // One pixel with B=10, G=20, R=30
        let grid = PixelGrid::new(1, 1, vec![10, 20, 30]).unwrap();
        let tensor = to_planar_tensor(&grid);
        assert_eq!(tensor.shape(), &[1, 3, 1, 1]);
        assert!((tensor[[0, 0, 0, 0]] - 30.0 / 255.0).abs() < 1e-6);
        assert!((tensor[[0, 1, 0, 0]] - 20.0 / 255.0).abs() < 1e-6);
        assert!((tensor[[0, 2, 0, 0]] - 10.0 / 255.0).abs() < 1e-6);
    }

    #[test]
    fn test_every_value_survives_conversion() {
        let grid = grid_from_fn(256, 1, |x, _| {
            let v = x as u8;
            [v, v.wrapping_add(85), v.wrapping_add(170)]
        });
        let back = from_planar_tensor(&to_planar_tensor(&grid)).unwrap();
        assert_eq!(back.width, grid.width);
        for (a, b) in grid.data.iter().zip(&back.data) {
            assert!((i16::from(*a) - i16::from(*b)).abs() <= 1);
        }
    }

    #[test]
    fn test_out_of_range_values_are_clipped() {
        let mut tensor = Array4::<f32>::zeros((1, 3, 1, 2));
        tensor[[0, 0, 0, 0]] = 1.7;
        tensor[[0, 1, 0, 0]] = -0.4;
        tensor[[0, 2, 0, 1]] = 0.5;
        let grid = from_planar_tensor(&tensor).unwrap();
        // B, G, R of pixel 0 then pixel 1
        assert_eq!(grid.data, vec![0, 0, 255, 128, 0, 0]);
    }

    #[test]
    fn test_bad_tensor_shape_is_internal() {
        let tensor = Array4::<f32>::zeros((1, 4, 2, 2));
        let err = from_planar_tensor(&tensor).unwrap_err();
        assert!(matches!(err, UpscaleError::Internal { .. }));

        let tensor = Array4::<f32>::zeros((2, 3, 2, 2));
        assert!(from_planar_tensor(&tensor).is_err());
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(decode_image(&[]), Err(UpscaleError::DecodeError(_))));
        assert!(matches!(
            decode_image(b"definitely not an image"),
            Err(UpscaleError::DecodeError(_))
        ));
    }

    #[test]
    fn test_png_round_trip_keeps_channel_order() {
        let grid = grid_from_fn(4, 3, |x, y| [x as u8 * 10, y as u8 * 20, 200]);
        let png = encode_png(&grid).unwrap();
        let decoded = decode_image(&png).unwrap();
        assert_eq!(decoded, grid);
    }
}
