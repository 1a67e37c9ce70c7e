use std::path::Path;
use std::sync::Arc;

use image::{imageops::FilterType, RgbImage};
use ndarray::Array4;
use ort::execution_providers::{
    CPUExecutionProvider, CUDAExecutionProvider, ExecutionProviderDispatch,
};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Tensor;
use parking_lot::Mutex;

use crate::models::config::{AppConfig, Device};
use crate::models::enhance::{Region, TileConfig};
use crate::models::error::AppError;
use crate::models::image_buffer::ImageBuffer;
use crate::services::inference::{Denoiser, ModelSet, NoRegionDetector, RegionDetector, Upscaler};
use crate::services::tiling::process_tiled;

// ---------------------------------------------------------------------------
// Session loading
// ---------------------------------------------------------------------------

fn execution_providers(device: Device) -> Vec<ExecutionProviderDispatch> {
    match device {
        Device::Cpu => vec![CPUExecutionProvider::default().build()],
        Device::Cuda => vec![
            CUDAExecutionProvider::default().build().error_on_failure(),
            CPUExecutionProvider::default().build(),
        ],
        Device::Auto => vec![
            CUDAExecutionProvider::default().build(),
            CPUExecutionProvider::default().build(),
        ],
    }
}

fn load_session(onnx_path: &Path, device: Device, threads: usize) -> Result<Session, String> {
    if !onnx_path.exists() {
        return Err(format!("ONNX file not found: {:?}", onnx_path));
    }
    Session::builder()
        .and_then(|b| b.with_execution_providers(execution_providers(device)))
        .and_then(|b| b.with_optimization_level(GraphOptimizationLevel::Level3))
        .and_then(|b| b.with_intra_threads(threads))
        .and_then(|b| b.commit_from_file(onnx_path))
        .map_err(|e| format!("ONNX session load error: {}", e))
}

/// Run a single-input, single-output image network on an NCHW tile and
/// reshape the result to `[n, c, h·scale, w·scale]`, clamped to `[0, 1]`.
fn run_image_model(
    session: &Mutex<Session>,
    tile: Array4<f32>,
    scale: usize,
    model: &str,
) -> Result<Array4<f32>, AppError> {
    let (n, c, h, w) = tile.dim();
    let input = Tensor::from_array(tile)
        .map_err(|e| AppError::ProcessingError(format!("{} tensor: {}", model, e)))?;

    let mut session = session.lock();
    let outputs = session
        .run(ort::inputs![input])
        .map_err(|e| AppError::ProcessingError(format!("{} inference: {}", model, e)))?;

    let (_shape, data) = outputs[0]
        .try_extract_tensor::<f32>()
        .map_err(|e| AppError::ProcessingError(format!("Extract {} output: {}", model, e)))?;

    Array4::from_shape_vec(
        (n, c, h * scale, w * scale),
        data.iter().map(|v| v.clamp(0.0, 1.0)).collect(),
    )
    .map_err(|e| AppError::ProcessingError(format!("{} output shape: {}", model, e)))
}

// ---------------------------------------------------------------------------
// Denoiser (DnCNN)
// ---------------------------------------------------------------------------

pub struct OnnxDenoiser {
    session: Mutex<Session>,
}

impl OnnxDenoiser {
    pub fn load(onnx_path: &Path, device: Device, threads: usize) -> Result<Self, String> {
        let session = load_session(onnx_path, device, threads)?;
        tracing::info!("Loaded denoiser from {:?}", onnx_path);
        Ok(Self {
            session: Mutex::new(session),
        })
    }
}

impl Denoiser for OnnxDenoiser {
    fn transform(&self, tile: Array4<f32>) -> Result<Array4<f32>, AppError> {
        run_image_model(&self.session, tile, 1, "Denoiser")
    }
}

// ---------------------------------------------------------------------------
// Upscaler (Real-ESRGAN)
// ---------------------------------------------------------------------------

pub struct OnnxUpscaler {
    session: Mutex<Session>,
    native_scale: u32,
    tiles: TileConfig,
}

impl OnnxUpscaler {
    pub fn load(
        onnx_path: &Path,
        device: Device,
        threads: usize,
        native_scale: u32,
        tiles: TileConfig,
    ) -> Result<Self, String> {
        let session = load_session(onnx_path, device, threads)?;
        tracing::info!(
            "Loaded {}x upscaler from {:?} (tile {} pad {})",
            native_scale,
            onnx_path,
            tiles.size,
            tiles.padding
        );
        Ok(Self {
            session: Mutex::new(session),
            native_scale: native_scale.max(1),
            tiles,
        })
    }
}

impl Upscaler for OnnxUpscaler {
    fn enhance(&self, image: &RgbImage, scale: u32) -> Result<RgbImage, AppError> {
        let (w, h) = image.dimensions();
        let buf = ImageBuffer::from_rgb(image.clone());
        let native = self.native_scale as usize;
        let upscaled = process_tiled(&buf, &self.tiles, self.native_scale, |tile| {
            run_image_model(&self.session, tile, native, "Upscaler")
        })?
        .to_rgb();

        if scale == self.native_scale {
            return Ok(upscaled);
        }
        Ok(image::imageops::resize(
            &upscaled,
            w * scale.max(1),
            h * scale.max(1),
            FilterType::Lanczos3,
        ))
    }
}

// ---------------------------------------------------------------------------
// Face detector (Ultra-Light-Fast-Generic-Face-Detector, RFB-320)
// ---------------------------------------------------------------------------

const FACE_INPUT_W: u32 = 320;
const FACE_INPUT_H: u32 = 240;
const FACE_NMS_IOU: f32 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaceCandidate {
    pub score: f32,
    /// Normalized `[x0, y0, x1, y1]`.
    pub bbox: [f32; 4],
}

pub struct OnnxFaceDetector {
    session: Mutex<Session>,
    confidence: f32,
}

impl OnnxFaceDetector {
    pub fn load(
        onnx_path: &Path,
        device: Device,
        threads: usize,
        confidence: f32,
    ) -> Result<Self, String> {
        let session = load_session(onnx_path, device, threads)?;
        tracing::info!("Loaded face detector from {:?}", onnx_path);
        Ok(Self {
            session: Mutex::new(session),
            confidence,
        })
    }
}

impl RegionDetector for OnnxFaceDetector {
    fn detect(&self, image: &RgbImage) -> Result<Vec<Region>, AppError> {
        let (w, h) = image.dimensions();
        if w == 0 || h == 0 {
            return Ok(Vec::new());
        }

        let proxy = image::imageops::resize(image, FACE_INPUT_W, FACE_INPUT_H, FilterType::Triangle);
        let mut input = Array4::<f32>::zeros((1, 3, FACE_INPUT_H as usize, FACE_INPUT_W as usize));
        for (x, y, p) in proxy.enumerate_pixels() {
            for c in 0..3 {
                input[[0, c, y as usize, x as usize]] = (p[c] as f32 - 127.0) / 128.0;
            }
        }

        let input_tensor = Tensor::from_array(input)
            .map_err(|e| AppError::ProcessingError(format!("Face detector tensor: {}", e)))?;

        let candidates = {
            let mut session = self.session.lock();
            let outputs = session
                .run(ort::inputs![input_tensor])
                .map_err(|e| AppError::ProcessingError(format!("Face detector inference: {}", e)))?;

            // Outputs: scores [1, N, 2], boxes [1, N, 4]
            let (_shape, scores) = outputs[0]
                .try_extract_tensor::<f32>()
                .map_err(|e| AppError::ProcessingError(format!("Extract face scores: {}", e)))?;
            let (_shape, boxes) = outputs[1]
                .try_extract_tensor::<f32>()
                .map_err(|e| AppError::ProcessingError(format!("Extract face boxes: {}", e)))?;

            scores
                .chunks_exact(2)
                .zip(boxes.chunks_exact(4))
                .filter(|(s, _)| s[1] >= self.confidence)
                .map(|(s, b)| FaceCandidate {
                    score: s[1],
                    bbox: [b[0], b[1], b[2], b[3]],
                })
                .collect::<Vec<_>>()
        };

        let regions: Vec<Region> = non_max_suppression(candidates, FACE_NMS_IOU)
            .into_iter()
            .filter_map(|c| to_region(c.bbox, w, h))
            .collect();
        tracing::debug!(faces = regions.len(), "Face detection complete");
        Ok(regions)
    }
}

fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let ix = (a[2].min(b[2]) - a[0].max(b[0])).max(0.0);
    let iy = (a[3].min(b[3]) - a[1].max(b[1])).max(0.0);
    let inter = ix * iy;
    let area = |r: &[f32; 4]| (r[2] - r[0]).max(0.0) * (r[3] - r[1]).max(0.0);
    let union = area(a) + area(b) - inter;
    if union <= 0.0 {
        0.0
    } else {
        inter / union
    }
}

/// Greedy suppression, highest score first.
pub fn non_max_suppression(mut candidates: Vec<FaceCandidate>, iou_threshold: f32) -> Vec<FaceCandidate> {
    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
    let mut kept: Vec<FaceCandidate> = Vec::new();
    for cand in candidates {
        if kept.iter().all(|k| iou(&k.bbox, &cand.bbox) <= iou_threshold) {
            kept.push(cand);
        }
    }
    kept
}

fn to_region(bbox: [f32; 4], width: u32, height: u32) -> Option<Region> {
    let (wf, hf) = (width as f32, height as f32);
    let x0 = (bbox[0].clamp(0.0, 1.0) * wf).floor() as u32;
    let y0 = (bbox[1].clamp(0.0, 1.0) * hf).floor() as u32;
    let x1 = (bbox[2].clamp(0.0, 1.0) * wf).ceil() as u32;
    let y1 = (bbox[3].clamp(0.0, 1.0) * hf).ceil() as u32;
    (x1 > x0 && y1 > y0).then(|| Region::new(x0, y0, x1 - x0, y1 - y0))
}

// ---------------------------------------------------------------------------
// Startup
// ---------------------------------------------------------------------------

/// Build every model session once. The denoiser and upscaler are required;
/// without a face model region detection is disabled.
pub fn load_models(config: &AppConfig) -> anyhow::Result<ModelSet> {
    let denoiser = OnnxDenoiser::load(
        Path::new(&config.denoiser_model),
        config.device,
        config.intra_threads,
    )
    .map_err(|e| anyhow::anyhow!("Denoiser unavailable: {}", e))?;

    let upscaler = OnnxUpscaler::load(
        Path::new(&config.upscaler_model),
        config.device,
        config.intra_threads,
        config.upscaler_native_scale,
        TileConfig {
            size: config.upscaler_tile_size,
            padding: config.upscaler_tile_padding,
        },
    )
    .map_err(|e| anyhow::anyhow!("Upscaler unavailable: {}", e))?;

    let detector: Arc<dyn RegionDetector> = match OnnxFaceDetector::load(
        Path::new(&config.face_model),
        config.device,
        config.intra_threads,
        config.face_confidence,
    ) {
        Ok(d) => Arc::new(d),
        Err(e) => {
            tracing::warn!("Face detector unavailable, region blending disabled: {}", e);
            Arc::new(NoRegionDetector)
        }
    };

    Ok(ModelSet {
        denoiser: Arc::new(denoiser),
        upscaler: Arc::new(upscaler),
        detector,
    })
}
