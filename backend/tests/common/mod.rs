#![allow(dead_code)]

use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use image::{ImageFormat, Rgb, RgbImage};
use ndarray::Array4;
use parking_lot::Mutex;

use enhancer_backend::models::config::SizePolicy;
use enhancer_backend::models::enhance::{BlendConfig, Region, TileConfig};
use enhancer_backend::models::error::AppError;
use enhancer_backend::services::enhance::{EnhanceService, EnhanceSettings};
use enhancer_backend::services::inference::{
    Denoiser, InferenceGate, ModelSet, RegionDetector, Upscaler,
};

pub const MIB: u64 = 1024 * 1024;

/// Returns every tile unchanged.
#[derive(Default)]
pub struct IdentityDenoiser {
    pub calls: AtomicUsize,
}

impl Denoiser for IdentityDenoiser {
    fn transform(&self, tile: Array4<f32>) -> Result<Array4<f32>, AppError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(tile)
    }
}

/// Turns every tile black.
#[derive(Default)]
pub struct BlackoutDenoiser;

impl Denoiser for BlackoutDenoiser {
    fn transform(&self, tile: Array4<f32>) -> Result<Array4<f32>, AppError> {
        Ok(tile.mapv(|_| 0.0))
    }
}

pub struct FailingDenoiser;

impl Denoiser for FailingDenoiser {
    fn transform(&self, _tile: Array4<f32>) -> Result<Array4<f32>, AppError> {
        Err(AppError::ProcessingError("device lost".to_string()))
    }
}

/// Nearest-neighbour upscaler that remembers its last input.
#[derive(Default)]
pub struct NearestUpscaler {
    pub calls: AtomicUsize,
    pub last_input: Mutex<Option<RgbImage>>,
}

impl Upscaler for NearestUpscaler {
    fn enhance(&self, image: &RgbImage, scale: u32) -> Result<RgbImage, AppError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_input.lock() = Some(image.clone());
        Ok(nearest(image, scale))
    }
}

#[derive(Default)]
pub struct FixedRegions {
    pub regions: Vec<Region>,
    pub calls: AtomicUsize,
}

impl RegionDetector for FixedRegions {
    fn detect(&self, _image: &RgbImage) -> Result<Vec<Region>, AppError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.regions.clone())
    }
}

pub struct Fakes {
    pub denoiser: Arc<IdentityDenoiser>,
    pub upscaler: Arc<NearestUpscaler>,
    pub detector: Arc<FixedRegions>,
}

impl Fakes {
    pub fn new(regions: Vec<Region>) -> Self {
        Self {
            denoiser: Arc::new(IdentityDenoiser::default()),
            upscaler: Arc::new(NearestUpscaler::default()),
            detector: Arc::new(FixedRegions {
                regions,
                calls: AtomicUsize::new(0),
            }),
        }
    }

    pub fn models(&self) -> ModelSet {
        ModelSet {
            denoiser: self.denoiser.clone(),
            upscaler: self.upscaler.clone(),
            detector: self.detector.clone(),
        }
    }

    pub fn denoise_calls(&self) -> usize {
        self.denoiser.calls.load(Ordering::SeqCst)
    }

    pub fn upscale_calls(&self) -> usize {
        self.upscaler.calls.load(Ordering::SeqCst)
    }

    pub fn detect_calls(&self) -> usize {
        self.detector.calls.load(Ordering::SeqCst)
    }
}

pub fn settings(max_side: u32, region_detect_max_bytes: u64) -> EnhanceSettings {
    EnhanceSettings {
        policy: SizePolicy {
            max_width: max_side,
            max_height: max_side,
            max_bytes: 10 * MIB,
            max_decode_pixels: 100_000_000,
            region_detect_max_bytes,
        },
        tiles: TileConfig {
            size: 32,
            padding: 4,
        },
        blend: BlendConfig::new(0.5),
        upscale_factor: 4,
    }
}

pub fn service(settings: EnhanceSettings, models: ModelSet) -> EnhanceService {
    EnhanceService::new(settings, models, InferenceGate::new(1, None))
}

pub fn nearest(image: &RgbImage, scale: u32) -> RgbImage {
    RgbImage::from_fn(image.width() * scale, image.height() * scale, |x, y| {
        *image.get_pixel(x / scale, y / scale)
    })
}

/// Deterministic noise so PNG compression can't shrink it much.
pub fn noise_image(width: u32, height: u32, seed: u32) -> RgbImage {
    let mut state = seed.wrapping_mul(2_654_435_761).wrapping_add(1);
    RgbImage::from_fn(width, height, |_, _| {
        let mut next = || {
            state = state.wrapping_mul(1_103_515_245).wrapping_add(12_345);
            (state >> 16) as u8
        };
        Rgb([next(), next(), next()])
    })
}

pub fn gradient_image(width: u32, height: u32) -> RgbImage {
    RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x * 7 % 256) as u8, (y * 13 % 256) as u8, ((x + y) % 256) as u8])
    })
}

pub fn png_bytes(image: &RgbImage) -> Vec<u8> {
    let mut buf = Cursor::new(Vec::new());
    image
        .write_to(&mut buf, ImageFormat::Png)
        .expect("encode test png");
    buf.into_inner()
}

pub const BOUNDARY: &str = "enhancer-test-boundary";

pub fn multipart_body(field: &str, data: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(data.len() + 256);
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"upload.png\"\r\nContent-Type: image/png\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    body
}

/// Flat grayscale PNG: compresses to a few KB regardless of dimensions.
pub fn flat_gray_png(width: u32, height: u32) -> Vec<u8> {
    let mut buf = Cursor::new(Vec::new());
    image::DynamicImage::ImageLuma8(image::GrayImage::new(width, height))
        .write_to(&mut buf, ImageFormat::Png)
        .expect("encode test png");
    buf.into_inner()
}
