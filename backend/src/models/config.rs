use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Device {
    /// Accelerated provider first, CPU fallback.
    Auto,
    Cuda,
    Cpu,
}

impl FromStr for Device {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Device::Auto),
            "cuda" | "gpu" => Ok(Device::Cuda),
            "cpu" => Ok(Device::Cpu),
            other => Err(format!("unknown device '{}'", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub listen_addr: String,
    pub allowed_origins: Vec<String>,
    pub log_level: String,
    pub max_width: u32,
    pub max_height: u32,
    pub max_upload_bytes: u64,
    /// Largest `width × height` that is decoded at all, even for auto-resize.
    pub max_decode_pixels: u64,
    pub face_detect_max_bytes: u64,
    pub face_blend_ratio: f32,
    pub face_confidence: f32,
    pub tile_size: u32,
    pub tile_padding: u32,
    pub upscale_factor: u32,
    pub upscaler_native_scale: u32,
    pub upscaler_tile_size: u32,
    pub upscaler_tile_padding: u32,
    pub device: Device,
    pub intra_threads: usize,
    pub denoiser_model: String,
    pub upscaler_model: String,
    pub face_model: String,
    pub max_inflight_inference: usize,
    pub inference_wait_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8000".to_string(),
            allowed_origins: vec!["*".to_string()],
            log_level: "info".to_string(),
            max_width: 2048,
            max_height: 2048,
            max_upload_bytes: 10 * 1024 * 1024,
            max_decode_pixels: 600_000_000,
            face_detect_max_bytes: 5 * 1024 * 1024,
            face_blend_ratio: 0.5,
            face_confidence: 0.7,
            tile_size: 512,
            tile_padding: 16,
            upscale_factor: 4,
            upscaler_native_scale: 4,
            upscaler_tile_size: 128,
            upscaler_tile_padding: 10,
            device: Device::Auto,
            intra_threads: 2,
            denoiser_model: "weights/dncnn_rgb.onnx".to_string(),
            upscaler_model: "weights/RealESRGAN_x4plus.onnx".to_string(),
            face_model: "weights/version-RFB-320.onnx".to_string(),
            max_inflight_inference: 1,
            inference_wait_secs: 120,
        }
    }
}

fn parsed<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

impl AppConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            listen_addr: env::var("LISTEN_ADDR").unwrap_or(d.listen_addr),
            allowed_origins: env::var("ALLOWED_ORIGINS")
                .map(|v| {
                    v.split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or(d.allowed_origins),
            log_level: env::var("LOG_LEVEL").unwrap_or(d.log_level),
            max_width: parsed("MAX_WIDTH", d.max_width),
            max_height: parsed("MAX_HEIGHT", d.max_height),
            max_upload_bytes: parsed("MAX_UPLOAD_BYTES", d.max_upload_bytes),
            max_decode_pixels: parsed("MAX_DECODE_PIXELS", d.max_decode_pixels).max(1),
            face_detect_max_bytes: parsed("FACE_DETECT_MAX_BYTES", d.face_detect_max_bytes),
            face_blend_ratio: parsed("FACE_BLEND_RATIO", d.face_blend_ratio).clamp(0.0, 1.0),
            face_confidence: parsed("FACE_CONFIDENCE", d.face_confidence).clamp(0.0, 1.0),
            tile_size: parsed("TILE_SIZE", d.tile_size).max(1),
            tile_padding: parsed("TILE_PADDING", d.tile_padding),
            upscale_factor: parsed("UPSCALE_FACTOR", d.upscale_factor).max(1),
            upscaler_native_scale: parsed("UPSCALER_NATIVE_SCALE", d.upscaler_native_scale).max(1),
            upscaler_tile_size: parsed("UPSCALER_TILE_SIZE", d.upscaler_tile_size).max(1),
            upscaler_tile_padding: parsed("UPSCALER_TILE_PADDING", d.upscaler_tile_padding),
            device: parsed("DEVICE", d.device),
            intra_threads: parsed("INTRA_THREADS", d.intra_threads).max(1),
            denoiser_model: env::var("DENOISER_MODEL").unwrap_or(d.denoiser_model),
            upscaler_model: env::var("UPSCALER_MODEL").unwrap_or(d.upscaler_model),
            face_model: env::var("FACE_MODEL").unwrap_or(d.face_model),
            max_inflight_inference: parsed("MAX_INFLIGHT_INFERENCE", d.max_inflight_inference).max(1),
            inference_wait_secs: parsed("INFERENCE_WAIT_SECS", d.inference_wait_secs),
        }
    }

    pub fn size_policy(&self) -> SizePolicy {
        SizePolicy {
            max_width: self.max_width,
            max_height: self.max_height,
            max_bytes: self.max_upload_bytes,
            max_decode_pixels: self.max_decode_pixels,
            region_detect_max_bytes: self.face_detect_max_bytes,
        }
    }

    /// `None` means requests wait for a device slot indefinitely.
    pub fn inference_wait(&self) -> Option<Duration> {
        match self.inference_wait_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

/// Upload limits applied at the request boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizePolicy {
    pub max_width: u32,
    pub max_height: u32,
    pub max_bytes: u64,
    pub max_decode_pixels: u64,
    pub region_detect_max_bytes: u64,
}

impl SizePolicy {
    pub fn exceeds_bytes(&self, byte_len: u64) -> bool {
        byte_len > self.max_bytes
    }

    pub fn exceeds_dimensions(&self, width: u32, height: u32) -> bool {
        width > self.max_width || height > self.max_height
    }

    pub fn exceeds_decode_budget(&self, width: u32, height: u32) -> bool {
        width as u64 * height as u64 > self.max_decode_pixels
    }

    pub fn runs_region_detection(&self, byte_len: u64) -> bool {
        byte_len <= self.region_detect_max_bytes
    }
}
