use std::time::Instant;

use axum::body::Bytes;
use image::RgbImage;

use crate::models::config::{AppConfig, SizePolicy};
use crate::models::enhance::{BlendConfig, EnhanceOptions, PipelineStage, TileConfig};
use crate::models::error::AppError;
use crate::models::image_buffer::ImageBuffer;
use crate::services::imaging::{apply_size_policy, decode_oriented, encode_png};
use crate::services::inference::{InferenceGate, ModelSet};
use crate::services::region_blend::blend_regions;
use crate::services::tiling::process_tiled;

/// Static knobs of the enhance pipeline.
#[derive(Debug, Clone, Copy)]
pub struct EnhanceSettings {
    pub policy: SizePolicy,
    pub tiles: TileConfig,
    pub blend: BlendConfig,
    pub upscale_factor: u32,
}

impl From<&AppConfig> for EnhanceSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            policy: config.size_policy(),
            tiles: TileConfig {
                size: config.tile_size,
                padding: config.tile_padding,
            },
            blend: BlendConfig::new(config.face_blend_ratio),
            upscale_factor: config.upscale_factor.max(1),
        }
    }
}

#[derive(Debug)]
pub struct EnhanceOutput {
    pub png: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Stages passed through, in order.
    pub stages: Vec<PipelineStage>,
}

/// Stage bookkeeping for one request.
struct PipelineRun {
    request_id: String,
    stages: Vec<PipelineStage>,
    started: Instant,
}

impl PipelineRun {
    fn new(request_id: &str, byte_len: usize) -> Self {
        let request_id = request_id.to_string();
        tracing::debug!(request_id = %request_id, bytes = byte_len, "Enhance request received");
        Self {
            request_id,
            stages: vec![PipelineStage::Received],
            started: Instant::now(),
        }
    }

    fn current(&self) -> &'static str {
        self.stages.last().map(PipelineStage::as_str).unwrap_or("received")
    }

    fn advance(&mut self, stage: PipelineStage) {
        tracing::debug!(
            request_id = %self.request_id,
            from = %self.current(),
            to = %stage,
            elapsed_ms = self.started.elapsed().as_millis() as u64,
            "Pipeline stage"
        );
        self.stages.push(stage);
    }

    /// Terminal: records `Failed` after logging where the run stopped.
    fn fail(&mut self, err: &AppError) {
        let stage = self.current();
        if err.is_client_error() {
            tracing::warn!(request_id = %self.request_id, after = %stage, error = %err, "Enhance request rejected");
        } else {
            tracing::error!(request_id = %self.request_id, after = %stage, error = %err, "Enhance pipeline failed");
        }
        self.stages.push(PipelineStage::Failed(err.to_string()));
    }
}

/// Runs validate → resize → denoise → blend → upscale → encode for uploads.
pub struct EnhanceService {
    settings: EnhanceSettings,
    models: ModelSet,
    gate: InferenceGate,
}

impl EnhanceService {
    pub fn new(settings: EnhanceSettings, models: ModelSet, gate: InferenceGate) -> Self {
        Self {
            settings,
            models,
            gate,
        }
    }

    pub fn settings(&self) -> &EnhanceSettings {
        &self.settings
    }

    pub fn gate(&self) -> &InferenceGate {
        &self.gate
    }

    /// `request_id` ties the pipeline logs to the `X-Request-Id` the caller sees.
    pub async fn enhance(
        &self,
        request_id: &str,
        data: Bytes,
        options: EnhanceOptions,
    ) -> Result<EnhanceOutput, AppError> {
        let mut run = PipelineRun::new(request_id, data.len());
        match self.run_stages(&mut run, data, options).await {
            Ok((png, width, height)) => {
                run.advance(PipelineStage::Done);
                tracing::info!(
                    request_id = %run.request_id,
                    width,
                    height,
                    bytes = png.len(),
                    elapsed_ms = run.started.elapsed().as_millis() as u64,
                    "Enhance complete"
                );
                Ok(EnhanceOutput {
                    png,
                    width,
                    height,
                    stages: run.stages,
                })
            }
            Err(e) => {
                run.fail(&e);
                Err(e)
            }
        }
    }

    async fn run_stages(
        &self,
        run: &mut PipelineRun,
        data: Bytes,
        options: EnhanceOptions,
    ) -> Result<(Vec<u8>, u32, u32), AppError> {
        let policy = self.settings.policy;
        let byte_len = data.len() as u64;

        // --- Received → Validated ---
        if policy.exceeds_bytes(byte_len) {
            return Err(AppError::PayloadTooLarge {
                actual: byte_len,
                max: policy.max_bytes,
            });
        }
        let decoded = blocking(move || decode_oriented(&data, &policy, options.resize)).await?;
        run.advance(PipelineStage::Validated);

        // --- Validated → Resized ---
        let (original, resized) =
            blocking(move || apply_size_policy(decoded, &policy, options.resize)).await?;
        if resized {
            run.advance(PipelineStage::Resized);
        }

        // --- Denoised ---
        let processed = if options.denoise {
            let denoised = self.denoise(original.clone()).await?;
            run.advance(PipelineStage::Denoised);

            // --- Blended ---
            if policy.runs_region_detection(byte_len) {
                let blended = self.blend_faces(original, denoised).await?;
                run.advance(PipelineStage::Blended);
                blended
            } else {
                tracing::debug!(
                    request_id = %run.request_id,
                    bytes = byte_len,
                    threshold = policy.region_detect_max_bytes,
                    "Upload above region detection threshold, blend skipped"
                );
                denoised
            }
        } else {
            ImageBuffer::from_rgb(original)
        };
        let mut working = processed.to_rgb();

        // --- Upscaled ---
        if options.upscale {
            working = self.upscale(working).await?;
            run.advance(PipelineStage::Upscaled);
        }

        // --- Encoded ---
        let (width, height) = working.dimensions();
        let png = blocking(move || encode_png(&working)).await?;
        run.advance(PipelineStage::Encoded);

        Ok((png, width, height))
    }

    async fn denoise(&self, image: RgbImage) -> Result<ImageBuffer, AppError> {
        let denoiser = self.models.denoiser.clone();
        let tiles = self.settings.tiles;
        self.inference(move || {
            let buf = ImageBuffer::from_rgb(image);
            process_tiled(&buf, &tiles, 1, |tile| denoiser.transform(tile))
        })
        .await
    }

    async fn blend_faces(
        &self,
        original: RgbImage,
        denoised: ImageBuffer,
    ) -> Result<ImageBuffer, AppError> {
        let detector = self.models.detector.clone();
        let (original, regions) = self
            .inference(move || {
                let regions = detector.detect(&original)?;
                Ok((original, regions))
            })
            .await?;

        if regions.is_empty() {
            return Ok(denoised);
        }
        tracing::debug!(regions = regions.len(), "Blending detected regions");
        let blend = self.settings.blend;
        blocking(move || {
            blend_regions(&ImageBuffer::from_rgb(original), &denoised, &regions, blend)
        })
        .await
    }

    async fn upscale(&self, image: RgbImage) -> Result<RgbImage, AppError> {
        let upscaler = self.models.upscaler.clone();
        let scale = self.settings.upscale_factor;
        let (w, h) = image.dimensions();
        let out = self.inference(move || upscaler.enhance(&image, scale)).await?;

        if out.dimensions() != (w * scale, h * scale) {
            return Err(AppError::ProcessingError(format!(
                "Upscaler returned {:?}, expected {}x{}",
                out.dimensions(),
                w * scale,
                h * scale
            )));
        }
        Ok(out)
    }

    /// Run device work on the blocking pool while holding a gate permit.
    ///
    /// The permit travels with the blocking task, so a dropped request keeps
    /// the slot until the device is actually free again.
    async fn inference<T, F>(&self, work: F) -> Result<T, AppError>
    where
        F: FnOnce() -> Result<T, AppError> + Send + 'static,
        T: Send + 'static,
    {
        let permit = self.gate.acquire().await?;
        blocking(move || {
            let _permit = permit;
            work()
        })
        .await
    }
}

async fn blocking<T, F>(work: F) -> Result<T, AppError>
where
    F: FnOnce() -> Result<T, AppError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| AppError::ProcessingError(format!("Task panicked: {}", e)))?
}
