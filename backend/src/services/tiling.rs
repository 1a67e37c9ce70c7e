use ndarray::Array4;

use crate::models::enhance::{Tile, TileConfig, Window};
use crate::models::error::AppError;
use crate::models::image_buffer::{ImageBuffer, CHANNELS};

// ---------------------------------------------------------------------------
// Scheduling
// ---------------------------------------------------------------------------

/// Row-major partition of a `width × height` image into `size`-stepped
/// output windows, each with an input window grown by `padding`.
#[derive(Debug, Clone, Copy)]
pub struct TileScheduler {
    width: u32,
    height: u32,
    size: u32,
    padding: u32,
}

impl TileScheduler {
    pub fn new(width: u32, height: u32, config: &TileConfig) -> Self {
        Self {
            width,
            height,
            size: config.size.max(1),
            padding: config.padding,
        }
    }

    pub fn tile_count(&self) -> usize {
        let cols = self.width.div_ceil(self.size) as usize;
        let rows = self.height.div_ceil(self.size) as usize;
        cols * rows
    }

    pub fn tiles(&self) -> Tiles {
        Tiles {
            scheduler: *self,
            x: 0,
            y: 0,
        }
    }

    fn tile_at(&self, x: u32, y: u32) -> Tile {
        let output = Window {
            x0: x,
            y0: y,
            x1: x.saturating_add(self.size).min(self.width),
            y1: y.saturating_add(self.size).min(self.height),
        };
        let input = Window {
            x0: output.x0.saturating_sub(self.padding),
            y0: output.y0.saturating_sub(self.padding),
            x1: output.x1.saturating_add(self.padding).min(self.width),
            y1: output.y1.saturating_add(self.padding).min(self.height),
        };
        Tile { input, output }
    }
}

impl IntoIterator for &TileScheduler {
    type Item = Tile;
    type IntoIter = Tiles;

    fn into_iter(self) -> Tiles {
        self.tiles()
    }
}

/// Lazy tile sequence produced by [`TileScheduler::tiles`].
#[derive(Debug, Clone)]
pub struct Tiles {
    scheduler: TileScheduler,
    x: u32,
    y: u32,
}

impl Iterator for Tiles {
    type Item = Tile;

    fn next(&mut self) -> Option<Tile> {
        let s = &self.scheduler;
        if s.width == 0 || self.y >= s.height {
            return None;
        }

        let tile = s.tile_at(self.x, self.y);
        if tile.output.x1 >= s.width {
            self.x = 0;
            self.y = tile.output.y1;
        } else {
            self.x = tile.output.x1;
        }
        Some(tile)
    }
}

// ---------------------------------------------------------------------------
// Accumulation
// ---------------------------------------------------------------------------

/// Overlap-add reassembly of per-tile patches into a `scale`× output.
///
/// Channels share one weight per pixel.
pub struct OverlapAccumulator {
    width: u32,
    height: u32,
    scale: u32,
    sum: Vec<f32>,
    weight: Vec<u32>,
}

impl OverlapAccumulator {
    /// Accumulator for a same-size transform.
    pub fn new(width: u32, height: u32) -> Self {
        Self::with_scale(width, height, 1)
    }

    /// `width`/`height` are the source dimensions; the result is `scale` times larger.
    pub fn with_scale(width: u32, height: u32, scale: u32) -> Self {
        let scale = scale.max(1);
        let out_px = (width * scale) as usize * (height * scale) as usize;
        Self {
            width,
            height,
            scale,
            sum: vec![0.0; out_px * CHANNELS],
            weight: vec![0; out_px],
        }
    }

    /// Add the output-window part of `patch` (aligned to the tile's input window).
    pub fn accumulate(&mut self, tile: &Tile, patch: &Array4<f32>) -> Result<(), AppError> {
        let s = self.scale as usize;
        let expected = [
            1,
            CHANNELS,
            tile.input.height() as usize * s,
            tile.input.width() as usize * s,
        ];
        if patch.shape() != expected {
            return Err(AppError::ProcessingError(format!(
                "Tile patch has shape {:?}, expected {:?}",
                patch.shape(),
                expected
            )));
        }

        let (off_x, off_y) = tile.output_offset();
        let (off_x, off_y) = (off_x as usize * s, off_y as usize * s);
        let out_w = (self.width * self.scale) as usize;
        let (ox0, oy0) = (tile.output.x0 as usize * s, tile.output.y0 as usize * s);
        let (tw, th) = (tile.output.width() as usize * s, tile.output.height() as usize * s);

        for y in 0..th {
            for x in 0..tw {
                let px = (oy0 + y) * out_w + ox0 + x;
                for c in 0..CHANNELS {
                    self.sum[px * CHANNELS + c] += patch[[0, c, off_y + y, off_x + x]];
                }
                self.weight[px] += 1;
            }
        }
        Ok(())
    }

    /// `sum / weight` per pixel; a pixel nothing wrote to is a scheduling bug.
    pub fn finish(self) -> Result<ImageBuffer, AppError> {
        let out_w = self.width * self.scale;
        let out_h = self.height * self.scale;

        if let Some(idx) = self.weight.iter().position(|&w| w == 0) {
            let (x, y) = (idx as u32 % out_w.max(1), idx as u32 / out_w.max(1));
            return Err(AppError::InvariantViolation(format!(
                "Pixel ({}, {}) received no tile contribution",
                x, y
            )));
        }

        let mut sum = self.sum;
        for (px, &w) in self.weight.iter().enumerate() {
            if w > 1 {
                let w = w as f32;
                for v in &mut sum[px * CHANNELS..(px + 1) * CHANNELS] {
                    *v /= w;
                }
            }
        }

        ImageBuffer::from_f32(out_w, out_h, sum)
    }
}

/// Run `transform` over every tile of `image` and reassemble the result.
///
/// The transform receives the tile's input window as `[1, 3, h, w]` and must
/// return `[1, 3, h·scale, w·scale]`.
pub fn process_tiled<F>(
    image: &ImageBuffer,
    config: &TileConfig,
    scale: u32,
    mut transform: F,
) -> Result<ImageBuffer, AppError>
where
    F: FnMut(Array4<f32>) -> Result<Array4<f32>, AppError>,
{
    let (w, h) = image.dimensions();
    let scheduler = TileScheduler::new(w, h, config);
    let total = scheduler.tile_count();
    let mut acc = OverlapAccumulator::with_scale(w, h, scale);

    for (idx, tile) in scheduler.tiles().enumerate() {
        let patch = transform(image.window_tensor(&tile.input))?;
        acc.accumulate(&tile, &patch)?;
        tracing::trace!(tile = idx + 1, total, "Tile processed");
    }

    acc.finish()
}
