use std::fmt;

use serde::Deserialize;

/// Half-open pixel rectangle `[x0, x1) × [y0, y1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Window {
    pub x0: u32,
    pub y0: u32,
    pub x1: u32,
    pub y1: u32,
}

impl Window {
    pub fn width(&self) -> u32 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> u32 {
        self.y1 - self.y0
    }

    pub fn is_empty(&self) -> bool {
        self.x1 <= self.x0 || self.y1 <= self.y0
    }

    /// `(x, y, width, height)`
    pub fn rect(&self) -> (u32, u32, u32, u32) {
        (self.x0, self.y0, self.width(), self.height())
    }
}

/// One unit of tiled work.
///
/// `input` is the padded window fed to the transform; `output` is the
/// unpadded window this tile writes back. Output windows of a schedule
/// partition the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tile {
    pub input: Window,
    pub output: Window,
}

impl Tile {
    /// Position of the output window inside the input window.
    pub fn output_offset(&self) -> (u32, u32) {
        (self.output.x0 - self.input.x0, self.output.y0 - self.input.y0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileConfig {
    pub size: u32,
    pub padding: u32,
}

impl Default for TileConfig {
    fn default() -> Self {
        Self {
            size: 512,
            padding: 16,
        }
    }
}

/// Axis-aligned region of interest reported by a detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// Intersect with `[0, width) × [0, height)`; `None` if nothing is left.
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<Window> {
        let window = Window {
            x0: self.x.min(width),
            y0: self.y.min(height),
            x1: self.x.saturating_add(self.width).min(width),
            y1: self.y.saturating_add(self.height).min(height),
        };
        (!window.is_empty()).then_some(window)
    }
}

/// Share of the original image kept inside detected regions:
/// `out = (1 - ratio) * denoised + ratio * original`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlendConfig {
    ratio: f32,
}

impl BlendConfig {
    pub fn new(ratio: f32) -> Self {
        let ratio = if ratio.is_finite() { ratio.clamp(0.0, 1.0) } else { 0.0 };
        Self { ratio }
    }

    pub fn ratio(&self) -> f32 {
        self.ratio
    }
}

impl Default for BlendConfig {
    fn default() -> Self {
        Self::new(0.5)
    }
}

/// Per-request switches, taken from the query string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EnhanceOptions {
    pub resize: bool,
    pub denoise: bool,
    pub upscale: bool,
}

impl Default for EnhanceOptions {
    fn default() -> Self {
        Self {
            resize: true,
            denoise: true,
            upscale: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineStage {
    Received,
    Validated,
    Resized,
    Denoised,
    Blended,
    Upscaled,
    Encoded,
    Done,
    /// Terminal on any error, carrying its message.
    Failed(String),
}

impl PipelineStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStage::Received => "received",
            PipelineStage::Validated => "validated",
            PipelineStage::Resized => "resized",
            PipelineStage::Denoised => "denoised",
            PipelineStage::Blended => "blended",
            PipelineStage::Upscaled => "upscaled",
            PipelineStage::Encoded => "encoded",
            PipelineStage::Done => "done",
            PipelineStage::Failed(_) => "failed",
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
