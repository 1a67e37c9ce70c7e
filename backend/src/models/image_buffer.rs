use image::{Rgb, RgbImage};
use ndarray::Array4;

use crate::models::enhance::Window;
use crate::models::error::AppError;

pub const CHANNELS: usize = 3;

/// Interleaved (HWC) sample storage.
#[derive(Debug, Clone, PartialEq)]
pub enum Samples {
    /// Display/storage form.
    U8(Vec<u8>),
    /// Compute form, normalized to `[0, 1]`.
    F32(Vec<f32>),
}

/// Three-channel raster whose geometry is fixed at construction.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageBuffer {
    width: u32,
    height: u32,
    samples: Samples,
}

#[inline]
fn quantize(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0).round() as u8
}

fn expected_len(width: u32, height: u32) -> usize {
    width as usize * height as usize * CHANNELS
}

impl ImageBuffer {
    pub fn from_u8(width: u32, height: u32, data: Vec<u8>) -> Result<Self, AppError> {
        if data.len() != expected_len(width, height) {
            return Err(AppError::Internal(format!(
                "{}x{} buffer needs {} samples, got {}",
                width,
                height,
                expected_len(width, height),
                data.len()
            )));
        }
        Ok(Self { width, height, samples: Samples::U8(data) })
    }

    pub fn from_f32(width: u32, height: u32, data: Vec<f32>) -> Result<Self, AppError> {
        if data.len() != expected_len(width, height) {
            return Err(AppError::Internal(format!(
                "{}x{} buffer needs {} samples, got {}",
                width,
                height,
                expected_len(width, height),
                data.len()
            )));
        }
        Ok(Self { width, height, samples: Samples::F32(data) })
    }

    pub fn from_rgb(img: RgbImage) -> Self {
        let (width, height) = img.dimensions();
        Self {
            width,
            height,
            samples: Samples::U8(img.into_raw()),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn channels(&self) -> usize {
        CHANNELS
    }

    pub fn samples(&self) -> &Samples {
        &self.samples
    }

    /// Sample at `(x, y, c)` in normalized float form.
    #[inline]
    pub fn sample_f32(&self, x: u32, y: u32, c: usize) -> f32 {
        let idx = (y as usize * self.width as usize + x as usize) * CHANNELS + c;
        match &self.samples {
            Samples::U8(data) => data[idx] as f32 / 255.0,
            Samples::F32(data) => data[idx],
        }
    }

    pub fn to_f32(&self) -> ImageBuffer {
        let data = match &self.samples {
            Samples::U8(data) => data.iter().map(|&v| v as f32 / 255.0).collect(),
            Samples::F32(data) => data.clone(),
        };
        Self { width: self.width, height: self.height, samples: Samples::F32(data) }
    }

    /// Quantizes float samples (clamped to `[0, 1]`, rounded to nearest).
    pub fn to_u8(&self) -> ImageBuffer {
        let data = match &self.samples {
            Samples::U8(data) => data.clone(),
            Samples::F32(data) => data.iter().map(|&v| quantize(v)).collect(),
        };
        Self { width: self.width, height: self.height, samples: Samples::U8(data) }
    }

    pub fn into_f32_vec(self) -> Vec<f32> {
        match self.samples {
            Samples::U8(data) => data.into_iter().map(|v| v as f32 / 255.0).collect(),
            Samples::F32(data) => data,
        }
    }

    pub fn to_rgb(&self) -> RgbImage {
        let w = self.width as usize;
        match &self.samples {
            Samples::U8(data) => RgbImage::from_fn(self.width, self.height, |x, y| {
                let i = (y as usize * w + x as usize) * CHANNELS;
                Rgb([data[i], data[i + 1], data[i + 2]])
            }),
            Samples::F32(data) => RgbImage::from_fn(self.width, self.height, |x, y| {
                let i = (y as usize * w + x as usize) * CHANNELS;
                Rgb([quantize(data[i]), quantize(data[i + 1]), quantize(data[i + 2])])
            }),
        }
    }

    /// Copy `window` out as a `[1, 3, h, w]` NCHW tensor in `[0, 1]`.
    pub fn window_tensor(&self, window: &Window) -> Array4<f32> {
        let (ww, wh) = (window.width() as usize, window.height() as usize);
        let mut tensor = Array4::<f32>::zeros((1, CHANNELS, wh, ww));
        for y in 0..wh {
            for x in 0..ww {
                let px = window.x0 + x as u32;
                let py = window.y0 + y as u32;
                for c in 0..CHANNELS {
                    tensor[[0, c, y, x]] = self.sample_f32(px, py, c);
                }
            }
        }
        tensor
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| {
            Rgb([(x * 7 % 256) as u8, (y * 13 % 256) as u8, ((x + y) % 256) as u8])
        })
    }

    #[test]
    fn u8_round_trips_through_f32() {
        let img = gradient(37, 19);
        let buf = ImageBuffer::from_rgb(img.clone());
        let back = buf.to_f32().to_u8();
        assert_eq!(back.dimensions(), (37, 19));
        assert_eq!(back.to_rgb(), img);
        assert_eq!(buf.channels(), 3);
    }

    #[test]
    fn rejects_mismatched_sample_count() {
        assert!(ImageBuffer::from_u8(4, 4, vec![0; 10]).is_err());
        assert!(ImageBuffer::from_f32(2, 2, vec![0.0; 12]).is_ok());
    }

    #[test]
    fn float_samples_are_clamped_when_quantized() {
        let buf = ImageBuffer::from_f32(1, 1, vec![-0.5, 0.5, 1.5]).unwrap();
        assert_eq!(buf.to_rgb().get_pixel(0, 0), &Rgb([0, 128, 255]));
    }

    #[test]
    fn window_tensor_is_nchw() {
        let buf = ImageBuffer::from_rgb(gradient(10, 8));
        let window = Window { x0: 2, y0: 3, x1: 6, y1: 8 };
        let tensor = buf.window_tensor(&window);
        assert_eq!(tensor.shape(), &[1, 3, 5, 4]);
        assert_eq!(tensor[[0, 1, 0, 0]], buf.sample_f32(2, 3, 1));
        assert_eq!(tensor[[0, 2, 4, 3]], buf.sample_f32(5, 7, 2));
    }
}
