use crate::models::enhance::{BlendConfig, Region};
use crate::models::error::AppError;
use crate::models::image_buffer::{ImageBuffer, CHANNELS};

/// Mix `original` back into `denoised` inside each region.
///
/// Outside every region the result equals `denoised`. Regions are applied in
/// order, so in an overlap the later region's blend is what remains.
pub fn blend_regions(
    original: &ImageBuffer,
    denoised: &ImageBuffer,
    regions: &[Region],
    blend: BlendConfig,
) -> Result<ImageBuffer, AppError> {
    if original.dimensions() != denoised.dimensions() {
        return Err(AppError::ProcessingError(format!(
            "Cannot blend {:?} original into {:?} denoised image",
            original.dimensions(),
            denoised.dimensions()
        )));
    }

    let (w, h) = denoised.dimensions();
    let r = blend.ratio();
    let mut out = denoised.clone().into_f32_vec();

    for region in regions {
        let Some(window) = region.clamp_to(w, h) else {
            tracing::debug!(?region, "Region outside image bounds, skipped");
            continue;
        };
        for y in window.y0..window.y1 {
            for x in window.x0..window.x1 {
                let base = (y as usize * w as usize + x as usize) * CHANNELS;
                for c in 0..CHANNELS {
                    out[base + c] = (1.0 - r) * denoised.sample_f32(x, y, c)
                        + r * original.sample_f32(x, y, c);
                }
            }
        }
    }

    ImageBuffer::from_f32(w, h, out)
}
