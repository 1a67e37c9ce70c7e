use std::io::Cursor;

use image::{
    imageops::FilterType, DynamicImage, GenericImageView, ImageFormat, ImageReader, Limits, RgbImage,
};

use crate::models::config::SizePolicy;
use crate::models::error::AppError;

/// Worst case decoded size per pixel (four f32 channels).
const MAX_BYTES_PER_PIXEL: u64 = 16;
/// Decoder working memory on top of the pixel buffer.
const DECODE_ALLOC_SLACK: u64 = 64 * 1024 * 1024;

/// Decode an upload with EXIF orientation baked in.
///
/// Dimensions come from the header first, so oversized images are rejected
/// before any pixel buffer is allocated. Images that will be shrunk are
/// decoded under limits sized to their own header.
pub fn decode_oriented(
    data: &[u8],
    policy: &SizePolicy,
    auto_resize: bool,
) -> Result<DynamicImage, AppError> {
    let (raw_w, raw_h) = probe_dimensions(data)?;
    let orientation = read_exif_orientation(data);
    let (width, height) = oriented_dimensions(raw_w, raw_h, orientation);

    if policy.exceeds_dimensions(width, height) && !auto_resize {
        return Err(AppError::DimensionsTooLarge {
            width,
            height,
            max_width: policy.max_width,
            max_height: policy.max_height,
        });
    }
    if policy.exceeds_decode_budget(width, height) {
        return Err(AppError::ValidationError(format!(
            "Image is {}x{} ({} pixels), maximum decodable is {} pixels",
            width,
            height,
            width as u64 * height as u64,
            policy.max_decode_pixels
        )));
    }

    let img = decode_limited(data, raw_w, raw_h)?;
    Ok(apply_orientation(img, orientation))
}

fn reader(data: &[u8]) -> Result<ImageReader<Cursor<&[u8]>>, AppError> {
    ImageReader::new(Cursor::new(data))
        .with_guessed_format()
        .map_err(|e| AppError::DecodeError(e.to_string()))
}

fn probe_dimensions(data: &[u8]) -> Result<(u32, u32), AppError> {
    reader(data)?
        .into_dimensions()
        .map_err(|e| AppError::DecodeError(e.to_string()))
}

fn decode_limited(data: &[u8], width: u32, height: u32) -> Result<DynamicImage, AppError> {
    let mut limits = Limits::default();
    limits.max_image_width = Some(width);
    limits.max_image_height = Some(height);
    limits.max_alloc = Some(
        (width as u64 * height as u64)
            .saturating_mul(MAX_BYTES_PER_PIXEL)
            .saturating_add(DECODE_ALLOC_SLACK),
    );

    let mut reader = reader(data)?;
    reader.limits(limits);
    reader
        .decode()
        .map_err(|e| AppError::DecodeError(e.to_string()))
}

/// Orientations 5 to 8 swap the axes.
fn oriented_dimensions(width: u32, height: u32, orientation: u32) -> (u32, u32) {
    match orientation {
        5..=8 => (height, width),
        _ => (width, height),
    }
}

/// EXIF tag 0x0112; 1 (normal) when absent or unreadable.
pub fn read_exif_orientation(data: &[u8]) -> u32 {
    let mut cursor = Cursor::new(data);
    let reader = match exif::Reader::new().read_from_container(&mut cursor) {
        Ok(r) => r,
        Err(_) => return 1,
    };

    reader
        .get_field(exif::Tag::Orientation, exif::In::PRIMARY)
        .and_then(|f| f.value.get_uint(0))
        .unwrap_or(1)
}

/// 1 normal, 2 mirrored, 3 180°, 4 flipped, 5 mirrored + 90° CW,
/// 6 90° CW, 7 mirrored + 270° CW, 8 270° CW.
pub fn apply_orientation(img: DynamicImage, orientation: u32) -> DynamicImage {
    match orientation {
        2 => img.fliph(),
        3 => img.rotate180(),
        4 => img.flipv(),
        5 => img.rotate90().fliph(),
        6 => img.rotate90(),
        7 => img.rotate270().fliph(),
        8 => img.rotate270(),
        _ => img,
    }
}

/// Largest size with the same aspect ratio that fits in `max_w × max_h`.
pub fn fit_within(width: u32, height: u32, max_w: u32, max_h: u32) -> (u32, u32) {
    if width <= max_w && height <= max_h {
        return (width, height);
    }
    let scale = (max_w as f64 / width as f64).min(max_h as f64 / height as f64);
    let nw = ((width as f64 * scale).round() as u32).clamp(1, max_w.max(1));
    let nh = ((height as f64 * scale).round() as u32).clamp(1, max_h.max(1));
    (nw, nh)
}

/// Enforce the dimension limits: shrink when `auto_resize`, reject otherwise.
///
/// Returns the image and whether it was resized.
pub fn apply_size_policy(
    img: DynamicImage,
    policy: &SizePolicy,
    auto_resize: bool,
) -> Result<(RgbImage, bool), AppError> {
    let (w, h) = img.dimensions();
    if !policy.exceeds_dimensions(w, h) {
        return Ok((img.into_rgb8(), false));
    }
    if !auto_resize {
        return Err(AppError::DimensionsTooLarge {
            width: w,
            height: h,
            max_width: policy.max_width,
            max_height: policy.max_height,
        });
    }

    let (nw, nh) = fit_within(w, h, policy.max_width, policy.max_height);
    tracing::debug!(from_w = w, from_h = h, to_w = nw, to_h = nh, "Resizing upload");
    Ok((img.resize_exact(nw, nh, FilterType::Lanczos3).into_rgb8(), true))
}

pub fn encode_png(img: &RgbImage) -> Result<Vec<u8>, AppError> {
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, ImageFormat::Png)
        .map_err(|e| AppError::ProcessingError(format!("PNG encode error: {}", e)))?;
    Ok(buf.into_inner())
}
