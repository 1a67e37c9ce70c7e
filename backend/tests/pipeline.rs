mod common;

use std::sync::Arc;

use axum::body::Bytes;
use image::Rgb;

use common::*;
use enhancer_backend::models::enhance::{BlendConfig, EnhanceOptions, PipelineStage, Region};
use enhancer_backend::models::error::AppError;
use enhancer_backend::services::inference::ModelSet;

fn decode(png: &[u8]) -> image::RgbImage {
    image::load_from_memory(png).expect("valid png").to_rgb8()
}

#[tokio::test]
async fn oversized_upload_never_reaches_the_models() {
    let fakes = Fakes::new(vec![Region::new(0, 0, 4, 4)]);
    let service = service(settings(2048, 5 * MIB), fakes.models());

    let data = Bytes::from(vec![0u8; (12 * MIB) as usize]);
    let err = service
        .enhance("test-request", data, EnhanceOptions::default())
        .await
        .unwrap_err();

    match err {
        AppError::PayloadTooLarge { actual, max } => {
            assert_eq!(actual, 12 * MIB);
            assert_eq!(max, 10 * MIB);
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(fakes.denoise_calls(), 0);
    assert_eq!(fakes.upscale_calls(), 0);
    assert_eq!(fakes.detect_calls(), 0);
}

#[tokio::test]
async fn undecodable_upload_is_a_decode_error() {
    let fakes = Fakes::new(Vec::new());
    let service = service(settings(2048, 5 * MIB), fakes.models());

    let err = service
        .enhance(
            "test-request",
            Bytes::from_static(b"GIF89a but not really"),
            EnhanceOptions::default(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::DecodeError(_)));
    assert_eq!(fakes.denoise_calls(), 0);
}

#[tokio::test]
async fn large_uploads_skip_region_detection() {
    let fakes = Fakes::new(vec![Region::new(0, 0, 16, 16)]);
    let service = service(settings(2048, 100), fakes.models());

    let original = noise_image(48, 48, 7);
    let png = png_bytes(&original);
    assert!(png.len() > 100);

    let out = service
        .enhance("test-request", Bytes::from(png), EnhanceOptions::default())
        .await
        .unwrap();

    assert_eq!(fakes.detect_calls(), 0);
    assert_eq!(fakes.denoise_calls(), 4);
    assert_eq!(fakes.upscale_calls(), 1);
    assert!(!out.stages.contains(&PipelineStage::Blended));

    let upscaler_input = fakes.upscaler.last_input.lock().clone().unwrap();
    assert_eq!(upscaler_input, original);
    assert_eq!(decode(&out.png), nearest(&original, 4));
}

#[tokio::test]
async fn detected_regions_are_blended_back() {
    let detector = Arc::new(FixedRegions {
        regions: vec![Region::new(0, 0, 8, 8)],
        ..Default::default()
    });
    let models = ModelSet {
        denoiser: Arc::new(BlackoutDenoiser),
        upscaler: Arc::new(NearestUpscaler::default()),
        detector: detector.clone(),
    };
    let mut settings = settings(2048, 5 * MIB);
    settings.blend = BlendConfig::new(1.0);
    let service = service(settings, models);

    let original = gradient_image(16, 16);
    let options = EnhanceOptions {
        upscale: false,
        ..Default::default()
    };
    let out = service
        .enhance("test-request", Bytes::from(png_bytes(&original)), options)
        .await
        .unwrap();

    assert_eq!(detector.calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    let result = decode(&out.png);
    assert_eq!(result.dimensions(), (16, 16));
    for (x, y, p) in result.enumerate_pixels() {
        if x < 8 && y < 8 {
            assert_eq!(p, original.get_pixel(x, y));
        } else {
            assert_eq!(p, &Rgb([0, 0, 0]));
        }
    }
}

#[tokio::test]
async fn full_run_records_every_stage_in_order() {
    let fakes = Fakes::new(vec![Region::new(2, 2, 4, 4)]);
    let service = service(settings(2048, 5 * MIB), fakes.models());

    let out = service
        .enhance(
            "test-request",
            Bytes::from(png_bytes(&gradient_image(20, 12))),
            EnhanceOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(
        out.stages,
        vec![
            PipelineStage::Received,
            PipelineStage::Validated,
            PipelineStage::Denoised,
            PipelineStage::Blended,
            PipelineStage::Upscaled,
            PipelineStage::Encoded,
            PipelineStage::Done,
        ]
    );
    assert_eq!((out.width, out.height), (80, 48));
    assert_eq!(fakes.detect_calls(), 1);
}

#[tokio::test]
async fn oversized_dimensions_are_rejected_without_resize() {
    let fakes = Fakes::new(Vec::new());
    let service = service(settings(32, 5 * MIB), fakes.models());

    let options = EnhanceOptions {
        resize: false,
        ..Default::default()
    };
    let err = service
        .enhance("test-request", Bytes::from(png_bytes(&gradient_image(64, 40))), options)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        AppError::DimensionsTooLarge {
            width: 64,
            height: 40,
            max_width: 32,
            max_height: 32
        }
    ));
    assert_eq!(fakes.denoise_calls(), 0);
    assert_eq!(fakes.upscale_calls(), 0);
}

#[tokio::test]
async fn oversized_dimensions_are_shrunk_then_upscaled() {
    let fakes = Fakes::new(Vec::new());
    let service = service(settings(32, 5 * MIB), fakes.models());

    let out = service
        .enhance(
            "test-request",
            Bytes::from(png_bytes(&gradient_image(64, 40))),
            EnhanceOptions::default(),
        )
        .await
        .unwrap();

    assert!(out.stages.contains(&PipelineStage::Resized));
    assert_eq!(
        fakes.upscaler.last_input.lock().as_ref().map(|i| i.dimensions()),
        Some((32, 20))
    );
    assert_eq!((out.width, out.height), (128, 80));
    assert_eq!(decode(&out.png).dimensions(), (128, 80));
}

#[tokio::test]
async fn disabled_steps_are_skipped() {
    let fakes = Fakes::new(vec![Region::new(0, 0, 4, 4)]);
    let service = service(settings(2048, 5 * MIB), fakes.models());
    let original = gradient_image(10, 6);

    let options = EnhanceOptions {
        denoise: false,
        upscale: false,
        ..Default::default()
    };
    let out = service
        .enhance("test-request", Bytes::from(png_bytes(&original)), options)
        .await
        .unwrap();

    assert_eq!(fakes.denoise_calls(), 0);
    assert_eq!(fakes.detect_calls(), 0);
    assert_eq!(fakes.upscale_calls(), 0);
    assert_eq!(decode(&out.png), original);
    assert_eq!(
        out.stages,
        vec![
            PipelineStage::Received,
            PipelineStage::Validated,
            PipelineStage::Encoded,
            PipelineStage::Done,
        ]
    );
}

#[tokio::test]
async fn small_upload_with_huge_dimensions_is_shrunk() {
    let fakes = Fakes::new(Vec::new());
    let service = service(settings(2048, 5 * MIB), fakes.models());
    let png = flat_gray_png(4000, 3000);
    assert!((png.len() as u64) < MIB);

    let options = EnhanceOptions {
        denoise: false,
        upscale: false,
        ..Default::default()
    };
    let out = service
        .enhance("test-request", Bytes::from(png.clone()), options)
        .await
        .unwrap();
    assert!(out.stages.contains(&PipelineStage::Resized));
    assert_eq!((out.width, out.height), (2048, 1536));

    let err = service
        .enhance(
            "test-request",
            Bytes::from(png),
            EnhanceOptions {
                resize: false,
                ..options
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        AppError::DimensionsTooLarge {
            width: 4000,
            height: 3000,
            ..
        }
    ));
}
