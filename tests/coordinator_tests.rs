// SPDX-License-Identifier: GPL-3.0-only

//! Integration test for the capture coordinator's drop policy under
//! synthetic (non-hardware) frame delivery (testable properties 2/6, S2).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use megapixels_engine::config::SensorInfo;
use megapixels_engine::coordinator::{Coordinator, HostHooks, OwnedImage, SensorSnapshot};
use megapixels_engine::dng::{DngCalibration, SRGB_FALLBACK_MATRIX};
use megapixels_engine::sensor::{Fraction, PixelFormat, SensorMode};

fn synthetic_snapshot() -> SensorSnapshot {
    SensorSnapshot {
        info: SensorInfo::default(),
        calibration: DngCalibration {
            make: "Test".to_string(),
            model: "Synthetic".to_string(),
            color_matrix: SRGB_FALLBACK_MATRIX,
            forward_matrix: None,
            black_level: Some(0),
            white_level: Some(255),
            focal_length_mm: None,
            crop_factor: None,
            f_number: None,
        },
        mode: SensorMode {
            width: 4,
            height: 4,
            pixel_format: PixelFormat::Bggr8,
            frame_interval: Fraction { numerator: 1, denominator: 30 },
        },
        gain: 1,
        gain_max: 255,
        auto_exposure: true,
        orientation_degrees: 0,
        exposure_rows: 4,
    }
}

fn synthetic_frame(sequence: u32) -> OwnedImage {
    OwnedImage {
        data: vec![0u8; 16],
        width: 4,
        height: 4,
        row_stride: 4,
        sequence,
        snapshot: synthetic_snapshot(),
    }
}

// S2 (slow preview consumer): a preview hook that sleeps longer than the
// frame interval forces every subsequent frame to be dropped once one is
// already in flight, while `received` still counts every delivery.
#[test]
fn slow_preview_consumer_drops_most_frames() {
    let preview_calls = Arc::new(AtomicUsize::new(0));
    let calls = preview_calls.clone();

    let hooks = HostHooks {
        preview_ready: Box::new(move |_img| {
            calls.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(50));
        }),
        burst_finalized: Box::new(|_, _| {}),
        show_error: Box::new(|msg| panic!("unexpected coordinator error: {msg}")),
    };

    let mut coordinator = Coordinator::new(hooks, 320);

    for seq in 0..30 {
        coordinator.on_frame_ready(synthetic_frame(seq));
    }

    // Give the process pipeline time to drain whatever it accepted.
    std::thread::sleep(Duration::from_millis(500));
    coordinator.shutdown();

    let received = coordinator.received();
    let processed = coordinator.processed();
    assert_eq!(received, 30);
    assert!(processed < received, "a slow consumer must not process every frame");
    assert!(processed >= 1, "at least the first frame must be processed");
}

#[test]
fn fast_preview_consumer_processes_every_frame() {
    let hooks = HostHooks {
        preview_ready: Box::new(|_img| {}),
        burst_finalized: Box::new(|_, _| {}),
        show_error: Box::new(|msg| panic!("unexpected coordinator error: {msg}")),
    };

    let mut coordinator = Coordinator::new(hooks, 320);
    for seq in 0..10 {
        coordinator.on_frame_ready(synthetic_frame(seq));
        std::thread::sleep(Duration::from_millis(5));
    }
    std::thread::sleep(Duration::from_millis(200));
    coordinator.shutdown();

    assert_eq!(coordinator.received(), 10);
    assert_eq!(coordinator.processed(), 10);
}
