//! End-to-end pipeline test against the public API: stub capture source,
//! real converter, in-memory transport.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use camera_node::{
    decode_frame_message, encode_frame_message, AcquisitionPipeline, CaptureConfig, CaptureSource,
    FrameConverter, FrameEnvelope, MemoryPublisher, PixelFormat, RawFrame,
};

fn stub_config() -> CaptureConfig {
    CaptureConfig {
        resource: "stub://integration".to_string(),
        width: 64,
        height: 48,
        framerate: 0.0, // unpaced, tests should not sleep
    }
}

#[test]
fn stub_source_through_pipeline_publishes_rgba_frames() -> anyhow::Result<()> {
    let source = CaptureSource::open(&stub_config())?;
    let shutdown = Arc::new(AtomicBool::new(false));
    let mut pipeline = AcquisitionPipeline::new(source, MemoryPublisher::new(), shutdown)
        .with_capture_timeout(Duration::from_millis(50));

    for _ in 0..5 {
        assert!(pipeline.run_cycle(), "stub capture must not fail");
    }

    let frames = &pipeline.publisher().frames;
    assert_eq!(frames.len(), 5);
    for (i, frame) in frames.iter().enumerate() {
        assert_eq!(frame.envelope.seq, i as u64);
        assert_eq!(frame.envelope.source_id, "stub://integration");
        assert_eq!(frame.width, 64);
        assert_eq!(frame.height, 48);
        assert_eq!(frame.pixels.len(), 64 * 48 * 4);
        // Converted output is opaque RGBA.
        assert!(frame.pixels.chunks_exact(4).all(|px| px[3] == 255));
    }

    // Timestamps move forward (or at worst stand still within clock
    // resolution).
    for pair in frames.windows(2) {
        assert!(pair[1].envelope.stamp_micros >= pair[0].envelope.stamp_micros);
    }

    Ok(())
}

#[test]
fn shutdown_flag_stops_run_before_first_cycle() -> anyhow::Result<()> {
    let source = CaptureSource::open(&stub_config())?;
    let shutdown = Arc::new(AtomicBool::new(false));
    shutdown.store(true, Ordering::Relaxed);

    let mut pipeline = AcquisitionPipeline::new(source, MemoryPublisher::new(), shutdown);
    pipeline.run();

    assert_eq!(pipeline.stats().published, 0);
    Ok(())
}

#[test]
fn published_payload_decodes_for_subscribers() -> anyhow::Result<()> {
    // What a subscriber does with an MQTT payload, minus the broker.
    let raw = RawFrame::new(vec![50u8; 4 * 2 * 3], 4, 2, PixelFormat::Rgb24);
    let mut converter = FrameConverter::new();
    converter.ensure_size(4, 2, PixelFormat::Rgb24)?;
    let view = converter.convert(&raw)?;

    let envelope = FrameEnvelope::stamp_now(3, "stub://integration");
    let payload = encode_frame_message(&view, &envelope);
    let message = decode_frame_message(&payload)?;

    assert_eq!(message.envelope, envelope);
    assert_eq!((message.width, message.height), (4, 2));
    assert_eq!(message.pixels.len(), 4 * 2 * 4);
    Ok(())
}
