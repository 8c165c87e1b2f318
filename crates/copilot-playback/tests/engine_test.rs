//! Integration tests for the streaming playback engine
//!
//! Everything runs on the offline backend: the test decides when each quantum renders.

use copilot_core::PlaybackConfig;
use copilot_playback::{
    AnalysisKind, EngineError, OfflineBackend, PcmBuffer, StreamingPlaybackEngine,
    TrackSampleOffset,
};
use std::sync::Arc;
use std::time::Duration;

fn setup() -> (Arc<StreamingPlaybackEngine>, OfflineBackend) {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let backend = OfflineBackend::new();
    let config = PlaybackConfig {
        fft_size: 1024,
        start_muted: false,
        ..PlaybackConfig::default()
    };
    let engine = Arc::new(StreamingPlaybackEngine::new(config, Arc::new(backend.clone())));
    (engine, backend)
}

/// Let the pump tasks catch up with what the renderer reported.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

/// Issue an offset request and render quanta until it resolves.
async fn offset_while_rendering(
    engine: &Arc<StreamingPlaybackEngine>,
    backend: &OfflineBackend,
    interrupt: bool,
    quantum: usize,
) -> Option<TrackSampleOffset> {
    let task = {
        let engine = Arc::clone(engine);
        tokio::spawn(async move { engine.get_track_sample_offset(interrupt).await })
    };
    for _ in 0..200 {
        tokio::time::sleep(Duration::from_millis(2)).await;
        if task.is_finished() {
            break;
        }
        backend.render(quantum);
    }
    task.await.expect("offset task panicked")
}

fn ramp(from: i16, len: usize) -> Vec<i16> {
    (0..len as i16).map(|i| from + i).collect()
}

#[tokio::test]
async fn test_chunks_render_in_append_order() {
    let (engine, backend) = setup();
    engine.connect(None, None, None, None).await.unwrap();

    engine.add_16bit_pcm(ramp(1, 4), Some("item_1")).unwrap();
    engine.add_16bit_pcm(ramp(5, 4), Some("item_1")).unwrap();

    let out = backend.render(8);
    let expected: Vec<f32> = (1..=8).map(|v| v as f32 / 32768.0).collect();
    assert_eq!(out, expected);
}

#[tokio::test]
async fn test_bytes_and_samples_are_equivalent() {
    let (engine, backend) = setup();
    engine.connect(None, None, None, None).await.unwrap();

    let bytes: Vec<u8> = [300i16, -300].iter().flat_map(|s| s.to_le_bytes()).collect();
    engine.add_16bit_pcm(bytes, None).unwrap();
    engine.add_16bit_pcm(vec![300i16, -300], None).unwrap();

    let out = backend.render(4);
    assert_eq!(out[0], out[2]);
    assert_eq!(out[1], out[3]);
}

#[tokio::test]
async fn test_invalid_buffer_is_rejected_without_disturbing_playback() {
    let (engine, backend) = setup();
    engine.connect(None, None, None, None).await.unwrap();

    engine.add_16bit_pcm(vec![1000i16; 8], Some("item_1")).unwrap();
    let err = engine
        .add_16bit_pcm(PcmBuffer::Bytes(vec![1, 2, 3]), Some("item_2"))
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidBufferType(_)));

    let out = backend.render(8);
    assert!(out.iter().all(|&s| s > 0.0));
}

#[tokio::test]
async fn test_offset_is_bounded_and_monotonic() {
    let (engine, backend) = setup();
    engine.connect(None, None, None, None).await.unwrap();

    let total = 24_000u64;
    engine
        .add_16bit_pcm(vec![500i16; total as usize], Some("item_1"))
        .unwrap();
    backend.render(100);

    let first = offset_while_rendering(&engine, &backend, false, 64)
        .await
        .expect("pipeline is rendering");
    let second = offset_while_rendering(&engine, &backend, false, 64)
        .await
        .expect("pipeline is rendering");

    assert_eq!(first.track_id.as_deref(), Some("item_1"));
    assert_eq!(first.offset_samples, 100);
    assert!(second.offset_samples >= first.offset_samples);
    assert!(second.offset_samples <= total);
    assert!((first.current_time_seconds - 100.0 / 24_000.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_offset_without_pipeline_is_none() {
    let (engine, _backend) = setup();
    engine.connect(None, None, None, None).await.unwrap();
    assert!(engine.get_track_sample_offset(false).await.is_none());
    assert!(engine.interrupt().await.is_none());
}

#[tokio::test]
async fn test_interrupted_track_never_renders_again() {
    let (engine, backend) = setup();
    engine.connect(None, None, None, None).await.unwrap();

    engine
        .add_16bit_pcm(vec![2000i16; 4800], Some("item_1"))
        .unwrap();
    backend.render(128);

    let offset = offset_while_rendering(&engine, &backend, true, 128)
        .await
        .expect("interrupt answered");
    assert_eq!(offset.track_id.as_deref(), Some("item_1"));
    assert_eq!(offset.offset_samples, 128);
    settle().await;

    for _ in 0..3 {
        let suppressed = engine
            .add_16bit_pcm(vec![2000i16; 256], Some("item_1"))
            .unwrap();
        assert!(suppressed.is_none());
    }
    let out = backend.render(256);
    assert!(out.iter().all(|&s| s == 0.0));

    // Other tracks are unaffected.
    assert!(engine
        .add_16bit_pcm(vec![2000i16; 16], Some("item_2"))
        .unwrap()
        .is_some());
    assert!(backend.render(16).iter().all(|&s| s > 0.0));
}

#[tokio::test]
async fn test_pipeline_restarts_and_offsets_carry_over() {
    let (engine, backend) = setup();
    engine.connect(None, None, None, None).await.unwrap();

    engine.add_16bit_pcm(vec![100i16; 100], Some("item_1")).unwrap();
    backend.render(128);
    backend.render(128);
    settle().await;
    assert!(!engine.is_streaming());
    assert_eq!(backend.spawn_count(), 1);

    engine.add_16bit_pcm(vec![100i16; 1000], Some("item_1")).unwrap();
    assert_eq!(backend.spawn_count(), 2);
    backend.render(50);

    let offset = offset_while_rendering(&engine, &backend, false, 10)
        .await
        .expect("second pipeline is rendering");
    assert_eq!(offset.offset_samples, 150);
}

#[tokio::test]
async fn test_disconnect_abandons_pending_offset() {
    let (engine, backend) = setup();
    engine.connect(None, None, None, None).await.unwrap();
    engine.add_16bit_pcm(vec![1i16; 1000], None).unwrap();

    let task = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.get_track_sample_offset(false).await })
    };
    settle().await;
    engine.disconnect();

    assert!(task.await.unwrap().is_none());
    assert!(!backend.is_rendering());
    assert!(matches!(
        engine.add_16bit_pcm(vec![1i16], None),
        Err(EngineError::NotConnected)
    ));
}

#[tokio::test]
async fn test_mute_only_touches_assistant_gain() {
    let (engine, backend) = setup();
    engine.connect(None, None, None, None).await.unwrap();

    engine.set_mute();
    engine.set_mute();
    assert_eq!(engine.gain(), Some(0.0));
    engine.add_16bit_pcm(vec![8000i16; 32], None).unwrap();
    assert!(backend.render(16).iter().all(|&s| s == 0.0));

    engine.unmute();
    assert!(backend.render(16).iter().all(|&s| s > 0.0));
}

#[tokio::test]
async fn test_reconnect_creates_fresh_session() {
    let (engine, backend) = setup();
    engine.connect(None, None, None, None).await.unwrap();
    engine.add_16bit_pcm(vec![1i16; 64], Some("item_1")).unwrap();

    engine.connect(None, None, None, None).await.unwrap();
    assert!(!engine.is_streaming());
    assert!(backend.is_open());
    assert!(engine.get_track_sample_offset(false).await.is_none());
}

#[tokio::test]
async fn test_frequencies_follow_the_voice() {
    let (engine, backend) = setup();
    engine.connect(None, None, None, None).await.unwrap();

    let silent = engine.get_frequencies(AnalysisKind::Frequency).unwrap();
    assert_eq!(silent.values.len(), 512);
    assert!(silent.values.iter().all(|&v| v == 0.0));

    let tone: Vec<i16> = (0..2048)
        .map(|i| {
            let phase = 2.0 * std::f32::consts::PI * 440.0 * i as f32 / 24_000.0;
            (phase.sin() * 16_000.0) as i16
        })
        .collect();
    engine.add_16bit_pcm(tone, None).unwrap();
    for _ in 0..16 {
        backend.render(128);
    }

    let voice = engine.get_frequencies(AnalysisKind::Voice).unwrap();
    assert!(voice.values.iter().any(|&v| v > 0.0));
}
