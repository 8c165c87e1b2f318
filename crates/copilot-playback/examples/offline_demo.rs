//! Offline demo: a narrated page, one assistant answer, a barge-in.
//!
//! Runs without an audio device. The offline backend is clocked in real time so the
//! arbitration and offset protocol behave as they would on speakers.
//!
//! `COPILOT_*` variables (or a `.env`) tune the engine; `RUST_LOG=debug` shows every step.

use copilot_captions::{CaptionTrack, parse_script};
use copilot_core::{
    BackgroundKind, CopilotConfig, ItemStatus, MediaElement, SharedMedia, SimulatedMedia,
};
use copilot_playback::{
    AnalysisKind, BridgeOutcome, CopilotBridge, OfflineBackend, ServerEvent,
    StreamingPlaybackEngine,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

const SCRIPT: &str = "\
Host 00:00
Welcome back to the spring issue.
Host 00:08
This week we travel along the northern coast.
";

fn tone(hz: f32, seconds: f32, sample_rate: u32) -> Vec<i16> {
    let len = (seconds * sample_rate as f32) as usize;
    (0..len)
        .map(|i| {
            let phase = 2.0 * std::f32::consts::PI * hz * i as f32 / sample_rate as f32;
            (phase.sin() * 12_000.0) as i16
        })
        .collect()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = CopilotConfig::from_env()?;
    let sample_rate = config.playback.sample_rate;

    let backend = OfflineBackend::new();
    let engine = Arc::new(StreamingPlaybackEngine::new(
        config.playback.clone(),
        Arc::new(backend.clone()),
    ));
    let narration = Arc::new(SimulatedMedia::new(180.0));

    engine
        .connect(
            Some(narration.clone() as SharedMedia),
            None,
            Some(Arc::new(|playing: bool| info!("UI play state: {}", playing))),
            Some(Arc::new(|| info!("Narration picked up where it left off"))),
        )
        .await?;
    engine.unmute();
    engine.arbiter().set_background_kind(BackgroundKind::Audio);
    let clock = backend.spawn_clock(256, Duration::from_millis(10));
    let bridge = CopilotBridge::new(Arc::clone(&engine));

    info!("📖 Narration starts");
    engine.arbiter().user_play();
    let captions = CaptionTrack::with_config(parse_script(SCRIPT), &config.captions);
    narration.advance(12.0);
    if let Some(caption) = captions.active_caption(narration.current_time()) {
        info!("Caption: {}", caption.text);
    }

    info!("💬 Assistant answers (item_1)");
    for chunk in tone(220.0, 0.5, sample_rate).chunks(2400) {
        engine.add_16bit_pcm(chunk.to_vec(), Some("item_1"))?;
    }
    engine.set_item_status_for("item_1", ItemStatus::Completed);
    tokio::time::sleep(Duration::from_millis(150)).await;
    let voice = engine.get_frequencies(AnalysisKind::Voice)?;
    let loudest = voice
        .values
        .iter()
        .zip(&voice.labels)
        .max_by(|a, b| a.0.total_cmp(b.0))
        .map(|(_, label)| label.as_str())
        .unwrap_or("-");
    info!("Loudest voice note while speaking: {}", loudest);

    tokio::time::sleep(Duration::from_millis(600)).await;
    info!(
        "Narration paused={} at {:.1}s",
        narration.is_paused(),
        narration.current_time()
    );

    info!("💬 Assistant starts a long answer (item_2), user talks over it");
    engine.add_16bit_pcm(tone(330.0, 3.0, sample_rate), Some("item_2"))?;
    tokio::time::sleep(Duration::from_millis(300)).await;
    let outcome = bridge
        .handle_server_event(ServerEvent::SpeechStarted {
            audio_start_ms: None,
            item_id: None,
        })
        .await?;
    if let BridgeOutcome::CancelResponse {
        track_id,
        offset_samples,
    } = outcome
    {
        info!(
            "cancel {} at {:.2}s",
            track_id,
            offset_samples as f64 / sample_rate as f64
        );
    }
    info!("Arbiter state: {:?}", engine.arbiter().state());

    engine.disconnect();
    clock.abort();
    Ok(())
}
