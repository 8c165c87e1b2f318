//! Streaming playback engine: gapless PCM16 playback with offset and interrupt control.
//!
//! One [`PlaybackSession`] exists per `connect()`. Pipelines inside it are short-lived:
//! a pipeline starts on the first chunk after silence and tears itself down once every
//! queue drains. A pump task per pipeline forwards renderer events to the offset tracker
//! and the arbiter.
//!
//! Lock order: the session lock is never held while calling into the arbiter. A chunk is
//! counted by the arbiter before it is sent to the renderer, so the arbiter's drain check
//! never races a chunk that is still in flight.

use crate::analyser::{AnalysisKind, FrequencyAnalyzer, FrequencyData};
use crate::arbiter::AudioArbiter;
use crate::backend::{RenderBackend, RendererHandle};
use crate::error::{ConnectError, EngineError, EngineResult};
use crate::pcm::{PcmBuffer, DEFAULT_TRACK_ID};
use crate::renderer::{GainNode, RenderCommand, RenderEvent, RenderNode, StreamProcessor};
use crate::tracker::{OffsetPoll, TrackOffsetTracker, TrackSampleOffset};
use copilot_core::{ItemStatus, OnNaturalResume, PlaybackConfig, SetPlaying, SharedMedia};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

type SharedSession = Arc<Mutex<Option<PlaybackSession>>>;

struct Pipeline {
    generation: u64,
    commands: mpsc::UnboundedSender<RenderCommand>,
    handle: Box<dyn RendererHandle>,
    pump: JoinHandle<()>,
}

/// Everything owned by one connected period.
struct PlaybackSession {
    id: u64,
    runtime: Handle,
    analyser: Arc<FrequencyAnalyzer>,
    gain: GainNode,
    muted: bool,
    pipeline: Option<Pipeline>,
    next_generation: u64,
    tracker: TrackOffsetTracker,
    /// Chunks refused by a pipeline that was already winding down.
    backlog: Vec<(String, Arc<[i16]>)>,
}

/// Plays streamed assistant speech and answers "where is the current utterance".
pub struct StreamingPlaybackEngine {
    config: PlaybackConfig,
    backend: Arc<dyn RenderBackend>,
    arbiter: Arc<AudioArbiter>,
    session: SharedSession,
    next_session: AtomicU64,
}

impl StreamingPlaybackEngine {
    pub fn new(config: PlaybackConfig, backend: Arc<dyn RenderBackend>) -> Self {
        Self::with_arbiter(config, backend, Arc::new(AudioArbiter::new()))
    }

    pub fn with_arbiter(
        config: PlaybackConfig,
        backend: Arc<dyn RenderBackend>,
        arbiter: Arc<AudioArbiter>,
    ) -> Self {
        Self {
            config,
            backend,
            arbiter,
            session: Arc::new(Mutex::new(None)),
            next_session: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> &PlaybackConfig {
        &self.config
    }

    pub fn arbiter(&self) -> &Arc<AudioArbiter> {
        &self.arbiter
    }

    pub fn is_connected(&self) -> bool {
        self.session.lock().is_some()
    }

    /// Whether a render pipeline is currently accepting audio.
    pub fn is_streaming(&self) -> bool {
        self.session
            .lock()
            .as_ref()
            .and_then(|s| s.pipeline.as_ref())
            .is_some_and(|p| !p.commands.is_closed())
    }

    /// Open the output and start a fresh session bound to the caller's media handles.
    ///
    /// Any previous session is torn down first. On failure the engine stays disconnected
    /// and the arbiter keeps its previous bindings and state.
    pub async fn connect(
        &self,
        audio: Option<SharedMedia>,
        video: Option<SharedMedia>,
        set_playing: Option<SetPlaying>,
        on_natural_resume: OnNaturalResume,
    ) -> Result<(), ConnectError> {
        self.teardown();
        self.config.validate()?;
        info!(
            "🔌 Connecting playback engine ({} backend, {} Hz)",
            self.backend.name(),
            self.config.sample_rate
        );

        self.backend.open(self.config.sample_rate).await?;
        let runtime = match Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                self.backend.close();
                return Err(ConnectError::ContextResume(e.to_string()));
            }
        };

        let initial_gain = if self.config.start_muted {
            0.0
        } else {
            self.config.unmuted_gain
        };
        let session = PlaybackSession {
            id: self.next_session.fetch_add(1, Ordering::SeqCst),
            runtime,
            analyser: Arc::new(FrequencyAnalyzer::new(
                self.config.sample_rate,
                self.config.fft_size,
                self.config.smoothing,
            )),
            gain: GainNode::new(initial_gain),
            muted: self.config.start_muted,
            pipeline: None,
            next_generation: 0,
            tracker: TrackOffsetTracker::new(
                self.config.sample_rate,
                self.config.offset_request_expiry(),
            ),
            backlog: Vec::new(),
        };
        *self.session.lock() = Some(session);
        self.arbiter.attach(audio, video, set_playing, on_natural_resume);

        info!("✅ Playback engine connected");
        Ok(())
    }

    /// Tear down the session. Pending offset requests resolve to `None`.
    pub fn disconnect(&self) {
        if self.teardown() {
            self.arbiter.detach();
            info!("🛑 Playback engine disconnected");
        }
    }

    fn teardown(&self) -> bool {
        let Some(mut session) = self.session.lock().take() else {
            return false;
        };
        if let Some(mut pipeline) = session.pipeline.take() {
            pipeline.handle.stop();
            pipeline.pump.abort();
        }
        self.backend.close();
        debug!(session = session.id, "session torn down");
        true
    }

    /// Silence the assistant voice. Background media volume is untouched.
    pub fn set_mute(&self) {
        if let Some(session) = self.session.lock().as_mut() {
            session.gain.set(0.0);
            session.muted = true;
        }
    }

    pub fn unmute(&self) {
        if let Some(session) = self.session.lock().as_mut() {
            session.gain.set(self.config.unmuted_gain);
            session.muted = false;
        }
    }

    pub fn is_muted(&self) -> bool {
        self.session.lock().as_ref().map_or(true, |s| s.muted)
    }

    /// Current assistant-voice gain, if connected.
    pub fn gain(&self) -> Option<f32> {
        self.session.lock().as_ref().map(|s| s.gain.get())
    }

    /// Queue a chunk of `track_id` (default `"default"`) for playback.
    ///
    /// Returns the decoded samples, or `None` when the track was interrupted and the
    /// chunk was dropped.
    pub fn add_16bit_pcm(
        &self,
        buffer: impl Into<PcmBuffer>,
        track_id: Option<&str>,
    ) -> EngineResult<Option<Arc<[i16]>>> {
        let track_id = track_id.unwrap_or(DEFAULT_TRACK_ID);
        let samples = {
            let guard = self.session.lock();
            let session = guard.as_ref().ok_or(EngineError::NotConnected)?;
            if session.tracker.is_interrupted(track_id) {
                debug!(track_id, "dropping chunk for interrupted track");
                return Ok(None);
            }
            let buffer: PcmBuffer = buffer.into();
            buffer.into_samples()?
        };
        if samples.is_empty() {
            return Ok(Some(samples));
        }

        // Background goes quiet and the chunk is counted before the renderer can see it.
        self.arbiter.on_assistant_audio(track_id);

        let queued = self.enqueue(track_id, &samples);
        if !matches!(queued, Ok(true)) {
            self.arbiter.on_chunks_dropped(track_id, 1);
        }
        match queued {
            Ok(true) => Ok(Some(samples)),
            Ok(false) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Hand a counted chunk to the current pipeline, starting one if needed.
    /// `Ok(false)` when the track was interrupted in the meantime.
    fn enqueue(&self, track_id: &str, samples: &Arc<[i16]>) -> EngineResult<bool> {
        let mut guard = self.session.lock();
        let session = guard.as_mut().ok_or(EngineError::NotConnected)?;
        if session.tracker.is_interrupted(track_id) {
            debug!(track_id, "dropping chunk for interrupted track");
            return Ok(false);
        }

        if session.pipeline.is_none() {
            start_pipeline(session, &self.session, &self.arbiter, &self.backend)?;
        }
        let command = RenderCommand::Write {
            track_id: track_id.to_string(),
            samples: Arc::clone(samples),
        };
        let refused = match &session.pipeline {
            Some(pipeline) => pipeline.commands.send(command).is_err(),
            None => true,
        };
        if refused {
            session
                .backlog
                .push((track_id.to_string(), Arc::clone(samples)));
        }
        Ok(true)
    }

    /// Ask the renderer how far the most recently written track has played.
    ///
    /// With `interrupt`, that track is also cut: its queued chunks are discarded and any
    /// later chunks for it are dropped. Resolves to `None` when nothing is rendering or
    /// the pipeline stops before answering.
    pub async fn get_track_sample_offset(&self, interrupt: bool) -> Option<TrackSampleOffset> {
        let request_id = {
            let mut guard = self.session.lock();
            let session = guard.as_mut()?;
            let pipeline = session.pipeline.as_ref()?;
            if pipeline.commands.is_closed() {
                return None;
            }
            let request_id = session.tracker.issue(pipeline.generation);
            let sent = pipeline
                .commands
                .send(RenderCommand::Offset {
                    request_id,
                    interrupt,
                })
                .is_ok();
            if !sent {
                session.tracker.forget(request_id);
                return None;
            }
            request_id
        };

        let poll_interval = self.config.offset_poll_interval();
        loop {
            let poll = match self.session.lock().as_mut() {
                Some(session) => session.tracker.poll(request_id),
                None => OffsetPoll::Abandoned,
            };
            match poll {
                OffsetPoll::Ready(offset) => {
                    if interrupt {
                        if let Some(track_id) = offset.track_id.as_deref() {
                            info!(
                                "⏹️ Interrupted {} at {} samples",
                                track_id, offset.offset_samples
                            );
                            self.arbiter.on_track_interrupted(track_id);
                        }
                    }
                    return Some(offset);
                }
                OffsetPoll::Pending => tokio::time::sleep(poll_interval).await,
                OffsetPoll::Abandoned => {
                    debug!(%request_id, "offset request abandoned");
                    return None;
                }
            }
        }
    }

    /// Cut the current track. Same as `get_track_sample_offset(true)`.
    pub async fn interrupt(&self) -> Option<TrackSampleOffset> {
        self.get_track_sample_offset(true).await
    }

    /// Spectrum of the assistant voice over the configured decibel range.
    pub fn get_frequencies(&self, kind: AnalysisKind) -> EngineResult<FrequencyData> {
        self.get_frequencies_in_range(kind, self.config.min_decibels, self.config.max_decibels)
    }

    pub fn get_frequencies_in_range(
        &self,
        kind: AnalysisKind,
        min_decibels: f32,
        max_decibels: f32,
    ) -> EngineResult<FrequencyData> {
        let analyser = self
            .session
            .lock()
            .as_ref()
            .map(|s| Arc::clone(&s.analyser))
            .ok_or(EngineError::NotConnected)?;
        Ok(analyser.get_frequencies(kind, min_decibels, max_decibels))
    }

    /// Status of the conversation item currently playing. Only the arbiter reads it.
    pub fn set_item_status(&self, status: ItemStatus) {
        self.arbiter.set_item_status(status, None);
    }

    /// Like [`Self::set_item_status`], scoped to a known track.
    pub fn set_item_status_for(&self, track_id: &str, status: ItemStatus) {
        self.arbiter.set_item_status(status, Some(track_id));
    }
}

impl Drop for StreamingPlaybackEngine {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn start_pipeline(
    session: &mut PlaybackSession,
    shared: &SharedSession,
    arbiter: &Arc<AudioArbiter>,
    backend: &Arc<dyn RenderBackend>,
) -> EngineResult<()> {
    let (processor, port) = StreamProcessor::channel();
    let node = RenderNode::new(processor, Some(session.analyser.tap()), session.gain.clone());
    let handle = backend.spawn(node)?;

    session.next_generation += 1;
    let generation = session.next_generation;
    let pump = session.runtime.spawn(pump_events(
        Arc::downgrade(shared),
        session.id,
        generation,
        port.events,
        Arc::clone(arbiter),
        Arc::clone(backend),
    ));
    debug!(session = session.id, generation, "render pipeline started");

    session.pipeline = Some(Pipeline {
        generation,
        commands: port.commands,
        handle,
        pump,
    });
    Ok(())
}

async fn pump_events(
    shared: Weak<Mutex<Option<PlaybackSession>>>,
    session_id: u64,
    generation: u64,
    mut events: mpsc::UnboundedReceiver<RenderEvent>,
    arbiter: Arc<AudioArbiter>,
    backend: Arc<dyn RenderBackend>,
) {
    while let Some(event) = events.recv().await {
        let Some(shared) = shared.upgrade() else {
            break;
        };
        match event {
            RenderEvent::Offset {
                request_id,
                track_id,
                offset,
                interrupted,
            } => {
                let mut guard = shared.lock();
                if let Some(session) = guard.as_mut().filter(|s| s.id == session_id) {
                    if interrupted {
                        if let Some(track_id) = track_id.as_deref() {
                            session.tracker.mark_interrupted(track_id);
                        }
                    }
                    session.tracker.record(request_id, track_id, offset);
                }
            }
            RenderEvent::StopByCompletion { track_id, drained } => {
                let current = shared
                    .lock()
                    .as_ref()
                    .is_some_and(|s| s.id == session_id);
                if current {
                    debug!(track_id = %track_id, drained, "chunk finished");
                    arbiter.on_chunk_finished(&track_id);
                }
            }
            RenderEvent::Stop { rendered, requeue } => {
                let dropped = {
                    let mut guard = shared.lock();
                    match guard.as_mut().filter(|s| s.id == session_id) {
                        Some(session) => on_pipeline_stopped(
                            session, &shared, generation, rendered, requeue, &arbiter,
                            &backend,
                        ),
                        None => Vec::new(),
                    }
                };
                for (track_id, count) in dropped {
                    arbiter.on_chunks_dropped(&track_id, count);
                }
                break;
            }
        }
    }
}

fn on_pipeline_stopped(
    session: &mut PlaybackSession,
    shared: &SharedSession,
    generation: u64,
    rendered: Vec<(String, u64)>,
    requeue: Vec<(String, Arc<[i16]>)>,
    arbiter: &Arc<AudioArbiter>,
    backend: &Arc<dyn RenderBackend>,
) -> Vec<(String, usize)> {
    session.tracker.carry(&rendered);
    session.tracker.flush_generation(generation);
    if session
        .pipeline
        .as_ref()
        .is_some_and(|p| p.generation == generation)
    {
        if let Some(mut pipeline) = session.pipeline.take() {
            pipeline.handle.stop();
        }
    }
    debug!(session = session.id, generation, "render pipeline stopped");

    let mut pending = requeue;
    pending.append(&mut session.backlog);
    let (mut dropped, pending): (Vec<_>, Vec<_>) = pending
        .into_iter()
        .partition(|(track_id, _)| session.tracker.is_interrupted(track_id));
    if pending.is_empty() || session.pipeline.is_some() {
        session.backlog.extend(pending);
        return count_by_track(dropped);
    }

    // Chunks raced the teardown: give them a fresh pipeline.
    if let Err(e) = start_pipeline(session, shared, arbiter, backend) {
        warn!("Could not restart render pipeline: {}", e);
        dropped.extend(pending);
        return count_by_track(dropped);
    }
    if let Some(pipeline) = &session.pipeline {
        for (track_id, samples) in pending {
            if let Err(mpsc::error::SendError(RenderCommand::Write { track_id, samples })) =
                pipeline
                    .commands
                    .send(RenderCommand::Write { track_id, samples })
            {
                dropped.push((track_id, samples));
            }
        }
    }
    count_by_track(dropped)
}

fn count_by_track(chunks: Vec<(String, Arc<[i16]>)>) -> Vec<(String, usize)> {
    let mut counts: Vec<(String, usize)> = Vec::new();
    for (track_id, _) in chunks {
        match counts.iter_mut().find(|(id, _)| *id == track_id) {
            Some((_, count)) => *count += 1,
            None => counts.push((track_id, 1)),
        }
    }
    counts
}
