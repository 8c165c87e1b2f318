//! Arbitration between assistant speech and background media.
//!
//! Exactly one source is audible at a time. The arbiter is the single holder of the
//! state that decides which: item status, the displayed background kind, and the
//! user's ask-to-stop flag. Every transition happens under one lock, so "mark completed"
//! and "check completed before resuming" can never interleave.
//!
//! A track is drained when every chunk counted by `on_assistant_audio` has been reported
//! finished or dropped. Counting happens before the engine hands a chunk to the renderer,
//! so a late completion report for an earlier chunk can never look like a drain.
//!
//! ```text
//!            assistant audio               last chunk drained + completed
//!   Idle ───────────────────→ AssistantSpeaking ─────────────────────────→ BackgroundPlaying
//!    ↑                              │     │ ask-to-stop set                      │
//!    └──── interrupted ─────────────┘     └──────────→ HeldForUser ←── speech_started (any state)
//! ```

use chrono::{DateTime, Utc};
use copilot_core::{BackgroundKind, ItemStatus, OnNaturalResume, SetPlaying, SharedMedia};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Who currently owns the speakers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArbiterState {
    #[default]
    Idle,
    BackgroundPlaying,
    AssistantSpeaking,
    HeldForUser,
}

/// Snapshot of the inputs that gate a resume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArbitrationState {
    pub item_status: ItemStatus,
    pub background_kind: BackgroundKind,
    pub user_requested_hold: bool,
}

/// Transitions reported to observers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ArbiterEvent {
    /// The user started talking; background media was paused.
    BargeIn { timestamp: DateTime<Utc> },
    /// Assistant audio took over the speakers.
    AssistantSpeaking {
        timestamp: DateTime<Utc>,
        track_id: String,
    },
    /// Background media resumed after an utterance finished.
    BackgroundResumed {
        timestamp: DateTime<Utc>,
        kind: BackgroundKind,
        track_id: Option<String>,
    },
    /// An utterance finished but the ask-to-stop flag kept the background paused.
    ResumeHeld {
        timestamp: DateTime<Utc>,
        track_id: Option<String>,
    },
    /// Play/pause from the UI.
    UserToggled {
        timestamp: DateTime<Utc>,
        playing: bool,
    },
}

/// Callbacks are run after the state lock is released so they may call back in.
enum Deferred {
    SetPlaying(SetPlaying, bool),
    NaturalResume(Arc<dyn Fn() + Send + Sync>),
}

impl Deferred {
    fn run(self) {
        match self {
            Deferred::SetPlaying(callback, playing) => callback(playing),
            Deferred::NaturalResume(callback) => callback(),
        }
    }
}

#[derive(Default)]
struct ArbiterInner {
    state: ArbiterState,
    item_status: ItemStatus,
    /// Track the last status belongs to, when the caller said.
    status_track: Option<String>,
    speaking_track: Option<String>,
    /// Chunks handed to the renderer and not yet finished, per track.
    outstanding: HashMap<String, usize>,
    background_kind: BackgroundKind,
    ask_to_stop: bool,
    audio: Option<SharedMedia>,
    video: Option<SharedMedia>,
    set_playing: Option<SetPlaying>,
    on_natural_resume: OnNaturalResume,
}

impl ArbiterInner {
    fn media(&self, kind: BackgroundKind) -> Option<SharedMedia> {
        match kind {
            BackgroundKind::Audio => self.audio.clone(),
            BackgroundKind::Video => self.video.clone(),
            BackgroundKind::None => None,
        }
    }

    /// Pause every background element that is playing. Returns whether any was.
    fn pause_all(&self) -> bool {
        let mut paused_any = false;
        for media in [&self.audio, &self.video].into_iter().flatten() {
            if !media.is_paused() {
                media.pause();
                paused_any = true;
            }
        }
        paused_any
    }

    fn set_playing(&self, playing: bool, deferred: &mut Vec<Deferred>) {
        if let Some(callback) = &self.set_playing {
            deferred.push(Deferred::SetPlaying(Arc::clone(callback), playing));
        }
    }

    fn is_drained(&self, track_id: &str) -> bool {
        self.outstanding.get(track_id).copied().unwrap_or(0) == 0
    }

    fn completion_matches(&self, track_id: &str) -> bool {
        self.item_status.is_completed()
            && self
                .status_track
                .as_deref()
                .map_or(true, |status_track| status_track == track_id)
    }
}

/// Serialises every play/pause decision for the background media.
pub struct AudioArbiter {
    inner: Mutex<ArbiterInner>,
    /// Present only while someone holds the receiving end.
    events: Mutex<Option<mpsc::UnboundedSender<ArbiterEvent>>>,
}

impl Default for AudioArbiter {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioArbiter {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(ArbiterInner::default()),
            events: Mutex::new(None),
        }
    }

    /// Subscribe to transitions from now on.
    ///
    /// Only one subscriber at a time: returns `None` while an earlier receiver is alive.
    /// Transitions with no subscriber are not buffered.
    pub fn take_event_receiver(&self) -> Option<mpsc::UnboundedReceiver<ArbiterEvent>> {
        let mut events = self.events.lock();
        if events.as_ref().is_some_and(|tx| !tx.is_closed()) {
            return None;
        }
        let (tx, rx) = mpsc::unbounded_channel();
        *events = Some(tx);
        Some(rx)
    }

    fn emit(&self, event: ArbiterEvent) {
        let mut events = self.events.lock();
        let delivered = events.as_ref().is_some_and(|tx| tx.send(event).is_ok());
        if !delivered {
            *events = None;
        }
    }

    /// Bind the caller's media handles. Called by `connect()` once the session is up.
    pub fn attach(
        &self,
        audio: Option<SharedMedia>,
        video: Option<SharedMedia>,
        set_playing: Option<SetPlaying>,
        on_natural_resume: OnNaturalResume,
    ) {
        let mut inner = self.inner.lock();
        inner.audio = audio;
        inner.video = video;
        inner.set_playing = set_playing;
        inner.on_natural_resume = on_natural_resume;
        // Chunks of the previous session will never report back.
        inner.outstanding.clear();
    }

    /// Forget the media handles and any in-flight utterance. Media state is left as is.
    pub fn detach(&self) {
        let mut inner = self.inner.lock();
        inner.audio = None;
        inner.video = None;
        inner.set_playing = None;
        inner.on_natural_resume = None;
        inner.speaking_track = None;
        inner.outstanding.clear();
        inner.state = ArbiterState::Idle;
    }

    pub fn state(&self) -> ArbiterState {
        self.inner.lock().state
    }

    pub fn snapshot(&self) -> ArbitrationState {
        let inner = self.inner.lock();
        ArbitrationState {
            item_status: inner.item_status,
            background_kind: inner.background_kind,
            user_requested_hold: inner.ask_to_stop,
        }
    }

    pub fn set_background_kind(&self, kind: BackgroundKind) {
        self.inner.lock().background_kind = kind;
    }

    pub fn background_kind(&self) -> BackgroundKind {
        self.inner.lock().background_kind
    }

    /// Level-triggered hold flag, checked at resume time and never consumed.
    pub fn set_ask_to_stop(&self, hold: bool) {
        self.inner.lock().ask_to_stop = hold;
    }

    pub fn ask_to_stop(&self) -> bool {
        self.inner.lock().ask_to_stop
    }

    /// Element for the displayed kind, falling back to the narration audio.
    pub fn active_media(&self) -> Option<SharedMedia> {
        let inner = self.inner.lock();
        inner.media(inner.background_kind).or_else(|| inner.audio.clone())
    }

    /// Record the status of the current conversation item.
    ///
    /// Resumes the background immediately when the utterance has already drained, so the
    /// resume happens once both conditions hold regardless of which arrived first.
    pub fn set_item_status(&self, status: ItemStatus, track_id: Option<&str>) {
        let mut deferred = Vec::new();
        {
            let mut inner = self.inner.lock();
            inner.item_status = status;
            inner.status_track = track_id.map(str::to_string);
            debug!(%status, track_id, "item status");

            if let Some(speaking) = inner.speaking_track.clone() {
                if inner.state == ArbiterState::AssistantSpeaking
                    && inner.is_drained(&speaking)
                    && inner.completion_matches(&speaking)
                {
                    self.resume(&mut inner, Some(speaking), &mut deferred);
                }
            }
        }
        deferred.into_iter().for_each(Deferred::run);
    }

    /// A chunk of `track_id` is about to be queued: silence the background and count it as
    /// outstanding. Must be called before the chunk reaches the renderer.
    pub fn on_assistant_audio(&self, track_id: &str) {
        let mut deferred = Vec::new();
        {
            let mut inner = self.inner.lock();
            if inner.speaking_track.as_deref() != Some(track_id) {
                if inner.status_track.as_deref() != Some(track_id) {
                    inner.item_status = ItemStatus::InProgress;
                    inner.status_track = None;
                }
                inner.speaking_track = Some(track_id.to_string());
            }
            *inner.outstanding.entry(track_id.to_string()).or_insert(0) += 1;
            if inner.pause_all() || inner.state == ArbiterState::BackgroundPlaying {
                inner.set_playing(false, &mut deferred);
            }
            if inner.state != ArbiterState::AssistantSpeaking {
                info!("🗣️ Assistant speaking ({})", track_id);
                self.emit(ArbiterEvent::AssistantSpeaking {
                    timestamp: Utc::now(),
                    track_id: track_id.to_string(),
                });
            }
            inner.state = ArbiterState::AssistantSpeaking;
        }
        deferred.into_iter().for_each(Deferred::run);
    }

    /// One chunk of `track_id` finished rendering.
    pub fn on_chunk_finished(&self, track_id: &str) {
        self.settle_chunks(track_id, 1);
    }

    /// `count` counted chunks of `track_id` will never render (dropped or lost with a
    /// pipeline). Settles them like finished chunks.
    pub fn on_chunks_dropped(&self, track_id: &str, count: usize) {
        if count > 0 {
            self.settle_chunks(track_id, count);
        }
    }

    fn settle_chunks(&self, track_id: &str, count: usize) {
        let mut deferred = Vec::new();
        {
            let mut inner = self.inner.lock();
            let remaining = match inner.outstanding.get_mut(track_id) {
                Some(remaining) => {
                    *remaining = remaining.saturating_sub(count);
                    *remaining
                }
                None => 0,
            };
            if remaining > 0 {
                return;
            }
            inner.outstanding.remove(track_id);
            let speaking = inner.speaking_track.as_deref() == Some(track_id);
            if speaking
                && inner.state == ArbiterState::AssistantSpeaking
                && inner.completion_matches(track_id)
            {
                self.resume(&mut inner, Some(track_id.to_string()), &mut deferred);
            }
        }
        deferred.into_iter().for_each(Deferred::run);
    }

    /// Chunks of `track_id` not yet finished.
    pub fn outstanding_chunks(&self, track_id: &str) -> usize {
        self.inner
            .lock()
            .outstanding
            .get(track_id)
            .copied()
            .unwrap_or(0)
    }

    fn resume(
        &self,
        inner: &mut ArbiterInner,
        track_id: Option<String>,
        deferred: &mut Vec<Deferred>,
    ) {
        inner.speaking_track = None;
        let kind = inner.background_kind;

        if inner.ask_to_stop {
            inner.pause_all();
            inner.state = ArbiterState::HeldForUser;
            info!("✋ Utterance finished, background held by user");
            self.emit(ArbiterEvent::ResumeHeld {
                timestamp: Utc::now(),
                track_id,
            });
            return;
        }

        let Some(media) = inner.media(kind) else {
            inner.state = ArbiterState::Idle;
            debug!(%kind, "nothing to resume");
            return;
        };
        media.play();
        inner.state = ArbiterState::BackgroundPlaying;
        inner.set_playing(true, deferred);
        if let Some(callback) = &inner.on_natural_resume {
            deferred.push(Deferred::NaturalResume(Arc::clone(callback)));
        }
        info!("▶️ Background {} resumed", kind);
        self.emit(ArbiterEvent::BackgroundResumed {
            timestamp: Utc::now(),
            kind,
            track_id,
        });
    }

    /// The user started talking. Pre-empts everything.
    pub fn on_speech_started(&self) {
        let mut deferred = Vec::new();
        {
            let mut inner = self.inner.lock();
            inner.pause_all();
            inner.set_playing(false, &mut deferred);
            inner.state = ArbiterState::HeldForUser;
        }
        info!("🎤 User speech started, background paused");
        self.emit(ArbiterEvent::BargeIn {
            timestamp: Utc::now(),
        });
        deferred.into_iter().for_each(Deferred::run);
    }

    /// `track_id` was interrupted; it will not finish on its own.
    pub fn on_track_interrupted(&self, track_id: &str) {
        let mut inner = self.inner.lock();
        inner.outstanding.remove(track_id);
        if inner.speaking_track.as_deref() == Some(track_id) {
            inner.speaking_track = None;
            if inner.state == ArbiterState::AssistantSpeaking {
                inner.state = ArbiterState::Idle;
            }
        }
    }

    /// Pause requested from the UI. Sets the hold flag so a finishing utterance does not
    /// restart the background.
    pub fn user_pause(&self) {
        let mut deferred = Vec::new();
        {
            let mut inner = self.inner.lock();
            inner.ask_to_stop = true;
            inner.pause_all();
            inner.set_playing(false, &mut deferred);
            if inner.state != ArbiterState::AssistantSpeaking {
                inner.state = ArbiterState::HeldForUser;
            }
        }
        self.emit(ArbiterEvent::UserToggled {
            timestamp: Utc::now(),
            playing: false,
        });
        deferred.into_iter().for_each(Deferred::run);
    }

    /// Play requested from the UI. Clears the hold flag; while the assistant is talking
    /// the background stays paused and `false` is returned.
    pub fn user_play(&self) -> bool {
        let mut deferred = Vec::new();
        let started = {
            let mut inner = self.inner.lock();
            inner.ask_to_stop = false;
            if inner.state == ArbiterState::AssistantSpeaking {
                false
            } else if let Some(media) = inner.media(inner.background_kind) {
                media.play();
                inner.state = ArbiterState::BackgroundPlaying;
                inner.set_playing(true, &mut deferred);
                true
            } else {
                false
            }
        };
        if started {
            self.emit(ArbiterEvent::UserToggled {
                timestamp: Utc::now(),
                playing: true,
            });
        }
        deferred.into_iter().for_each(Deferred::run);
        started
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use copilot_core::{MediaElement, SimulatedMedia};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct Harness {
        arbiter: AudioArbiter,
        audio: Arc<SimulatedMedia>,
        video: Arc<SimulatedMedia>,
        playing: Arc<AtomicBool>,
        natural_resumes: Arc<AtomicUsize>,
    }

    fn harness(kind: BackgroundKind) -> Harness {
        let arbiter = AudioArbiter::new();
        let audio = Arc::new(SimulatedMedia::new(300.0));
        let video = Arc::new(SimulatedMedia::new(120.0));
        let playing = Arc::new(AtomicBool::new(false));
        let natural_resumes = Arc::new(AtomicUsize::new(0));

        let flag = Arc::clone(&playing);
        let counter = Arc::clone(&natural_resumes);
        arbiter.attach(
            Some(audio.clone() as SharedMedia),
            Some(video.clone() as SharedMedia),
            Some(Arc::new(move |p: bool| flag.store(p, Ordering::SeqCst))),
            Some(Arc::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })),
        );
        arbiter.set_background_kind(kind);
        Harness {
            arbiter,
            audio,
            video,
            playing,
            natural_resumes,
        }
    }

    #[test]
    fn assistant_audio_pauses_background() {
        let h = harness(BackgroundKind::Audio);
        assert!(h.arbiter.user_play());
        assert!(!h.audio.is_paused());

        h.arbiter.on_assistant_audio("item_1");
        assert!(h.audio.is_paused());
        assert!(!h.playing.load(Ordering::SeqCst));
        assert_eq!(h.arbiter.state(), ArbiterState::AssistantSpeaking);
    }

    #[test]
    fn completion_before_drain_resumes_on_drain() {
        let h = harness(BackgroundKind::Audio);
        h.arbiter.on_assistant_audio("item_1");
        h.arbiter.on_assistant_audio("item_1");
        h.arbiter.set_item_status(ItemStatus::Completed, Some("item_1"));
        assert!(h.audio.is_paused());

        h.arbiter.on_chunk_finished("item_1");
        assert!(h.audio.is_paused());
        assert_eq!(h.arbiter.outstanding_chunks("item_1"), 1);
        h.arbiter.on_chunk_finished("item_1");
        assert!(!h.audio.is_paused());
        assert!(h.video.is_paused());
        assert!(h.playing.load(Ordering::SeqCst));
        assert_eq!(h.natural_resumes.load(Ordering::SeqCst), 1);
        assert_eq!(h.arbiter.state(), ArbiterState::BackgroundPlaying);
    }

    #[test]
    fn drain_before_completion_resumes_on_completion() {
        let h = harness(BackgroundKind::Video);
        h.arbiter.on_assistant_audio("item_1");
        h.arbiter.on_chunk_finished("item_1");
        assert!(h.video.is_paused());

        h.arbiter.set_item_status(ItemStatus::Completed, Some("item_1"));
        assert!(!h.video.is_paused());
        assert!(h.audio.is_paused());
    }

    #[test]
    fn late_finish_report_does_not_count_as_drain() {
        let h = harness(BackgroundKind::Audio);
        h.arbiter.on_assistant_audio("item_1");
        // Second chunk queued before the first chunk's finish report is delivered.
        h.arbiter.on_assistant_audio("item_1");
        h.arbiter.set_item_status(ItemStatus::Completed, Some("item_1"));
        h.arbiter.on_chunk_finished("item_1");

        assert!(h.audio.is_paused());
        assert_eq!(h.arbiter.state(), ArbiterState::AssistantSpeaking);
    }

    #[test]
    fn dropped_chunks_settle_the_track() {
        let h = harness(BackgroundKind::Audio);
        h.arbiter.on_assistant_audio("item_1");
        h.arbiter.on_assistant_audio("item_1");
        h.arbiter.set_item_status(ItemStatus::Completed, None);
        h.arbiter.on_chunk_finished("item_1");
        h.arbiter.on_chunks_dropped("item_1", 0);
        assert!(h.audio.is_paused());

        h.arbiter.on_chunks_dropped("item_1", 1);
        assert!(!h.audio.is_paused());
        assert_eq!(h.arbiter.outstanding_chunks("item_1"), 0);
    }

    #[test]
    fn in_progress_keeps_background_paused() {
        let h = harness(BackgroundKind::Audio);
        h.arbiter.on_assistant_audio("item_1");
        h.arbiter.set_item_status(ItemStatus::InProgress, Some("item_1"));
        h.arbiter.on_chunk_finished("item_1");
        assert!(h.audio.is_paused());
        assert_eq!(h.audio.play_calls(), 0);
    }

    #[test]
    fn ask_to_stop_holds_instead_of_resuming() {
        let h = harness(BackgroundKind::Audio);
        h.arbiter.set_ask_to_stop(true);
        h.arbiter.on_assistant_audio("item_1");
        h.arbiter.set_item_status(ItemStatus::Completed, None);
        h.arbiter.on_chunk_finished("item_1");

        assert!(h.audio.is_paused());
        assert_eq!(h.arbiter.state(), ArbiterState::HeldForUser);
        // Level-triggered: still set after being checked.
        assert!(h.arbiter.ask_to_stop());
    }

    #[test]
    fn speech_started_preempts_everything() {
        let h = harness(BackgroundKind::Video);
        h.arbiter.user_play();
        h.arbiter.on_speech_started();
        assert!(h.video.is_paused());
        assert!(!h.playing.load(Ordering::SeqCst));
        assert_eq!(h.arbiter.state(), ArbiterState::HeldForUser);
    }

    #[test]
    fn nothing_resumes_without_background() {
        let h = harness(BackgroundKind::None);
        h.arbiter.on_assistant_audio("item_1");
        h.arbiter.set_item_status(ItemStatus::Completed, None);
        h.arbiter.on_chunk_finished("item_1");
        assert_eq!(h.arbiter.state(), ArbiterState::Idle);
        assert_eq!(h.audio.play_calls() + h.video.play_calls(), 0);
    }

    #[test]
    fn stale_completion_does_not_leak_into_next_track() {
        let h = harness(BackgroundKind::Audio);
        h.arbiter.on_assistant_audio("item_1");
        h.arbiter.set_item_status(ItemStatus::Completed, Some("item_1"));
        h.arbiter.on_chunk_finished("item_1");
        assert!(!h.audio.is_paused());

        h.arbiter.on_assistant_audio("item_2");
        assert_eq!(h.arbiter.snapshot().item_status, ItemStatus::InProgress);
        h.arbiter.on_chunk_finished("item_2");
        assert!(h.audio.is_paused());
    }

    #[test]
    fn user_play_is_refused_while_assistant_speaks() {
        let h = harness(BackgroundKind::Audio);
        h.arbiter.user_pause();
        assert!(h.arbiter.ask_to_stop());
        h.arbiter.on_assistant_audio("item_1");
        assert!(!h.arbiter.user_play());
        assert!(!h.arbiter.ask_to_stop());
        assert!(h.audio.is_paused());
    }

    #[test]
    fn callbacks_may_reenter_the_arbiter() {
        let arbiter = Arc::new(AudioArbiter::new());
        let audio = Arc::new(SimulatedMedia::new(60.0));
        let observed = Arc::new(Mutex::new(None));
        let weak = Arc::downgrade(&arbiter);
        let sink = Arc::clone(&observed);
        arbiter.attach(
            Some(audio as SharedMedia),
            None,
            Some(Arc::new(move |_: bool| {
                if let Some(a) = weak.upgrade() {
                    *sink.lock() = Some(a.state());
                }
            })),
            None,
        );
        arbiter.set_background_kind(BackgroundKind::Audio);
        arbiter.user_play();
        assert_eq!(*observed.lock(), Some(ArbiterState::BackgroundPlaying));
    }

    #[test]
    fn transitions_are_reported() {
        let h = harness(BackgroundKind::Audio);
        let mut rx = h.arbiter.take_event_receiver().unwrap();
        assert!(h.arbiter.take_event_receiver().is_none());

        h.arbiter.on_assistant_audio("item_1");
        h.arbiter.set_item_status(ItemStatus::Completed, None);
        h.arbiter.on_chunk_finished("item_1");

        assert!(matches!(
            rx.try_recv(),
            Ok(ArbiterEvent::AssistantSpeaking { ref track_id, .. }) if track_id == "item_1"
        ));
        assert!(matches!(
            rx.try_recv(),
            Ok(ArbiterEvent::BackgroundResumed {
                kind: BackgroundKind::Audio,
                ..
            })
        ));
    }

    #[test]
    fn transitions_without_subscriber_are_not_buffered() {
        let h = harness(BackgroundKind::Audio);
        for _ in 0..100 {
            h.arbiter.user_play();
            h.arbiter.user_pause();
        }

        let mut rx = h.arbiter.take_event_receiver().unwrap();
        assert!(rx.try_recv().is_err());
        h.arbiter.user_play();
        assert!(matches!(
            rx.try_recv(),
            Ok(ArbiterEvent::UserToggled { playing: true, .. })
        ));

        drop(rx);
        h.arbiter.user_pause();
        assert!(h.arbiter.take_event_receiver().is_some());
    }
}
