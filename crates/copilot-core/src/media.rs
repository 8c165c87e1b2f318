//! Background media handles and the shared status vocabulary.
//!
//! The narration audio and the embedded video are owned by the caller (a webview, a
//! desktop player, ...). The copilot only ever calls `play`/`pause`, seeks, and reads
//! `current_time`/`duration` through [`MediaElement`]; it never builds or replaces them.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// A caller-owned background media element (narration audio or embedded video).
///
/// Methods take `&self`: implementations are shared behind an `Arc` between the
/// arbiter, the caption loop and the UI, so they use interior mutability.
pub trait MediaElement: Send + Sync {
    fn play(&self);
    fn pause(&self);
    fn is_paused(&self) -> bool;

    /// Playback position in seconds.
    fn current_time(&self) -> f64;
    fn set_current_time(&self, seconds: f64);

    /// Total length in seconds (`f64::NAN` while metadata is unknown).
    fn duration(&self) -> f64;

    fn volume(&self) -> f64;
    fn set_volume(&self, volume: f64);

    fn playback_rate(&self) -> f64;
    fn set_playback_rate(&self, rate: f64);
}

/// Shared handle to a background element.
pub type SharedMedia = Arc<dyn MediaElement>;

/// UI play-state setter, kept consistent with the actual media element state.
pub type SetPlaying = Arc<dyn Fn(bool) + Send + Sync>;

/// Invoked after background media resumes on its own at the end of an assistant utterance.
pub type OnNaturalResume = Option<Arc<dyn Fn() + Send + Sync>>;

/// Which background medium the panel is currently showing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackgroundKind {
    /// Narration audio (the video panel is hidden).
    Audio,
    /// Embedded video (the video panel is visible).
    Video,
    /// Nothing to resume.
    #[default]
    None,
}

impl BackgroundKind {
    /// Map the panel's "video hidden" flag to the medium that should resume.
    pub fn from_video_hidden(hidden: bool) -> Self {
        if hidden {
            BackgroundKind::Audio
        } else {
            BackgroundKind::Video
        }
    }
}

impl fmt::Display for BackgroundKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BackgroundKind::Audio => "audio",
            BackgroundKind::Video => "video",
            BackgroundKind::None => "none",
        };
        f.write_str(s)
    }
}

/// Status of a conversation item as reported by the realtime voice client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    #[default]
    InProgress,
    Completed,
    /// The server cut the item short (e.g. after a barge-in). Never resumes background media.
    Incomplete,
}

impl ItemStatus {
    pub fn is_completed(self) -> bool {
        self == ItemStatus::Completed
    }
}

impl fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ItemStatus::InProgress => "in_progress",
            ItemStatus::Completed => "completed",
            ItemStatus::Incomplete => "incomplete",
        };
        f.write_str(s)
    }
}

impl FromStr for ItemStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "in_progress" => Ok(ItemStatus::InProgress),
            "completed" => Ok(ItemStatus::Completed),
            "incomplete" => Ok(ItemStatus::Incomplete),
            other => Err(format!("unknown item status: {other}")),
        }
    }
}

#[derive(Debug, Clone)]
struct SimulatedState {
    paused: bool,
    current_time: f64,
    duration: f64,
    volume: f64,
    playback_rate: f64,
    play_calls: usize,
    pause_calls: usize,
}

/// In-memory media element with a manually advanced clock.
///
/// Used by headless runs and tests: call [`SimulatedMedia::advance`] to move the
/// playhead the way a real element's `timeupdate` would.
#[derive(Debug)]
pub struct SimulatedMedia {
    state: Mutex<SimulatedState>,
}

impl SimulatedMedia {
    /// A paused element of the given length in seconds.
    pub fn new(duration: f64) -> Self {
        Self {
            state: Mutex::new(SimulatedState {
                paused: true,
                current_time: 0.0,
                duration,
                volume: 1.0,
                playback_rate: 1.0,
                play_calls: 0,
                pause_calls: 0,
            }),
        }
    }

    /// Advance the playhead by `seconds` of wall time (scaled by playback rate).
    ///
    /// Returns `true` if the element reached its end during this step; it is then paused.
    pub fn advance(&self, seconds: f64) -> bool {
        let mut state = self.state.lock();
        if state.paused {
            return false;
        }
        let next = state.current_time + seconds * state.playback_rate;
        if next >= state.duration {
            state.current_time = state.duration;
            state.paused = true;
            true
        } else {
            state.current_time = next;
            false
        }
    }

    /// Number of `play()` calls observed.
    pub fn play_calls(&self) -> usize {
        self.state.lock().play_calls
    }

    /// Number of `pause()` calls observed.
    pub fn pause_calls(&self) -> usize {
        self.state.lock().pause_calls
    }
}

impl MediaElement for SimulatedMedia {
    fn play(&self) {
        let mut state = self.state.lock();
        state.play_calls += 1;
        if state.current_time >= state.duration {
            state.current_time = 0.0;
        }
        state.paused = false;
    }

    fn pause(&self) {
        let mut state = self.state.lock();
        state.pause_calls += 1;
        state.paused = true;
    }

    fn is_paused(&self) -> bool {
        self.state.lock().paused
    }

    fn current_time(&self) -> f64 {
        self.state.lock().current_time
    }

    fn set_current_time(&self, seconds: f64) {
        let mut state = self.state.lock();
        state.current_time = seconds.clamp(0.0, state.duration);
    }

    fn duration(&self) -> f64 {
        self.state.lock().duration
    }

    fn volume(&self) -> f64 {
        self.state.lock().volume
    }

    fn set_volume(&self, volume: f64) {
        self.state.lock().volume = volume.clamp(0.0, 1.0);
    }

    fn playback_rate(&self) -> f64 {
        self.state.lock().playback_rate
    }

    fn set_playback_rate(&self, rate: f64) {
        self.state.lock().playback_rate = rate;
    }
}
