//! # Copilot Playback - streaming assistant speech over a narrated document
//!
//! Plays PCM16 audio streamed by a realtime voice model, tracks how far each utterance
//! has played, cuts it on barge-in, and keeps the background narration or video from
//! ever playing at the same time.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                     StreamingPlaybackEngine                       │
//! │  ┌──────────────┐   commands   ┌──────────────┐   ┌────────────┐ │
//! │  │ add_16bit_pcm│ ───────────→ │StreamProcessor│ → │  Analyser  │ │
//! │  │  interrupt   │ ←─────────── │ (audio thread)│   │  → Gain    │ │
//! │  └──────────────┘    events    └──────────────┘   └────────────┘ │
//! │         │                             │                  ↓        │
//! │  ┌──────────────┐                     │           RenderBackend   │
//! │  │ OffsetTracker│ ←── offset ─────────┘          (cpal / offline) │
//! │  └──────────────┘                                                  │
//! └────────────────────────────────│─────────────────────────────────┘
//!                         stop_by_completion
//!                                  ↓
//!                   ┌─────────────────────────────┐
//!                   │        AudioArbiter          │
//!                   │ background audio ⇄ video     │
//!                   └─────────────────────────────┘
//! ```

pub mod analyser;
pub mod arbiter;
pub mod backend;
pub mod bridge;
pub mod control;
pub mod cpal_backend;
pub mod engine;
pub mod error;
pub mod pcm;
pub mod renderer;
pub mod tracker;

pub use analyser::{AnalysisKind, FrequencyAnalyzer, FrequencyData};
pub use arbiter::{ArbiterEvent, ArbiterState, ArbitrationState, AudioArbiter};
pub use backend::{OfflineBackend, RenderBackend, RendererHandle};
pub use bridge::{BridgeOutcome, ConversationUpdate, CopilotBridge, ServerEvent, ServerItem};
pub use control::{
    AudioControlArgs, CommandOutcome, PlaybackCommand, SkipTarget, SpeedChange, VolumeChange,
};
pub use cpal_backend::CpalBackend;
pub use engine::StreamingPlaybackEngine;
pub use error::{ConnectError, EngineError, EngineResult};
pub use pcm::{PcmBuffer, DEFAULT_TRACK_ID};
pub use renderer::{GainNode, RenderCommand, RenderEvent, RenderNode, StreamProcessor};
pub use tracker::{OffsetPoll, TrackOffsetTracker, TrackSampleOffset};
