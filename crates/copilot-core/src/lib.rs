//! # Copilot Core - shared vocabulary for the narration copilot
//!
//! Types every other crate in the workspace speaks: the background media handle the
//! arbiter pauses and resumes, the conversation item status fed by the voice client,
//! and the configuration loaded from `.env` / `copilot.toml`.
//!
//! ```text
//! ┌──────────────────┐      ┌───────────────────┐      ┌──────────────────┐
//! │ copilot-playback │ ───→ │   copilot-core    │ ←─── │ copilot-captions │
//! │ engine / arbiter │      │ MediaElement, cfg │      │ captions / loops │
//! └──────────────────┘      └───────────────────┘      └──────────────────┘
//! ```

pub mod config;
pub mod error;
pub mod media;

pub use config::{CaptionConfig, CopilotConfig, PlaybackConfig};
pub use error::{ConfigError, ConfigResult};
pub use media::{
    BackgroundKind, ItemStatus, MediaElement, OnNaturalResume, SetPlaying, SharedMedia,
    SimulatedMedia,
};
