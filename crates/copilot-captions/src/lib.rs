//! Caption sync for narrated documents
//!
//! Maps a background media position to the caption and word being read, and loops keyword
//! ranges on request. Playback itself is driven elsewhere; this crate only reads the
//! position and seeks.

pub mod captions;
pub mod document;
pub mod error;
pub mod keyword_loop;
pub mod keywords;
pub mod script;

pub use captions::{ActiveWord, Caption, CaptionStep, CaptionTrack, WordTiming};
pub use document::DocumentCaptions;
pub use error::{CaptionError, CaptionResult};
pub use keyword_loop::{KeywordLoop, LoopSelection};
pub use keywords::{KeywordIndex, KeywordRange};
pub use script::parse_script;
