//! Looping a keyword's time range on the background media.
//!
//! One loop at a time. The loop only seeks; starting playback is left to the caller so the
//! arbiter stays the single owner of play/pause.

use crate::keywords::KeywordRange;
use copilot_core::MediaElement;
use tracing::{debug, info};

/// Result of selecting a keyword.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopSelection {
    /// Media was moved to the range start; the caller shows `page` and requests playback.
    Started { page: u32 },
    /// The keyword was already looping and has been released.
    Cancelled,
}

#[derive(Debug, Default)]
pub struct KeywordLoop {
    active: Option<KeywordRange>,
}

impl KeywordLoop {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active(&self) -> Option<&KeywordRange> {
        self.active.as_ref()
    }

    /// Start looping `range`, replacing any other loop. Selecting the looping keyword again
    /// cancels it.
    pub fn select(&mut self, range: &KeywordRange, media: &dyn MediaElement) -> LoopSelection {
        if let Some(previous) = self.cancel() {
            if previous.label == range.label {
                return LoopSelection::Cancelled;
            }
        }
        media.set_current_time(range.start_seconds);
        info!(
            "🔁 Looping '{}' ({:.1}s..{:.1}s)",
            range.label, range.start_seconds, range.end_seconds
        );
        self.active = Some(range.clone());
        LoopSelection::Started { page: range.page }
    }

    /// Release the current loop, if any.
    pub fn cancel(&mut self) -> Option<KeywordRange> {
        let previous = self.active.take();
        if let Some(range) = &previous {
            debug!(label = %range.label, "keyword loop cancelled");
        }
        previous
    }

    /// Call on every media time update. Returns true when the media was sent back to the
    /// range start.
    pub fn on_time_update(&self, media: &dyn MediaElement) -> bool {
        let Some(range) = &self.active else {
            return false;
        };
        if media.current_time() >= range.end_seconds {
            media.set_current_time(range.start_seconds);
            return true;
        }
        false
    }

    /// Call when the media reports it ended. Returns true when the loop rewound it and the
    /// caller should request playback again.
    pub fn on_ended(&self, media: &dyn MediaElement) -> bool {
        let Some(range) = &self.active else {
            return false;
        };
        if media.current_time() < range.end_seconds {
            media.set_current_time(range.start_seconds);
            return true;
        }
        false
    }
}
