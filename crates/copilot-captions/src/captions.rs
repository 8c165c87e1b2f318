//! Active caption and active word for a playback position.
//!
//! There is no per-word timing data: each caption's interval (up to the next caption,
//! or a fixed tail for the last one) is split evenly between its words.

use copilot_core::CaptionConfig;
use serde::{Deserialize, Serialize};

/// One line of narration text and the time it starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Caption {
    pub time_seconds: f64,
    pub text: String,
}

impl Caption {
    pub fn new(time_seconds: f64, text: impl Into<String>) -> Self {
        Self {
            time_seconds,
            text: text.into(),
        }
    }
}

/// Evenly allotted slice of a caption for one word.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WordTiming {
    pub word: String,
    pub start_seconds: f64,
    pub end_seconds: f64,
}

/// The word to highlight right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveWord {
    pub caption_index: usize,
    pub word_index: usize,
}

/// Which caption a navigation button should jump to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptionStep {
    Previous,
    /// Restart the caption being read.
    Current,
    Next,
}

/// Captions of one document, ascending by time.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptionTrack {
    captions: Vec<Caption>,
    last_caption_seconds: f64,
}

impl Default for CaptionTrack {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl CaptionTrack {
    /// Captions are sorted by time; equal times keep their input order.
    pub fn new(mut captions: Vec<Caption>) -> Self {
        captions.sort_by(|a, b| a.time_seconds.total_cmp(&b.time_seconds));
        Self {
            captions,
            last_caption_seconds: CaptionConfig::default().last_caption_seconds,
        }
    }

    pub fn with_config(captions: Vec<Caption>, config: &CaptionConfig) -> Self {
        Self {
            last_caption_seconds: config.last_caption_seconds,
            ..Self::new(captions)
        }
    }

    pub fn len(&self) -> usize {
        self.captions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.captions.is_empty()
    }

    pub fn captions(&self) -> &[Caption] {
        &self.captions
    }

    pub fn get(&self, index: usize) -> Option<&Caption> {
        self.captions.get(index)
    }

    /// Index of the last caption starting at or before `t`.
    pub fn active_index(&self, t: f64) -> Option<usize> {
        if t.is_nan() {
            return None;
        }
        let after = self.captions.partition_point(|c| c.time_seconds <= t);
        after.checked_sub(1)
    }

    pub fn active_caption(&self, t: f64) -> Option<&Caption> {
        self.active_index(t).and_then(|i| self.captions.get(i))
    }

    /// Word slices of caption `index`.
    pub fn word_timings(&self, index: usize) -> Vec<WordTiming> {
        let Some(caption) = self.captions.get(index) else {
            return Vec::new();
        };
        let words: Vec<&str> = caption.text.split_whitespace().collect();
        if words.is_empty() {
            return Vec::new();
        }
        let duration = match self.captions.get(index + 1) {
            Some(next) => next.time_seconds - caption.time_seconds,
            None => self.last_caption_seconds,
        };
        let slice = duration / words.len() as f64;
        words
            .into_iter()
            .enumerate()
            .map(|(i, word)| WordTiming {
                word: word.to_string(),
                start_seconds: caption.time_seconds + i as f64 * slice,
                end_seconds: caption.time_seconds + (i + 1) as f64 * slice,
            })
            .collect()
    }

    /// Word of the active caption whose slice contains `t`.
    ///
    /// `None` past the end of the last word, e.g. in the tail of the final caption.
    pub fn active_word(&self, t: f64) -> Option<ActiveWord> {
        let caption_index = self.active_index(t)?;
        let word_index = self
            .word_timings(caption_index)
            .iter()
            .position(|w| t >= w.start_seconds && t < w.end_seconds)?;
        Some(ActiveWord {
            caption_index,
            word_index,
        })
    }

    /// Start time of the caption `step` away from the one active at `t`.
    pub fn seek_target(&self, t: f64, step: CaptionStep) -> Option<f64> {
        let target = match (self.active_index(t), step) {
            (Some(i), CaptionStep::Previous) => i.saturating_sub(1),
            (Some(i), CaptionStep::Current) => i,
            (Some(i), CaptionStep::Next) => i + 1,
            (None, CaptionStep::Next) => 0,
            (None, _) => return None,
        };
        self.captions.get(target).map(|c| c.time_seconds)
    }
}
