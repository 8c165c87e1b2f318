//! Keyword index (`keywords.txt`).
//!
//! The file is a JSON object mapping each label to `[start, end, page]`. Page 0 marks an
//! entry that is addressable by the assistant but not listed to the user.
//!
//! Without that file the ranges can be recovered from marker lines in the narration script:
//!
//! ```text
//! keyword1:[Arctic fox:4] 1: 00:42     start of "Arctic fox", shown on page 4
//! keyword1:[Arctic fox] 1: 01:44       end of the keyword opened last
//! ```

use crate::error::{CaptionError, CaptionResult};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use tracing::{debug, warn};

static MARKER_START: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(r"keyword\d+:\[\s*([\w\s]+?)\s*:(\d+)\s*\]\s*\d+:\s*(\d{2}):(\d{2})").ok()
});

static MARKER_END: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(r"keyword\d+:\[(\w+(?:\s\w+)*)\]\s*\d+:\s*(\d{2}):(\d{2})").ok()
});

fn marker_seconds(caps: &Captures<'_>, minutes: usize, seconds: usize) -> Option<f64> {
    let m: u32 = caps.get(minutes)?.as_str().parse().ok()?;
    let s: u32 = caps.get(seconds)?.as_str().parse().ok()?;
    Some(f64::from(m * 60 + s))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeywordRange {
    pub label: String,
    pub start_seconds: f64,
    pub end_seconds: f64,
    pub page: u32,
}

impl KeywordRange {
    pub fn new(label: impl Into<String>, start_seconds: f64, end_seconds: f64, page: u32) -> Self {
        Self {
            label: label.into(),
            start_seconds,
            end_seconds,
            page,
        }
    }

    /// Hidden entries (page 0) stay out of keyword listings.
    pub fn is_visible(&self) -> bool {
        self.page != 0
    }

    fn validate(&self) -> CaptionResult<()> {
        let invalid = |reason: &str| CaptionError::InvalidRange {
            label: self.label.clone(),
            reason: reason.to_string(),
        };
        if !self.start_seconds.is_finite() || !self.end_seconds.is_finite() {
            return Err(invalid("bounds must be finite"));
        }
        if self.start_seconds < 0.0 {
            return Err(invalid("start is negative"));
        }
        if self.end_seconds <= self.start_seconds {
            return Err(invalid("end must be after start"));
        }
        Ok(())
    }
}

/// All keywords of a document, ordered by start time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KeywordIndex {
    ranges: Vec<KeywordRange>,
}

impl KeywordIndex {
    pub fn new(mut ranges: Vec<KeywordRange>) -> CaptionResult<Self> {
        for range in &ranges {
            range.validate()?;
        }
        ranges.sort_by(|a, b| {
            a.start_seconds
                .total_cmp(&b.start_seconds)
                .then_with(|| a.label.cmp(&b.label))
        });
        Ok(Self { ranges })
    }

    pub fn from_json(json: &str) -> CaptionResult<Self> {
        let raw: HashMap<String, (f64, f64, u32)> = serde_json::from_str(json)?;
        let ranges = raw
            .into_iter()
            .map(|(label, (start, end, page))| KeywordRange::new(label, start, end, page))
            .collect();
        let index = Self::new(ranges)?;
        debug!(count = index.len(), "loaded keyword index");
        Ok(index)
    }

    /// Recover keyword ranges from `keywordN:[label:page]` / `keywordN:[label]` markers in a
    /// narration script. An end marker only closes the keyword opened most recently;
    /// keywords that are never closed are skipped.
    pub fn from_script(script: &str) -> CaptionResult<Self> {
        let (Some(start_re), Some(end_re)) = (MARKER_START.as_ref(), MARKER_END.as_ref()) else {
            return Ok(Self::default());
        };

        // (label, start, end, page) in the order keywords were opened.
        let mut open: Vec<(String, f64, Option<f64>, u32)> = Vec::new();
        let mut last: Option<String> = None;
        for line in script.lines() {
            if let Some(caps) = start_re.captures(line) {
                let (Some(label), Some(page), Some(start)) = (
                    caps.get(1).map(|m| m.as_str().trim().to_string()),
                    caps.get(2).and_then(|m| m.as_str().parse::<u32>().ok()),
                    marker_seconds(&caps, 3, 4),
                ) else {
                    continue;
                };
                open.retain(|(existing, ..)| *existing != label);
                open.push((label.clone(), start, None, page));
                last = Some(label);
            } else if let Some(caps) = end_re.captures(line) {
                let (Some(label), Some(end)) = (
                    caps.get(1).map(|m| m.as_str().trim()),
                    marker_seconds(&caps, 2, 3),
                ) else {
                    continue;
                };
                if last.as_deref() != Some(label) {
                    continue;
                }
                if let Some(entry) = open.iter_mut().find(|(existing, ..)| existing == label) {
                    entry.2 = Some(end);
                }
            }
        }

        let ranges = open
            .into_iter()
            .filter_map(|(label, start, end, page)| match end {
                Some(end) => Some(KeywordRange::new(label, start, end, page)),
                None => {
                    warn!("Keyword '{}' has no end marker, skipping", label);
                    None
                }
            })
            .collect();
        let index = Self::new(ranges)?;
        debug!(count = index.len(), "recovered keywords from script markers");
        Ok(index)
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn all(&self) -> &[KeywordRange] {
        &self.ranges
    }

    pub fn visible(&self) -> impl Iterator<Item = &KeywordRange> {
        self.ranges.iter().filter(|r| r.is_visible())
    }

    /// Whether the keyword panel has anything to show.
    pub fn has_visible(&self) -> bool {
        self.ranges.iter().any(KeywordRange::is_visible)
    }

    pub fn get(&self, label: &str) -> Option<&KeywordRange> {
        self.ranges.iter().find(|r| r.label == label)
    }

    /// Exact-label lookup, hidden entries included.
    pub fn lookup(&self, label: &str) -> Option<(f64, f64)> {
        self.get(label).map(|r| (r.start_seconds, r.end_seconds))
    }

    /// Answer for the assistant's `learn_by_keyword` tool call.
    pub fn tool_result(&self, label: &str) -> Value {
        match self.lookup(label) {
            Some((start, end)) => json!([start, end]),
            None => json!({ "ok": false, "info": "No such a keyword" }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEYWORDS: &str = r#"{
        "Cover story": [12, 95.5, 3],
        "Intro": [0, 12, 0],
        "Interview": [95.5, 240, 7]
    }"#;

    #[test]
    fn parses_and_orders_by_start() {
        let index = KeywordIndex::from_json(KEYWORDS).unwrap();
        let labels: Vec<_> = index.all().iter().map(|r| r.label.as_str()).collect();
        assert_eq!(labels, vec!["Intro", "Cover story", "Interview"]);
        assert_eq!(index.get("Interview").map(|r| r.page), Some(7));
    }

    #[test]
    fn page_zero_is_hidden_but_addressable() {
        let index = KeywordIndex::from_json(KEYWORDS).unwrap();
        assert!(index.visible().all(|r| r.label != "Intro"));
        assert_eq!(index.visible().count(), 2);
        assert_eq!(index.lookup("Intro"), Some((0.0, 12.0)));
        assert!(index.has_visible());

        let hidden_only = KeywordIndex::from_json(r#"{"Intro": [0, 12, 0]}"#).unwrap();
        assert!(!hidden_only.has_visible());
    }

    #[test]
    fn tool_result_matches_wire_shape() {
        let index = KeywordIndex::from_json(KEYWORDS).unwrap();
        assert_eq!(index.tool_result("Cover story"), json!([12.0, 95.5]));
        assert_eq!(
            index.tool_result("cover story"),
            json!({ "ok": false, "info": "No such a keyword" })
        );
    }

    #[test]
    fn script_markers_open_and_close_ranges() {
        let script = "\
keyword1:[Arctic fox:4] 1: 00:42
The arctic fox changes its coat.
keyword1:[Arctic fox] 1: 01:44
keyword2:[Sea ice:0] 2: 02:00
keyword3:[Tundra:6] 3: 02:30
keyword2:[Sea ice] 2: 02:50
keyword3:[Tundra] 3: 03:10
";
        let index = KeywordIndex::from_script(script).unwrap();
        assert_eq!(index.lookup("Arctic fox"), Some((42.0, 104.0)));
        assert_eq!(index.get("Tundra").map(|r| r.page), Some(6));
        // "Sea ice" was closed after another keyword opened: never completed.
        assert!(index.get("Sea ice").is_none());
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn rejects_bad_ranges() {
        let err = KeywordIndex::from_json(r#"{"Backwards": [30, 10, 1]}"#).unwrap_err();
        assert!(matches!(err, CaptionError::InvalidRange { ref label, .. } if label == "Backwards"));

        let err = KeywordIndex::from_json(r#"{"Short": [30, 10]}"#).unwrap_err();
        assert!(matches!(err, CaptionError::Keywords(_)));
    }
}
