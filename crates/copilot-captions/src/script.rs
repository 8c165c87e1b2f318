//! Narration script parsing (`audio_scripts.txt`).
//!
//! A line containing an `MM:SS` timestamp (optionally next to a speaker name) sets the
//! current time. Every other non-blank line is a caption starting at that time.

use crate::captions::Caption;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

static TIMESTAMP: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"(\d{2}):(\d{2})").ok());

fn timestamp_seconds(line: &str) -> Option<f64> {
    let caps = TIMESTAMP.as_ref()?.captures(line)?;
    let minutes: u32 = caps.get(1)?.as_str().parse().ok()?;
    let seconds: u32 = caps.get(2)?.as_str().parse().ok()?;
    Some(f64::from(minutes * 60 + seconds))
}

/// Parse a script into captions, in file order.
pub fn parse_script(script: &str) -> Vec<Caption> {
    let mut captions = Vec::new();
    let mut current = 0.0;
    for line in script.lines() {
        let text = line.trim();
        if text.is_empty() {
            continue;
        }
        match timestamp_seconds(text) {
            Some(seconds) => current = seconds,
            None => captions.push(Caption::new(current, text)),
        }
    }
    debug!(count = captions.len(), "parsed narration script");
    captions
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamps_set_time_for_following_lines() {
        let script = "\
Host 00:00
Welcome to this issue.

We start with the cover story.
Guest 01:05
Thanks for having me.
";
        let captions = parse_script(script);
        assert_eq!(
            captions,
            vec![
                Caption::new(0.0, "Welcome to this issue."),
                Caption::new(0.0, "We start with the cover story."),
                Caption::new(65.0, "Thanks for having me."),
            ]
        );
    }

    #[test]
    fn text_before_any_timestamp_starts_at_zero() {
        let captions = parse_script("Intro line\r\n00:10\r\nSecond\r\n");
        assert_eq!(captions[0], Caption::new(0.0, "Intro line"));
        assert_eq!(captions[1], Caption::new(10.0, "Second"));
    }

    #[test]
    fn single_digit_minutes_are_not_timestamps() {
        let captions = parse_script("It is 5:30 already");
        assert_eq!(captions.len(), 1);
    }
}
