//! Voice commands for the background media (`audio_control` tool calls).
//!
//! All commands go through the arbiter: they clear the hold flag first, and `pause`
//! sets it again, so a command never fights with the resume path.

use crate::arbiter::AudioArbiter;
use crate::error::{EngineError, EngineResult};
use copilot_core::CaptionConfig;
use serde::{Deserialize, Serialize};
use tracing::debug;

const MIN_PLAYBACK_RATE: f64 = 0.25;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeedChange {
    Up,
    Down,
    Normal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipTarget {
    Forward,
    Backward,
    Start,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeChange {
    Up,
    Down,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackCommand {
    Pause,
    Resume,
    Speed(SpeedChange),
    Skip(SkipTarget),
    Volume(VolumeChange),
    /// Report position without changing anything.
    Peek,
}

impl PlaybackCommand {
    /// Parse a `command` verb and its `context` qualifier, e.g. `("skip", "backward")`.
    pub fn parse(command: &str, context: &str) -> EngineResult<Self> {
        let command = command.trim().to_ascii_lowercase();
        let context = context.trim().to_ascii_lowercase();
        let unknown = || EngineError::UnknownCommand(format!("{command} {context}").trim().to_string());

        let parsed = match command.as_str() {
            "pause" => PlaybackCommand::Pause,
            "resume" => PlaybackCommand::Resume,
            "peek" => PlaybackCommand::Peek,
            "speed" => PlaybackCommand::Speed(match context.as_str() {
                "up" => SpeedChange::Up,
                "down" => SpeedChange::Down,
                "normal" => SpeedChange::Normal,
                _ => return Err(unknown()),
            }),
            "skip" => PlaybackCommand::Skip(match context.as_str() {
                "forward" => SkipTarget::Forward,
                "backward" => SkipTarget::Backward,
                "start" => SkipTarget::Start,
                _ => return Err(unknown()),
            }),
            "volume" => PlaybackCommand::Volume(match context.as_str() {
                "up" => VolumeChange::Up,
                "down" => VolumeChange::Down,
                _ => return Err(unknown()),
            }),
            _ => return Err(unknown()),
        };
        Ok(parsed)
    }
}

/// Arguments of an `audio_control` tool call.
#[derive(Debug, Clone, Deserialize)]
pub struct AudioControlArgs {
    #[serde(default)]
    pub context: String,
    pub command: String,
}

impl AudioControlArgs {
    pub fn to_command(&self) -> EngineResult<PlaybackCommand> {
        PlaybackCommand::parse(&self.command, &self.context)
    }
}

/// Tool-call result returned to the voice model.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandOutcome {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_time: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
}

impl CommandOutcome {
    fn ok() -> Self {
        Self {
            ok: true,
            current_time: None,
            duration: None,
        }
    }
}

impl AudioArbiter {
    /// Apply a voice command to the displayed background element.
    ///
    /// Pause and resume only move the hold flag; the next resume decision honours it.
    pub fn apply_command(
        &self,
        command: PlaybackCommand,
        steps: &CaptionConfig,
    ) -> CommandOutcome {
        self.set_ask_to_stop(false);
        debug!(?command, "playback command");

        match command {
            PlaybackCommand::Pause => {
                self.set_ask_to_stop(true);
                return CommandOutcome::ok();
            }
            PlaybackCommand::Resume => return CommandOutcome::ok(),
            _ => {}
        }

        let Some(media) = self.active_media() else {
            return CommandOutcome {
                ok: false,
                current_time: None,
                duration: None,
            };
        };

        match command {
            PlaybackCommand::Speed(change) => {
                let rate = match change {
                    SpeedChange::Up => media.playback_rate() + steps.rate_step,
                    SpeedChange::Down => {
                        (media.playback_rate() - steps.rate_step).max(MIN_PLAYBACK_RATE)
                    }
                    SpeedChange::Normal => 1.0,
                };
                media.set_playback_rate(rate);
            }
            PlaybackCommand::Skip(target) => {
                let time = match target {
                    SkipTarget::Forward => media.current_time() + steps.skip_seconds,
                    SkipTarget::Backward => (media.current_time() - steps.skip_seconds).max(0.0),
                    SkipTarget::Start => 0.0,
                };
                media.set_current_time(time);
            }
            PlaybackCommand::Volume(change) => {
                let volume = match change {
                    VolumeChange::Up => (media.volume() + steps.volume_up_step).min(1.0),
                    VolumeChange::Down => (media.volume() - steps.volume_down_step).max(0.0),
                };
                media.set_volume(volume);
            }
            PlaybackCommand::Peek => {
                return CommandOutcome {
                    ok: true,
                    current_time: Some(media.current_time()),
                    duration: Some(media.duration()),
                };
            }
            PlaybackCommand::Pause | PlaybackCommand::Resume => {}
        }
        CommandOutcome::ok()
    }

    /// Parse and apply a raw `audio_control` tool-call argument object.
    pub fn apply_tool_call(
        &self,
        arguments: &str,
        steps: &CaptionConfig,
    ) -> EngineResult<CommandOutcome> {
        let args: AudioControlArgs = serde_json::from_str(arguments)?;
        Ok(self.apply_command(args.to_command()?, steps))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use copilot_core::{BackgroundKind, MediaElement, SharedMedia, SimulatedMedia};
    use std::sync::Arc;

    fn arbiter_with_audio() -> (AudioArbiter, Arc<SimulatedMedia>) {
        let arbiter = AudioArbiter::new();
        let audio = Arc::new(SimulatedMedia::new(100.0));
        arbiter.attach(Some(audio.clone() as SharedMedia), None, None, None);
        arbiter.set_background_kind(BackgroundKind::Audio);
        (arbiter, audio)
    }

    #[test]
    fn parses_verbs_and_qualifiers() {
        assert_eq!(
            PlaybackCommand::parse("skip", "Backward").unwrap(),
            PlaybackCommand::Skip(SkipTarget::Backward)
        );
        assert_eq!(PlaybackCommand::parse("peek", "").unwrap(), PlaybackCommand::Peek);
        assert!(matches!(
            PlaybackCommand::parse("speed", "warp"),
            Err(EngineError::UnknownCommand(_))
        ));
        assert!(PlaybackCommand::parse("rewind", "").is_err());
    }

    #[test]
    fn pause_sets_hold_and_any_other_command_clears_it() {
        let (arbiter, _audio) = arbiter_with_audio();
        let steps = CaptionConfig::default();
        arbiter.apply_command(PlaybackCommand::Pause, &steps);
        assert!(arbiter.ask_to_stop());
        arbiter.apply_command(PlaybackCommand::Volume(VolumeChange::Up), &steps);
        assert!(!arbiter.ask_to_stop());
    }

    #[test]
    fn skip_backward_clamps_at_zero() {
        let (arbiter, audio) = arbiter_with_audio();
        let steps = CaptionConfig::default();
        audio.set_current_time(4.0);
        arbiter.apply_command(PlaybackCommand::Skip(SkipTarget::Backward), &steps);
        assert_eq!(audio.current_time(), 0.0);
        arbiter.apply_command(PlaybackCommand::Skip(SkipTarget::Forward), &steps);
        assert_eq!(audio.current_time(), 10.0);
    }

    #[test]
    fn volume_steps_are_asymmetric() {
        let (arbiter, audio) = arbiter_with_audio();
        let steps = CaptionConfig::default();
        arbiter.apply_command(PlaybackCommand::Volume(VolumeChange::Up), &steps);
        assert_eq!(audio.volume(), 1.0);
        arbiter.apply_command(PlaybackCommand::Volume(VolumeChange::Down), &steps);
        assert!((audio.volume() - 0.5).abs() < 1e-9);
        arbiter.apply_command(PlaybackCommand::Volume(VolumeChange::Down), &steps);
        arbiter.apply_command(PlaybackCommand::Volume(VolumeChange::Down), &steps);
        assert_eq!(audio.volume(), 0.0);
    }

    #[test]
    fn speed_has_a_floor() {
        let (arbiter, audio) = arbiter_with_audio();
        let steps = CaptionConfig::default();
        for _ in 0..10 {
            arbiter.apply_command(PlaybackCommand::Speed(SpeedChange::Down), &steps);
        }
        assert_eq!(audio.playback_rate(), 0.25);
        arbiter.apply_command(PlaybackCommand::Speed(SpeedChange::Normal), &steps);
        assert_eq!(audio.playback_rate(), 1.0);
    }

    #[test]
    fn peek_reports_position() {
        let (arbiter, audio) = arbiter_with_audio();
        audio.set_current_time(42.0);
        let outcome = arbiter
            .apply_tool_call(r#"{"command":"peek","context":""}"#, &CaptionConfig::default())
            .unwrap();
        assert_eq!(outcome.current_time, Some(42.0));
        assert_eq!(outcome.duration, Some(100.0));
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["currentTime"], 42.0);
    }

    #[test]
    fn commands_without_media_report_failure() {
        let arbiter = AudioArbiter::new();
        let outcome = arbiter.apply_command(
            PlaybackCommand::Skip(SkipTarget::Start),
            &CaptionConfig::default(),
        );
        assert!(!outcome.ok);
    }
}
