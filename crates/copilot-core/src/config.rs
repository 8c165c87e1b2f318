//! Copilot configuration loaded from the environment or `copilot.toml`.
//!
//! | Env | Default | Description |
//! |-----|---------|-------------|
//! | COPILOT_SAMPLE_RATE | 24000 | Render context sample rate (Hz) for assistant speech. |
//! | COPILOT_FFT_SIZE | 8192 | Analysis window; must be a power of two. |
//! | COPILOT_SMOOTHING | 0.1 | Analysis time smoothing, `[0, 1)`. |
//! | COPILOT_START_MUTED | true | Assistant gain starts silent until `unmute()`. |
//! | COPILOT_UNMUTED_GAIN | 1.0 | Assistant gain after `unmute()`. |
//! | COPILOT_OFFSET_POLL_MS | 1 | Back-off between offset polls. |
//! | COPILOT_OFFSET_EXPIRY_MS | 2000 | Pending offset requests older than this are dropped. |
//! | COPILOT_MIN_DB / COPILOT_MAX_DB | -100 / -30 | Default frequency normalisation range. |
//! | COPILOT_LAST_CAPTION_SECONDS | 2.0 | Word-timing span for the final caption. |
//! | COPILOT_SKIP_SECONDS | 10.0 | Skip forward/backward step. |
//! | COPILOT_RATE_STEP | 0.25 | Speed up/down step. |
//! | COPILOT_VOLUME_UP_STEP / COPILOT_VOLUME_DOWN_STEP | 0.1 / 0.5 | Background volume steps. |

use crate::error::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, warn};

fn default_sample_rate() -> u32 {
    24000
}

fn default_fft_size() -> usize {
    8192
}

fn default_smoothing() -> f32 {
    0.1
}

fn default_true() -> bool {
    true
}

fn default_unmuted_gain() -> f32 {
    1.0
}

fn default_offset_poll_interval_ms() -> u64 {
    1
}

fn default_offset_request_expiry_ms() -> u64 {
    2000
}

fn default_min_decibels() -> f32 {
    -100.0
}

fn default_max_decibels() -> f32 {
    -30.0
}

/// Streaming playback and analysis settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackConfig {
    /// Sample rate of the render context (default: 24000 Hz, the voice model's output rate)
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,

    /// Analysis FFT size (default: 8192)
    #[serde(default = "default_fft_size")]
    pub fft_size: usize,

    /// Time smoothing applied between analysis frames (default: 0.1)
    #[serde(default = "default_smoothing")]
    pub smoothing: f32,

    /// Whether the assistant gain starts silent (default: true)
    #[serde(default = "default_true")]
    pub start_muted: bool,

    /// Gain applied to assistant speech once unmuted (default: 1.0)
    #[serde(default = "default_unmuted_gain")]
    pub unmuted_gain: f32,

    /// Delay between offset polls in milliseconds (default: 1)
    #[serde(default = "default_offset_poll_interval_ms")]
    pub offset_poll_interval_ms: u64,

    /// Grace period before an unanswered offset request is abandoned (default: 2000ms)
    #[serde(default = "default_offset_request_expiry_ms")]
    pub offset_request_expiry_ms: u64,

    #[serde(default = "default_min_decibels")]
    pub min_decibels: f32,

    #[serde(default = "default_max_decibels")]
    pub max_decibels: f32,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            fft_size: default_fft_size(),
            smoothing: default_smoothing(),
            start_muted: true,
            unmuted_gain: default_unmuted_gain(),
            offset_poll_interval_ms: default_offset_poll_interval_ms(),
            offset_request_expiry_ms: default_offset_request_expiry_ms(),
            min_decibels: default_min_decibels(),
            max_decibels: default_max_decibels(),
        }
    }
}

impl PlaybackConfig {
    pub fn offset_poll_interval(&self) -> Duration {
        Duration::from_millis(self.offset_poll_interval_ms.max(1))
    }

    pub fn offset_request_expiry(&self) -> Duration {
        Duration::from_millis(self.offset_request_expiry_ms)
    }

    /// Reject settings the render and analysis paths cannot honour.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.sample_rate == 0 {
            return Err(ConfigError::Invalid("sample_rate must be non-zero".to_string()));
        }
        if !self.fft_size.is_power_of_two() || self.fft_size < 32 {
            return Err(ConfigError::Invalid(format!(
                "fft_size must be a power of two >= 32, got {}",
                self.fft_size
            )));
        }
        if !(0.0..1.0).contains(&self.smoothing) {
            return Err(ConfigError::Invalid(format!(
                "smoothing must be in [0, 1), got {}",
                self.smoothing
            )));
        }
        if self.min_decibels >= self.max_decibels {
            return Err(ConfigError::Invalid(format!(
                "min_decibels ({}) must be below max_decibels ({})",
                self.min_decibels, self.max_decibels
            )));
        }
        Ok(())
    }
}

fn default_last_caption_seconds() -> f64 {
    2.0
}

fn default_skip_seconds() -> f64 {
    10.0
}

fn default_rate_step() -> f64 {
    0.25
}

fn default_volume_up_step() -> f64 {
    0.1
}

fn default_volume_down_step() -> f64 {
    0.5
}

/// Caption timing and voice playback-control settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptionConfig {
    /// Span assumed for the final caption when splitting it into words (default: 2s)
    #[serde(default = "default_last_caption_seconds")]
    pub last_caption_seconds: f64,

    /// Skip forward/backward step (default: 10s)
    #[serde(default = "default_skip_seconds")]
    pub skip_seconds: f64,

    /// Playback rate step for "speed up"/"speed down" (default: 0.25)
    #[serde(default = "default_rate_step")]
    pub rate_step: f64,

    #[serde(default = "default_volume_up_step")]
    pub volume_up_step: f64,

    #[serde(default = "default_volume_down_step")]
    pub volume_down_step: f64,
}

impl Default for CaptionConfig {
    fn default() -> Self {
        Self {
            last_caption_seconds: default_last_caption_seconds(),
            skip_seconds: default_skip_seconds(),
            rate_step: default_rate_step(),
            volume_up_step: default_volume_up_step(),
            volume_down_step: default_volume_down_step(),
        }
    }
}

/// Top-level copilot configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CopilotConfig {
    #[serde(default)]
    pub playback: PlaybackConfig,

    #[serde(default)]
    pub captions: CaptionConfig,
}

impl CopilotConfig {
    /// Default path for the configuration file
    pub fn default_path() -> PathBuf {
        PathBuf::from("copilot.toml")
    }

    /// Load from environment. Unset or unparsable values fall back to defaults; the result
    /// is validated like a TOML file.
    pub fn from_env() -> ConfigResult<Self> {
        let playback = PlaybackConfig {
            sample_rate: env_parse("COPILOT_SAMPLE_RATE", default_sample_rate()),
            fft_size: env_parse("COPILOT_FFT_SIZE", default_fft_size()),
            smoothing: env_parse("COPILOT_SMOOTHING", default_smoothing()),
            start_muted: env_bool("COPILOT_START_MUTED", true),
            unmuted_gain: env_parse("COPILOT_UNMUTED_GAIN", default_unmuted_gain()),
            offset_poll_interval_ms: env_parse(
                "COPILOT_OFFSET_POLL_MS",
                default_offset_poll_interval_ms(),
            ),
            offset_request_expiry_ms: env_parse(
                "COPILOT_OFFSET_EXPIRY_MS",
                default_offset_request_expiry_ms(),
            ),
            min_decibels: env_parse("COPILOT_MIN_DB", default_min_decibels()),
            max_decibels: env_parse("COPILOT_MAX_DB", default_max_decibels()),
        };
        let captions = CaptionConfig {
            last_caption_seconds: env_parse(
                "COPILOT_LAST_CAPTION_SECONDS",
                default_last_caption_seconds(),
            ),
            skip_seconds: env_parse("COPILOT_SKIP_SECONDS", default_skip_seconds()),
            rate_step: env_parse("COPILOT_RATE_STEP", default_rate_step()),
            volume_up_step: env_parse("COPILOT_VOLUME_UP_STEP", default_volume_up_step()),
            volume_down_step: env_parse("COPILOT_VOLUME_DOWN_STEP", default_volume_down_step()),
        };
        let config = Self { playback, captions };
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document. Missing sections and fields take their defaults.
    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        let config: CopilotConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file; a missing file yields the defaults.
    pub fn load_from_path(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Write as pretty TOML, creating parent directories.
    pub fn save_to_path(&self, path: &Path) -> ConfigResult<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        fs::write(path, content)?;
        Ok(())
    }

    /// Validate every section.
    pub fn validate(&self) -> ConfigResult<()> {
        self.playback.validate()?;
        if self.captions.last_caption_seconds <= 0.0 {
            return Err(ConfigError::Invalid(
                "last_caption_seconds must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

fn env_bool(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(v) => {
            let v = v.trim();
            if v.is_empty() {
                default
            } else {
                v.eq_ignore_ascii_case("true") || v == "1"
            }
        }
        Err(_) => default,
    }
}

fn env_parse<T: FromStr + Copy>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(v) => match v.trim().parse::<T>() {
            Ok(parsed) => parsed,
            Err(_) => {
                warn!("Ignoring unparsable {}={:?}", name, v);
                default
            }
        },
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn playback_defaults_match_voice_model_output() {
        let config = CopilotConfig::default();
        assert_eq!(config.playback.sample_rate, 24000);
        assert_eq!(config.playback.fft_size, 8192);
        assert!((config.playback.smoothing - 0.1).abs() < 1e-6);
        assert!(config.playback.start_muted);
        assert_eq!(config.playback.offset_poll_interval(), Duration::from_millis(1));
        assert!((config.captions.last_caption_seconds - 2.0).abs() < 1e-9);
        config.validate().unwrap();
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = CopilotConfig::from_toml_str(
            r#"
            [playback]
            sample_rate = 48000
            start_muted = false
            "#,
        )
        .unwrap();
        assert_eq!(config.playback.sample_rate, 48000);
        assert!(!config.playback.start_muted);
        assert_eq!(config.playback.fft_size, 8192);
        assert_eq!(config.captions, CaptionConfig::default());
    }

    #[test]
    fn invalid_fft_size_is_rejected() {
        let err = CopilotConfig::from_toml_str("[playback]\nfft_size = 1000\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn inverted_decibel_range_is_rejected() {
        let mut config = CopilotConfig::default();
        config.playback.min_decibels = -20.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("copilot.toml");
        let mut config = CopilotConfig::default();
        config.captions.skip_seconds = 5.0;
        config.save_to_path(&path).unwrap();
        let loaded = CopilotConfig::load_from_path(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = CopilotConfig::load_from_path(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(loaded, CopilotConfig::default());
    }

    #[test]
    fn env_overrides_and_ignores_garbage() {
        std::env::set_var("COPILOT_SAMPLE_RATE", "16000");
        std::env::set_var("COPILOT_START_MUTED", "false");
        std::env::set_var("COPILOT_SKIP_SECONDS", "not-a-number");
        let config = CopilotConfig::from_env();
        std::env::remove_var("COPILOT_START_MUTED");
        std::env::remove_var("COPILOT_SKIP_SECONDS");
        let config = config.unwrap();
        assert_eq!(config.playback.sample_rate, 16000);
        assert!(!config.playback.start_muted);
        assert!((config.captions.skip_seconds - 10.0).abs() < 1e-9);

        // Env values go through the same checks as a config file.
        std::env::set_var("COPILOT_SAMPLE_RATE", "0");
        let zero_rate = CopilotConfig::from_env();
        std::env::set_var("COPILOT_SAMPLE_RATE", "24000");
        std::env::set_var("COPILOT_FFT_SIZE", "1000");
        let odd_fft = CopilotConfig::from_env();
        std::env::remove_var("COPILOT_SAMPLE_RATE");
        std::env::remove_var("COPILOT_FFT_SIZE");
        assert!(matches!(zero_rate, Err(ConfigError::Invalid(_))));
        assert!(matches!(odd_fft, Err(ConfigError::Invalid(ref m)) if m.contains("fft_size")));
    }
}
