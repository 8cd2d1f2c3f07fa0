//! Per-attempt voice settings and the session configuration.
//!
//! `VoiceConfig::load` follows the usual layering: built-in defaults, then an
//! optional TOML file (`HARK_CONFIG`, default `config/voice`), then `HARK__*`
//! environment variables.

use crate::error::{VoiceError, VoiceResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Recognition options applied when a recording attempt starts. Not mutable mid-attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceSettings {
    /// BCP-47 locale tag (e.g. `en-US`).
    pub language: String,
    /// Keep listening after a final segment.
    pub continuous: bool,
    /// Emit partial results while the user is speaking.
    pub interim_results: bool,
    /// Alternatives requested from the engine (>= 1).
    pub max_alternatives: u32,
}

impl Default for VoiceSettings {
    fn default() -> Self {
        Self {
            language: "en-US".to_string(),
            continuous: false,
            interim_results: true,
            max_alternatives: 1,
        }
    }
}

impl VoiceSettings {
    pub fn validate(&self) -> VoiceResult<()> {
        if self.language.trim().is_empty() {
            return Err(VoiceError::InvalidSettings("language must not be empty".into()));
        }
        if self.max_alternatives < 1 {
            return Err(VoiceError::InvalidSettings(
                "max_alternatives must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Options for one utterance. Applied per call, never stored on the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesisSettings {
    /// Voice identifier as reported by the synthesizer; `None` uses the engine default.
    pub voice: Option<String>,
    /// 0.0..=1.0
    pub volume: f32,
    /// 0.1..=10.0, 1.0 is normal speed.
    pub rate: f32,
    /// 0.0..=2.0, 1.0 is normal pitch.
    pub pitch: f32,
    pub language: String,
}

impl Default for SynthesisSettings {
    fn default() -> Self {
        Self {
            voice: None,
            volume: 0.9,
            rate: 1.0,
            pitch: 1.0,
            language: "en-US".to_string(),
        }
    }
}

impl SynthesisSettings {
    pub fn validate(&self) -> VoiceResult<()> {
        if !(0.0..=1.0).contains(&self.volume) {
            return Err(VoiceError::InvalidSettings(format!(
                "volume must be within 0.0..=1.0, got {}",
                self.volume
            )));
        }
        if !(0.1..=10.0).contains(&self.rate) {
            return Err(VoiceError::InvalidSettings(format!(
                "rate must be within 0.1..=10.0, got {}",
                self.rate
            )));
        }
        if !(0.0..=2.0).contains(&self.pitch) {
            return Err(VoiceError::InvalidSettings(format!(
                "pitch must be within 0.0..=2.0, got {}",
                self.pitch
            )));
        }
        Ok(())
    }
}

/// Session-wide configuration, read once when the controller is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceConfig {
    /// How long an `Error` phase stays visible before returning to `Idle`.
    pub error_display_ms: u64,
    /// Final results at or above this confidence are submitted without confirmation.
    pub auto_accept_threshold: f32,
    /// Level meter tick period (bounds the level stream rate).
    pub level_tick_ms: u64,
    /// Exponential smoothing factor for the level meter (0 = raw, towards 1 = sluggish).
    pub level_smoothing: f32,
    /// Defaults for `start_recording(None)`.
    pub recognition: VoiceSettings,
    /// Defaults for `speak(text, None)`.
    pub synthesis: SynthesisSettings,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            error_display_ms: 3000,
            auto_accept_threshold: 0.8,
            level_tick_ms: 50,
            level_smoothing: 0.7,
            recognition: VoiceSettings::default(),
            synthesis: SynthesisSettings::default(),
        }
    }
}

impl VoiceConfig {
    /// Load config from file and environment. Precedence: `HARK__*` env > file (`HARK_CONFIG`, default `config/voice`) > defaults.
    pub fn load() -> VoiceResult<Self> {
        let config_path =
            std::env::var("HARK_CONFIG").unwrap_or_else(|_| "config/voice".to_string());
        Self::load_from(Path::new(&config_path))
    }

    /// Same layering as [`VoiceConfig::load`] with an explicit file path (extension optional).
    pub fn load_from(path: &Path) -> VoiceResult<Self> {
        let builder = config::Config::builder()
            .add_source(config::Config::try_from(&VoiceConfig::default())?);

        let builder = if path.exists() || path.with_extension("toml").exists() {
            builder.add_source(config::File::from(path).required(false))
        } else {
            builder
        };

        let built = builder
            .add_source(config::Environment::with_prefix("HARK").separator("__"))
            .build()?;

        let loaded: VoiceConfig = built.try_deserialize()?;
        loaded.validate()?;
        Ok(loaded)
    }

    pub fn validate(&self) -> VoiceResult<()> {
        if !(0.0..=1.0).contains(&self.auto_accept_threshold) {
            return Err(VoiceError::Config(format!(
                "auto_accept_threshold must be within 0.0..=1.0, got {}",
                self.auto_accept_threshold
            )));
        }
        if !(0.0..1.0).contains(&self.level_smoothing) {
            return Err(VoiceError::Config(format!(
                "level_smoothing must be within 0.0..1.0, got {}",
                self.level_smoothing
            )));
        }
        if self.level_tick_ms == 0 {
            return Err(VoiceError::Config("level_tick_ms must be positive".into()));
        }
        self.recognition.validate()?;
        self.synthesis.validate()?;
        Ok(())
    }

    pub fn error_display_window(&self) -> Duration {
        Duration::from_millis(self.error_display_ms)
    }

    pub fn level_tick(&self) -> Duration {
        Duration::from_millis(self.level_tick_ms)
    }
}
