//! Error types for the Hark voice session

use crate::capabilities::Primitive;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Result type alias for voice operations
pub type VoiceResult<T> = Result<T, VoiceError>;

/// Errors that can occur in the voice session.
///
/// `Unsupported`, `AlreadyActive`, `Busy` and `InvalidSettings` are synchronous
/// rejections that never change the session phase. The `*Failed` variants are
/// reported by the native engines (or the conversation backend) and route the
/// session through its `Error` phase.
#[derive(Error, Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum VoiceError {
    #[error("{0} is not available on this platform")]
    Unsupported(Primitive),

    #[error("a recording attempt is already active")]
    AlreadyActive,

    #[error("speech recognition failed: {0}")]
    RecognitionFailed(RecognitionErrorKind),

    #[error("speech synthesis failed: {0}")]
    SynthesisFailed(String),

    #[error("conversation backend failed: {0}")]
    BackendFailed(String),

    #[error("another utterance is already in flight")]
    Busy,

    #[error("invalid voice settings: {0}")]
    InvalidSettings(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<config::ConfigError> for VoiceError {
    fn from(err: config::ConfigError) -> Self {
        VoiceError::Config(err.to_string())
    }
}

/// Failure reported by the native recognizer, keyed by its error code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(into = "String")]
pub enum RecognitionErrorKind {
    /// No speech was detected before the engine gave up.
    NoSpeech,
    /// Microphone capture failed or was denied at the device level.
    AudioCapture,
    /// The user or the platform refused microphone permission.
    NotAllowed,
    /// Network-backed recognition could not reach its service.
    Network,
    /// The engine aborted the attempt on its own.
    Aborted,
    LanguageNotSupported,
    ServiceNotAllowed,
    BadGrammar,
    /// Any code the adapter does not know about, kept verbatim.
    Other(String),
}

impl RecognitionErrorKind {
    /// Map a native error code (`no-speech`, `network`, ...) to a kind.
    pub fn from_code(code: &str) -> Self {
        match code.trim().to_ascii_lowercase().as_str() {
            "no-speech" => Self::NoSpeech,
            "audio-capture" => Self::AudioCapture,
            "not-allowed" => Self::NotAllowed,
            "network" => Self::Network,
            "aborted" => Self::Aborted,
            "language-not-supported" => Self::LanguageNotSupported,
            "service-not-allowed" => Self::ServiceNotAllowed,
            "bad-grammar" => Self::BadGrammar,
            _ => Self::Other(code.to_string()),
        }
    }

    pub fn code(&self) -> &str {
        match self {
            Self::NoSpeech => "no-speech",
            Self::AudioCapture => "audio-capture",
            Self::NotAllowed => "not-allowed",
            Self::Network => "network",
            Self::Aborted => "aborted",
            Self::LanguageNotSupported => "language-not-supported",
            Self::ServiceNotAllowed => "service-not-allowed",
            Self::BadGrammar => "bad-grammar",
            Self::Other(code) => code,
        }
    }

    /// Short human-readable message for the UI layer.
    pub fn describe(&self) -> &str {
        match self {
            Self::NoSpeech => "No speech detected. Try again.",
            Self::AudioCapture => "Microphone is not available.",
            Self::NotAllowed | Self::ServiceNotAllowed => "Microphone permission denied.",
            Self::Network => "Network error during speech recognition.",
            Self::Aborted => "Speech recognition was aborted.",
            Self::LanguageNotSupported => "Selected language is not supported.",
            Self::BadGrammar => "Speech recognition grammar error.",
            Self::Other(_) => "Speech recognition error.",
        }
    }
}

impl fmt::Display for RecognitionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl From<RecognitionErrorKind> for String {
    fn from(kind: RecognitionErrorKind) -> Self {
        kind.code().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_codes_round_trip_through_display() {
        for code in ["no-speech", "audio-capture", "not-allowed", "network", "aborted"] {
            assert_eq!(RecognitionErrorKind::from_code(code).to_string(), code);
        }
    }

    #[test]
    fn unknown_code_is_kept_verbatim() {
        let kind = RecognitionErrorKind::from_code("engine-melted");
        assert_eq!(kind, RecognitionErrorKind::Other("engine-melted".into()));
        assert_eq!(kind.code(), "engine-melted");
    }

    #[test]
    fn error_messages_name_the_cause() {
        let err = VoiceError::RecognitionFailed(RecognitionErrorKind::NoSpeech);
        assert_eq!(err.to_string(), "speech recognition failed: no-speech");
        let err = VoiceError::Unsupported(Primitive::Recognition);
        assert_eq!(err.to_string(), "speech recognition is not available on this platform");
    }
}
