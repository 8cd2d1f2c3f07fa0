//! Transcription results and the acceptance policy for finished attempts.

use crate::recognition::AttemptId;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// One transcription published by the session.
///
/// Zero or more partials (`is_final == false`) may precede exactly one final per attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TranscriptionResult {
    pub text: String,
    /// 0.0..=1.0
    pub confidence: f32,
    pub is_final: bool,
    pub language: String,
    pub attempt: AttemptId,
    pub received_at: DateTime<Utc>,
}

/// What the chat layer should do with an accepted transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Acceptance {
    /// Confident enough to send as-is.
    AutoSubmit,
    /// Ask the user to confirm or edit first.
    Confirm,
}

/// Final text handed to the chat collaborator, once per completed attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AcceptedTranscript {
    pub text: String,
    pub confidence: f32,
    pub acceptance: Acceptance,
    pub attempt: AttemptId,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AcceptancePolicy {
    pub threshold: f32,
}

impl AcceptancePolicy {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }

    pub fn classify(&self, confidence: f32) -> Acceptance {
        if confidence >= self.threshold {
            Acceptance::AutoSubmit
        } else {
            Acceptance::Confirm
        }
    }

    /// `None` for partials and for finals with no text.
    pub fn accept(&self, result: &TranscriptionResult) -> Option<AcceptedTranscript> {
        let text = result.text.trim();
        if !result.is_final || text.is_empty() {
            return None;
        }
        Some(AcceptedTranscript {
            text: text.to_string(),
            confidence: result.confidence,
            acceptance: self.classify(result.confidence),
            attempt: result.attempt,
        })
    }
}

impl Default for AcceptancePolicy {
    fn default() -> Self {
        Self { threshold: 0.8 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(text: &str, confidence: f32, is_final: bool) -> TranscriptionResult {
        TranscriptionResult {
            text: text.into(),
            confidence,
            is_final,
            language: "en-US".into(),
            attempt: AttemptId(1),
            received_at: Utc::now(),
        }
    }

    #[test]
    fn confident_final_is_auto_submitted() {
        let accepted = AcceptancePolicy::default()
            .accept(&result("weather today", 0.91, true))
            .unwrap();
        assert_eq!(accepted.text, "weather today");
        assert_eq!(accepted.acceptance, Acceptance::AutoSubmit);
    }

    #[test]
    fn low_confidence_final_needs_confirmation() {
        let accepted = AcceptancePolicy::new(0.8)
            .accept(&result("whether to day", 0.42, true))
            .unwrap();
        assert_eq!(accepted.acceptance, Acceptance::Confirm);
    }

    #[test]
    fn partials_and_blank_finals_are_not_accepted() {
        let policy = AcceptancePolicy::default();
        assert!(policy.accept(&result("wea", 0.4, false)).is_none());
        assert!(policy.accept(&result("   ", 0.99, true)).is_none());
    }
}
