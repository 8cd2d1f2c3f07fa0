//! **SynthesisAdapter**: single-flight access to the native speech output.
//!
//! `speak` reserves the engine synchronously (a second caller gets `Busy`
//! immediately) and hands back a future that drives the utterance. The
//! reservation is released when that future completes or is dropped.
//! Voice, volume, rate, pitch and language travel with each utterance and
//! are never written onto the engine.

use crate::capabilities::{Primitive, VoiceCapabilities};
use crate::error::{VoiceError, VoiceResult};
use crate::settings::SynthesisSettings;
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

/// A voice the synthesizer offers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VoiceInfo {
    pub id: String,
    pub name: String,
    /// BCP-47 tag, e.g. `en-GB`.
    pub language: String,
    pub is_default: bool,
}

/// Text plus the settings resolved for this one call.
#[derive(Debug, Clone, PartialEq)]
pub struct Utterance {
    pub text: String,
    pub settings: SynthesisSettings,
}

/// The platform speech-output primitive. `speak` resolves when the engine
/// reports the end of the utterance, or fails with the engine's error.
#[async_trait]
pub trait NativeSynthesizer: Send + Sync {
    async fn speak(&self, utterance: Utterance) -> Result<(), String>;

    fn voices(&self) -> Vec<VoiceInfo> {
        Vec::new()
    }
}

/// Outcome of one reserved utterance.
pub type SpeechTask = BoxFuture<'static, VoiceResult<()>>;

struct Reservation(Arc<AtomicBool>);

impl Drop for Reservation {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct SynthesisAdapter {
    native: Arc<dyn NativeSynthesizer>,
    available: bool,
    in_flight: Arc<AtomicBool>,
}

impl SynthesisAdapter {
    pub fn new(native: Arc<dyn NativeSynthesizer>, capabilities: &VoiceCapabilities) -> Self {
        Self {
            native,
            available: capabilities.synthesis_available,
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn voices(&self) -> Vec<VoiceInfo> {
        if !self.available {
            return Vec::new();
        }
        self.native.voices()
    }

    /// Reserve the engine and return the utterance future.
    pub fn speak(&self, text: &str, settings: &SynthesisSettings) -> VoiceResult<SpeechTask> {
        if !self.available {
            return Err(VoiceError::Unsupported(Primitive::Synthesis));
        }
        let text = text.trim();
        if text.is_empty() {
            return Err(VoiceError::InvalidSettings("nothing to speak".into()));
        }
        settings.validate()?;

        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(VoiceError::Busy);
        }
        let reservation = Reservation(Arc::clone(&self.in_flight));

        let utterance = Utterance {
            text: text.to_string(),
            settings: self.resolve_voice(settings),
        };
        let native = Arc::clone(&self.native);
        info!(chars = utterance.text.len(), voice = ?utterance.settings.voice, "speaking");

        Ok(Box::pin(async move {
            let _reservation = reservation;
            native.speak(utterance).await.map_err(|e| {
                warn!(error = %e, "native synthesizer failed");
                VoiceError::SynthesisFailed(e)
            })
        }))
    }

    /// Without an explicit voice, prefer one matching the utterance language.
    fn resolve_voice(&self, settings: &SynthesisSettings) -> SynthesisSettings {
        let mut resolved = settings.clone();
        if resolved.voice.is_some() {
            return resolved;
        }
        let voices = self.native.voices();
        let wanted = primary_subtag(&settings.language);
        let exact = voices
            .iter()
            .find(|v| v.language.eq_ignore_ascii_case(&settings.language));
        let same_language = voices
            .iter()
            .find(|v| primary_subtag(&v.language).eq_ignore_ascii_case(wanted));
        resolved.voice = exact.or(same_language).map(|v| v.id.clone());
        resolved
    }
}

fn primary_subtag(tag: &str) -> &str {
    tag.split(['-', '_']).next().unwrap_or(tag)
}
