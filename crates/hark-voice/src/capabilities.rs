//! **CapabilityProbe**: which voice primitives the host exposes.
//!
//! The probe runs once per process; the resulting [`VoiceCapabilities`] value is
//! passed explicitly into the controller instead of being read from globals.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;
use tracing::info;

/// One voice primitive the platform may or may not provide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Primitive {
    Recognition,
    Synthesis,
    AudioCapture,
    AudioProcessing,
}

impl fmt::Display for Primitive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Primitive::Recognition => "speech recognition",
            Primitive::Synthesis => "speech synthesis",
            Primitive::AudioCapture => "audio capture",
            Primitive::AudioProcessing => "audio processing",
        })
    }
}

/// Immutable snapshot of the host's voice primitives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VoiceCapabilities {
    pub recognition_available: bool,
    pub synthesis_available: bool,
    pub audio_capture_available: bool,
    pub audio_processing_available: bool,
}

impl VoiceCapabilities {
    /// Everything present. Handy for tests and simulated hosts.
    pub const fn all() -> Self {
        Self {
            recognition_available: true,
            synthesis_available: true,
            audio_capture_available: true,
            audio_processing_available: true,
        }
    }

    pub fn has(&self, primitive: Primitive) -> bool {
        match primitive {
            Primitive::Recognition => self.recognition_available,
            Primitive::Synthesis => self.synthesis_available,
            Primitive::AudioCapture => self.audio_capture_available,
            Primitive::AudioProcessing => self.audio_processing_available,
        }
    }

    /// Primitives the host lacks, in declaration order.
    pub fn missing(&self) -> Vec<Primitive> {
        [
            Primitive::Recognition,
            Primitive::Synthesis,
            Primitive::AudioCapture,
            Primitive::AudioProcessing,
        ]
        .into_iter()
        .filter(|p| !self.has(*p))
        .collect()
    }

    /// Whether the audio level meter can run (needs both capture and processing).
    pub fn level_metering_available(&self) -> bool {
        self.audio_capture_available && self.audio_processing_available
    }
}

/// Read-only view of the host used by the probe.
pub trait HostEnvironment: Send + Sync {
    fn has_recognizer(&self) -> bool;
    fn has_synthesizer(&self) -> bool;
    fn has_audio_input(&self) -> bool;
    fn has_audio_processing(&self) -> bool;
}

/// Snapshot the host. Absence of a primitive is a valid result, not an error.
pub fn probe(host: &dyn HostEnvironment) -> VoiceCapabilities {
    VoiceCapabilities {
        recognition_available: host.has_recognizer(),
        synthesis_available: host.has_synthesizer(),
        audio_capture_available: host.has_audio_input(),
        audio_processing_available: host.has_audio_processing(),
    }
}

/// Process-wide probe: the first call inspects the host, every later call
/// returns the same snapshot.
pub struct CapabilityProbe {
    cached: OnceLock<VoiceCapabilities>,
}

impl CapabilityProbe {
    pub const fn new() -> Self {
        Self {
            cached: OnceLock::new(),
        }
    }

    pub fn probe(&self, host: &dyn HostEnvironment) -> VoiceCapabilities {
        *self.cached.get_or_init(|| {
            let caps = probe(host);
            info!(
                recognition = caps.recognition_available,
                synthesis = caps.synthesis_available,
                audio_capture = caps.audio_capture_available,
                audio_processing = caps.audio_processing_available,
                "voice capabilities probed"
            );
            caps
        })
    }

    /// The snapshot, if the probe already ran.
    pub fn get(&self) -> Option<VoiceCapabilities> {
        self.cached.get().copied()
    }
}

impl Default for CapabilityProbe {
    fn default() -> Self {
        Self::new()
    }
}

/// Host whose answers are fixed up front (embedders that already know what they wired in).
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticHost(pub VoiceCapabilities);

impl HostEnvironment for StaticHost {
    fn has_recognizer(&self) -> bool {
        self.0.recognition_available
    }
    fn has_synthesizer(&self) -> bool {
        self.0.synthesis_available
    }
    fn has_audio_input(&self) -> bool {
        self.0.audio_capture_available
    }
    fn has_audio_processing(&self) -> bool {
        self.0.audio_processing_available
    }
}

/// Host backed by the platform audio devices. Recognition and synthesis
/// presence is declared by the embedder (whether engines are wired in);
/// capture and output are discovered through CPAL.
#[cfg(feature = "cpal-host")]
#[derive(Debug, Clone, Copy)]
pub struct CpalHost {
    pub recognizer_installed: bool,
    pub synthesizer_installed: bool,
}

#[cfg(feature = "cpal-host")]
impl HostEnvironment for CpalHost {
    fn has_recognizer(&self) -> bool {
        self.recognizer_installed && self.has_audio_input()
    }

    fn has_synthesizer(&self) -> bool {
        use cpal::traits::HostTrait;
        self.synthesizer_installed && cpal::default_host().default_output_device().is_some()
    }

    fn has_audio_input(&self) -> bool {
        use cpal::traits::HostTrait;
        cpal::default_host().default_input_device().is_some()
    }

    fn has_audio_processing(&self) -> bool {
        use cpal::traits::{DeviceTrait, HostTrait};
        cpal::default_host()
            .default_input_device()
            .map(|device| device.default_input_config().is_ok())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingHost {
        calls: AtomicUsize,
        recognizer: bool,
    }

    impl HostEnvironment for CountingHost {
        fn has_recognizer(&self) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.recognizer
        }
        fn has_synthesizer(&self) -> bool {
            true
        }
        fn has_audio_input(&self) -> bool {
            true
        }
        fn has_audio_processing(&self) -> bool {
            false
        }
    }

    #[test]
    fn probe_reports_absence_without_failing() {
        let host = StaticHost(VoiceCapabilities {
            recognition_available: false,
            ..VoiceCapabilities::all()
        });
        let caps = probe(&host);
        assert!(!caps.recognition_available);
        assert_eq!(caps.missing(), vec![Primitive::Recognition]);
    }

    #[test]
    fn cached_probe_inspects_host_once() {
        let host = CountingHost {
            calls: AtomicUsize::new(0),
            recognizer: true,
        };
        let probe = CapabilityProbe::new();
        assert!(probe.get().is_none());

        let first = probe.probe(&host);
        let second = probe.probe(&host);
        assert_eq!(first, second);
        assert_eq!(host.calls.load(Ordering::SeqCst), 1);
        assert!(!first.level_metering_available());
        assert_eq!(probe.get(), Some(first));
    }
}
