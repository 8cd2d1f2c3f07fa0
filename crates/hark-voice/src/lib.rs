//! # Hark Voice - Voice Interaction Session
//!
//! Push-to-talk speech input and spoken replies for a chat surface. One
//! controller owns the platform's recognition and synthesis primitives and
//! publishes a single session state the UI derives everything from.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                   VoiceControlPresenter                        │
//! │        intents / shortcuts ↓              ↑ affordance         │
//! │  ┌──────────────────────────────────────────────────────────┐ │
//! │  │               VoiceSessionController                     │ │
//! │  │  Idle ⇄ Recording ⇄ Processing ⇄ Error(reason)           │ │
//! │  └──────────────────────────────────────────────────────────┘ │
//! │      ↓ start/stop          ↓ speak            ↓ start/stop     │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────────┐     │
//! │  │ Recognition  │  │  Synthesis   │  │  AudioLevel      │     │
//! │  │   Adapter    │  │   Adapter    │  │   Monitor        │     │
//! │  │ (event bus)  │  │(single-flight│  │ (render ticks)   │     │
//! │  └──────────────┘  └──────────────┘  └──────────────────┘     │
//! │            ↑ capabilities snapshot (CapabilityProbe)           │
//! └───────────────────────────────────────────────────────────────┘
//! ```

pub mod capabilities;
pub mod controller;
pub mod conversation;
pub mod error;
pub mod level;
pub mod observe;
pub mod presenter;
pub mod recognition;
pub mod settings;
pub mod simulated;
pub mod synthesis;
pub mod transcript;

#[cfg(feature = "cpal-host")]
pub use capabilities::CpalHost;
pub use capabilities::{probe, CapabilityProbe, HostEnvironment, Primitive, StaticHost, VoiceCapabilities};
pub use controller::{
    AssistantReply, ErrorNotice, Phase, SessionFault, VoiceEngines, VoiceSessionController,
    VoiceSessionState, VoiceStatus,
};
pub use conversation::{ConversationBackend, EchoBackend};
pub use error::{RecognitionErrorKind, VoiceError, VoiceResult};
pub use level::{AudioLevelMonitor, LevelSource};
pub use observe::{EventBus, Observable};
pub use presenter::{Affordance, Icon, Intent, Key, Shortcut, VoiceControlPresenter};
pub use recognition::{
    Alternative, AttemptId, NativeRecognitionEvent, NativeRecognizer, NativeSink,
    RecognitionAdapter, RecognitionEvent, RecognitionEventKind,
};
pub use settings::{SynthesisSettings, VoiceConfig, VoiceSettings};
pub use synthesis::{NativeSynthesizer, SpeechTask, SynthesisAdapter, Utterance, VoiceInfo};
pub use transcript::{Acceptance, AcceptancePolicy, AcceptedTranscript, TranscriptionResult};
