//! **VoiceControlPresenter**: what the mic button shows and what input does.
//!
//! The presenter holds no state of its own: every affordance is derived from
//! the controller's [`VoiceSessionState`], and every intent is one controller
//! call.

use crate::controller::{Phase, VoiceSessionController, VoiceSessionState};
use crate::error::{VoiceError, VoiceResult};
use futures::Stream;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use tokio_stream::StreamExt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Icon {
    Microphone,
    MicrophoneOff,
    Stop,
    Spinner,
    Warning,
}

/// Render model for the voice control.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Affordance {
    pub icon: Icon,
    pub tooltip: String,
    pub enabled: bool,
    /// Toggle-button pressed state; true only while recording.
    pub pressed: bool,
}

impl Affordance {
    pub fn for_state(state: &VoiceSessionState) -> Self {
        if !state.supported {
            return Self {
                icon: Icon::MicrophoneOff,
                tooltip: "Voice input is not supported here".into(),
                enabled: false,
                pressed: false,
            };
        }
        match &state.phase {
            Phase::Idle => Self {
                icon: Icon::Microphone,
                tooltip: "Start voice input (Ctrl+Space)".into(),
                enabled: true,
                pressed: false,
            },
            Phase::Recording => Self {
                icon: Icon::Stop,
                tooltip: "Stop recording (Esc)".into(),
                enabled: true,
                pressed: true,
            },
            Phase::Processing => Self {
                icon: Icon::Spinner,
                tooltip: "Working...".into(),
                enabled: false,
                pressed: false,
            },
            Phase::Error(fault) => Self {
                icon: Icon::Warning,
                tooltip: fault.describe(),
                enabled: true,
                pressed: false,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    ToggleRecording,
    Cancel,
    DismissError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Space,
    Escape,
    Char(char),
}

/// A key chord such as `Ctrl+Space`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Shortcut {
    pub ctrl: bool,
    pub shift: bool,
    pub alt: bool,
    pub key: Key,
}

impl Shortcut {
    pub fn ctrl(key: Key) -> Self {
        Self {
            ctrl: true,
            shift: false,
            alt: false,
            key,
        }
    }

    pub fn plain(key: Key) -> Self {
        Self {
            ctrl: false,
            shift: false,
            alt: false,
            key,
        }
    }

    pub fn intent(&self) -> Option<Intent> {
        if self.shift || self.alt {
            return None;
        }
        match (self.ctrl, self.key) {
            (true, Key::Space) => Some(Intent::ToggleRecording),
            (true, Key::Char(c)) if c.eq_ignore_ascii_case(&'m') => Some(Intent::ToggleRecording),
            (false, Key::Escape) => Some(Intent::Cancel),
            _ => None,
        }
    }
}

impl FromStr for Shortcut {
    type Err = VoiceError;

    /// Parses chords like `ctrl+space`, `Ctrl+M` or `Escape`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut shortcut = Shortcut::plain(Key::Space);
        let mut key = None;
        for part in s.split('+').map(str::trim) {
            match part.to_ascii_lowercase().as_str() {
                "ctrl" | "control" | "cmd" | "meta" => shortcut.ctrl = true,
                "shift" => shortcut.shift = true,
                "alt" | "option" => shortcut.alt = true,
                "space" => key = Some(Key::Space),
                "esc" | "escape" => key = Some(Key::Escape),
                other => {
                    let mut chars = other.chars();
                    match (chars.next(), chars.next()) {
                        (Some(c), None) => key = Some(Key::Char(c)),
                        _ => {
                            return Err(VoiceError::InvalidSettings(format!(
                                "unknown key `{part}` in shortcut `{s}`"
                            )))
                        }
                    }
                }
            }
        }
        shortcut.key = key
            .ok_or_else(|| VoiceError::InvalidSettings(format!("shortcut `{s}` has no key")))?;
        Ok(shortcut)
    }
}

impl fmt::Display for Shortcut {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.ctrl {
            f.write_str("Ctrl+")?;
        }
        if self.alt {
            f.write_str("Alt+")?;
        }
        if self.shift {
            f.write_str("Shift+")?;
        }
        match self.key {
            Key::Space => f.write_str("Space"),
            Key::Escape => f.write_str("Escape"),
            Key::Char(c) => write!(f, "{}", c.to_ascii_uppercase()),
        }
    }
}

pub struct VoiceControlPresenter {
    controller: VoiceSessionController,
}

impl VoiceControlPresenter {
    pub fn new(controller: VoiceSessionController) -> Self {
        Self { controller }
    }

    pub fn controller(&self) -> &VoiceSessionController {
        &self.controller
    }

    pub fn affordance(&self) -> Affordance {
        Affordance::for_state(&self.controller.state())
    }

    /// Affordance per state transition, current one first.
    pub fn affordances(&self) -> impl Stream<Item = Affordance> {
        tokio_stream::wrappers::UnboundedReceiverStream::new(self.controller.subscribe_state())
            .map(|state| Affordance::for_state(&state))
    }

    pub fn dispatch(&self, intent: Intent) -> VoiceResult<()> {
        match intent {
            Intent::ToggleRecording => self.controller.toggle_recording(),
            Intent::Cancel => {
                match self.controller.phase() {
                    Phase::Recording => self.controller.stop_recording(),
                    Phase::Error(_) => self.controller.clear_error(),
                    Phase::Idle | Phase::Processing => {}
                }
                Ok(())
            }
            Intent::DismissError => {
                self.controller.clear_error();
                Ok(())
            }
        }
    }

    /// `None` when the chord is not bound.
    pub fn handle_shortcut(&self, shortcut: &Shortcut) -> Option<VoiceResult<()>> {
        shortcut.intent().map(|intent| self.dispatch(intent))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::SessionFault;
    use crate::error::RecognitionErrorKind;

    fn state(phase: Phase) -> VoiceSessionState {
        VoiceSessionState {
            phase,
            supported: true,
        }
    }

    #[test]
    fn affordance_follows_phase() {
        let idle = Affordance::for_state(&state(Phase::Idle));
        assert_eq!(idle.icon, Icon::Microphone);
        assert!(idle.enabled && !idle.pressed);

        let recording = Affordance::for_state(&state(Phase::Recording));
        assert_eq!(recording.icon, Icon::Stop);
        assert!(recording.pressed);

        let busy = Affordance::for_state(&state(Phase::Processing));
        assert!(!busy.enabled);

        let failed = Affordance::for_state(&state(Phase::Error(SessionFault::Recognition(
            RecognitionErrorKind::NoSpeech,
        ))));
        assert_eq!(failed.icon, Icon::Warning);
        assert_eq!(failed.tooltip, "No speech detected. Try again.");
    }

    #[test]
    fn unsupported_host_disables_the_control() {
        let affordance = Affordance::for_state(&VoiceSessionState {
            phase: Phase::Idle,
            supported: false,
        });
        assert_eq!(affordance.icon, Icon::MicrophoneOff);
        assert!(!affordance.enabled);
    }

    #[test]
    fn shortcuts_parse_and_map_to_intents() {
        let toggle: Shortcut = "ctrl+space".parse().unwrap();
        assert_eq!(toggle, Shortcut::ctrl(Key::Space));
        assert_eq!(toggle.intent(), Some(Intent::ToggleRecording));
        assert_eq!(
            "Ctrl+M".parse::<Shortcut>().unwrap().intent(),
            Some(Intent::ToggleRecording)
        );
        assert_eq!(
            "Escape".parse::<Shortcut>().unwrap().intent(),
            Some(Intent::Cancel)
        );
        assert_eq!("ctrl+shift+space".parse::<Shortcut>().unwrap().intent(), None);
        assert_eq!("space".parse::<Shortcut>().unwrap().intent(), None);
        assert!("ctrl+".parse::<Shortcut>().is_err());
        assert!("ctrl+pagedown".parse::<Shortcut>().is_err());
        assert_eq!(Shortcut::ctrl(Key::Char('m')).to_string(), "Ctrl+M");
    }
}
