//! **RecognitionAdapter**: one native recognizer, normalized events.
//!
//! The native engine pushes raw callbacks into a [`NativeSink`]. The sink
//! normalizes them per attempt and republishes typed events on the adapter's
//! internal [`EventBus`], which consumers subscribe to once:
//!
//! ```text
//! native ──► NativeSink (per-attempt gate) ──► EventBus ──► controller
//!            started? partial* (final | errored)? ended
//! ```
//!
//! Guarantees per attempt: at most one `Final`, first of `Final`/`Errored`
//! wins, `Ended` exactly once (synthesized by `stop()` when the engine never
//! sends it), nothing after the gate closes.

use crate::capabilities::{Primitive, VoiceCapabilities};
use crate::error::{RecognitionErrorKind, VoiceError, VoiceResult};
use crate::observe::{lock, EventBus};
use crate::settings::VoiceSettings;
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Identifies one recording attempt of one adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct AttemptId(pub u64);

impl fmt::Display for AttemptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One hypothesis reported by the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct Alternative {
    pub transcript: String,
    pub confidence: f32,
}

impl Alternative {
    pub fn new(transcript: impl Into<String>, confidence: f32) -> Self {
        Self {
            transcript: transcript.into(),
            confidence,
        }
    }
}

/// Raw callback from the native recognizer, in the order the engine produced it.
#[derive(Debug, Clone, PartialEq)]
pub enum NativeRecognitionEvent {
    Start,
    Result {
        alternatives: Vec<Alternative>,
        is_final: bool,
    },
    Error {
        code: String,
    },
    End,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecognitionEventKind {
    Started,
    Partial { text: String, confidence: f32 },
    Final { text: String, confidence: f32 },
    Errored(RecognitionErrorKind),
    Ended,
}

/// Normalized event, tagged with the attempt that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct RecognitionEvent {
    pub attempt: AttemptId,
    pub kind: RecognitionEventKind,
}

/// The platform recognition primitive.
///
/// `start` begins one native session that reports through `sink`;
/// `abort` silences it without waiting for a result. Engines may keep
/// emitting after `abort`; the sink discards it.
pub trait NativeRecognizer: Send {
    fn start(&mut self, settings: &VoiceSettings, sink: NativeSink)
        -> Result<(), RecognitionErrorKind>;

    fn abort(&mut self);
}

#[derive(Debug, Default)]
struct AttemptState {
    open: bool,
    started: bool,
    settled: bool,
    ended: bool,
    segments: Vec<(String, f32)>,
}

struct AttemptGate {
    id: AttemptId,
    settings: VoiceSettings,
    state: Mutex<AttemptState>,
    bus: Arc<EventBus<RecognitionEvent>>,
}

impl AttemptGate {
    fn publish(&self, kind: RecognitionEventKind) {
        self.bus.publish(RecognitionEvent {
            attempt: self.id,
            kind,
        });
    }

    fn is_open(&self) -> bool {
        lock(&self.state).open
    }

    /// Close the gate; emits `Ended` if the engine has not. Returns whether it was open.
    fn close(&self) -> bool {
        let mut state = lock(&self.state);
        if !state.open {
            return false;
        }
        state.open = false;
        if !state.ended {
            state.ended = true;
            self.publish(RecognitionEventKind::Ended);
        }
        true
    }

    fn continuous_text(segments: &[(String, f32)], tail: Option<&str>) -> String {
        segments
            .iter()
            .map(|(text, _)| text.as_str())
            .chain(tail)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn continuous_confidence(segments: &[(String, f32)]) -> f32 {
        if segments.is_empty() {
            return 0.0;
        }
        segments.iter().map(|(_, c)| *c).sum::<f32>() / segments.len() as f32
    }

    fn handle(&self, event: NativeRecognitionEvent) {
        let mut state = lock(&self.state);
        if !state.open {
            debug!(attempt = %self.id, ?event, "recognition event after stop dropped");
            return;
        }

        match event {
            NativeRecognitionEvent::Start => {
                if !state.started {
                    state.started = true;
                    self.publish(RecognitionEventKind::Started);
                }
            }
            NativeRecognitionEvent::Result {
                alternatives,
                is_final,
            } => {
                if state.settled {
                    debug!(attempt = %self.id, "result after settle dropped");
                    return;
                }
                let Some(best) =
                    best_alternative(&alternatives, self.settings.max_alternatives as usize)
                else {
                    return;
                };
                if !state.started {
                    state.started = true;
                    self.publish(RecognitionEventKind::Started);
                }

                if self.settings.continuous {
                    if is_final {
                        state.segments.push((best.transcript.clone(), best.confidence));
                    }
                    if self.settings.interim_results {
                        let tail = (!is_final).then_some(best.transcript.as_str());
                        let text = Self::continuous_text(&state.segments, tail);
                        self.publish(RecognitionEventKind::Partial {
                            text,
                            confidence: best.confidence,
                        });
                    }
                } else if is_final {
                    state.settled = true;
                    self.publish(RecognitionEventKind::Final {
                        text: best.transcript,
                        confidence: best.confidence,
                    });
                } else if self.settings.interim_results {
                    self.publish(RecognitionEventKind::Partial {
                        text: best.transcript,
                        confidence: best.confidence,
                    });
                }
            }
            NativeRecognitionEvent::Error { code } => {
                if state.settled {
                    debug!(attempt = %self.id, %code, "error after settle dropped");
                    return;
                }
                state.settled = true;
                let kind = RecognitionErrorKind::from_code(&code);
                warn!(attempt = %self.id, error = %kind, "native recognizer reported an error");
                self.publish(RecognitionEventKind::Errored(kind));
            }
            NativeRecognitionEvent::End => {
                if !state.settled && !state.segments.is_empty() {
                    state.settled = true;
                    let text = Self::continuous_text(&state.segments, None);
                    let confidence = Self::continuous_confidence(&state.segments);
                    self.publish(RecognitionEventKind::Final { text, confidence });
                }
                state.ended = true;
                state.open = false;
                self.publish(RecognitionEventKind::Ended);
            }
        }
    }
}

/// Highest-confidence hypothesis among the first `max` reported. Confidence is clamped to 0..=1.
fn best_alternative(alternatives: &[Alternative], max: usize) -> Option<Alternative> {
    alternatives
        .iter()
        .take(max.max(1))
        .map(|alt| Alternative {
            transcript: alt.transcript.clone(),
            confidence: clamp_unit(alt.confidence),
        })
        .fold(None, |best: Option<Alternative>, alt| match best {
            Some(b) if b.confidence >= alt.confidence => Some(b),
            _ => Some(alt),
        })
}

/// Clamp into `0.0..=1.0`; NaN reads as 0.
pub(crate) fn clamp_unit(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Handle the native engine reports into. Cheap to clone; bound to one attempt.
#[derive(Clone)]
pub struct NativeSink {
    gate: Arc<AttemptGate>,
}

impl NativeSink {
    pub fn emit(&self, event: NativeRecognitionEvent) {
        self.gate.handle(event);
    }

    pub fn attempt(&self) -> AttemptId {
        self.gate.id
    }

    /// Whether the attempt still accepts events.
    pub fn is_open(&self) -> bool {
        self.gate.is_open()
    }
}

/// Owns exactly one native recognizer and its attempts.
pub struct RecognitionAdapter {
    native: Box<dyn NativeRecognizer>,
    available: bool,
    bus: Arc<EventBus<RecognitionEvent>>,
    current: Option<Arc<AttemptGate>>,
    next_attempt: u64,
}

impl RecognitionAdapter {
    pub fn new(native: Box<dyn NativeRecognizer>, capabilities: &VoiceCapabilities) -> Self {
        Self {
            native,
            available: capabilities.recognition_available,
            bus: Arc::new(EventBus::new()),
            current: None,
            next_attempt: 1,
        }
    }

    /// Normalized events of every attempt, in native order.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<RecognitionEvent> {
        self.bus.subscribe()
    }

    pub fn is_active(&self) -> bool {
        self.current.as_ref().is_some_and(|gate| gate.is_open())
    }

    /// Begin one native attempt.
    pub fn start(&mut self, settings: &VoiceSettings) -> VoiceResult<AttemptId> {
        if !self.available {
            return Err(VoiceError::Unsupported(Primitive::Recognition));
        }
        if self.is_active() {
            return Err(VoiceError::AlreadyActive);
        }
        settings.validate()?;

        let id = AttemptId(self.next_attempt);
        self.next_attempt += 1;

        let gate = Arc::new(AttemptGate {
            id,
            settings: settings.clone(),
            state: Mutex::new(AttemptState {
                open: true,
                ..Default::default()
            }),
            bus: Arc::clone(&self.bus),
        });
        let sink = NativeSink {
            gate: Arc::clone(&gate),
        };

        if let Err(kind) = self.native.start(settings, sink) {
            // The gate never carried events; close it silently.
            lock(&gate.state).open = false;
            warn!(attempt = %id, error = %kind, "native recognizer refused to start");
            return Err(VoiceError::RecognitionFailed(kind));
        }

        info!(attempt = %id, language = %settings.language, continuous = settings.continuous, "recognition attempt started");
        self.current = Some(gate);
        Ok(id)
    }

    /// Silence the current attempt. Idempotent.
    pub fn stop(&mut self) {
        let Some(gate) = self.current.take() else {
            return;
        };
        let was_open = gate.close();
        if was_open {
            // Gate is closed first so anything the engine emits while aborting is dropped.
            self.native.abort();
            info!(attempt = %gate.id, "recognition attempt stopped");
        }
    }
}

impl Drop for RecognitionAdapter {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulated::ManualRecognizer;

    fn adapter() -> (RecognitionAdapter, ManualRecognizer) {
        let native = ManualRecognizer::new();
        let handle = native.clone();
        (
            RecognitionAdapter::new(Box::new(native), &VoiceCapabilities::all()),
            handle,
        )
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<RecognitionEvent>) -> Vec<RecognitionEventKind> {
        std::iter::from_fn(|| rx.try_recv().ok()).map(|e| e.kind).collect()
    }

    fn result(text: &str, confidence: f32, is_final: bool) -> NativeRecognitionEvent {
        NativeRecognitionEvent::Result {
            alternatives: vec![Alternative::new(text, confidence)],
            is_final,
        }
    }

    #[test]
    fn unsupported_host_rejects_start() {
        let caps = VoiceCapabilities {
            recognition_available: false,
            ..VoiceCapabilities::all()
        };
        let mut adapter = RecognitionAdapter::new(Box::new(ManualRecognizer::new()), &caps);
        assert_eq!(
            adapter.start(&VoiceSettings::default()),
            Err(VoiceError::Unsupported(Primitive::Recognition))
        );
    }

    #[test]
    fn second_start_is_already_active() {
        let (mut adapter, _native) = adapter();
        adapter.start(&VoiceSettings::default()).unwrap();
        assert_eq!(
            adapter.start(&VoiceSettings::default()),
            Err(VoiceError::AlreadyActive)
        );
    }

    #[test]
    fn normal_attempt_sequence() {
        let (mut adapter, native) = adapter();
        let mut rx = adapter.subscribe();
        adapter.start(&VoiceSettings::default()).unwrap();

        native.emit(NativeRecognitionEvent::Start);
        native.emit(result("wea", 0.4, false));
        native.emit(result("weather today", 0.91, true));
        native.emit(result("weather today again", 0.95, true));
        native.emit(NativeRecognitionEvent::End);

        assert_eq!(
            drain(&mut rx),
            vec![
                RecognitionEventKind::Started,
                RecognitionEventKind::Partial {
                    text: "wea".into(),
                    confidence: 0.4
                },
                RecognitionEventKind::Final {
                    text: "weather today".into(),
                    confidence: 0.91
                },
                RecognitionEventKind::Ended,
            ]
        );
        assert!(!adapter.is_active());
    }

    #[test]
    fn error_after_final_is_discarded() {
        let (mut adapter, native) = adapter();
        let mut rx = adapter.subscribe();
        adapter.start(&VoiceSettings::default()).unwrap();

        native.emit(result("hello", 0.9, true));
        native.emit(NativeRecognitionEvent::Error {
            code: "network".into(),
        });

        let events = drain(&mut rx);
        assert!(events
            .iter()
            .all(|e| !matches!(e, RecognitionEventKind::Errored(_))));
    }

    #[test]
    fn stop_emits_ended_once_and_silences_engine() {
        let (mut adapter, native) = adapter();
        let mut rx = adapter.subscribe();
        adapter.start(&VoiceSettings::default()).unwrap();
        native.emit(NativeRecognitionEvent::Start);

        adapter.stop();
        adapter.stop();
        native.emit(result("late", 0.9, true));
        native.emit(NativeRecognitionEvent::End);

        assert_eq!(
            drain(&mut rx),
            vec![RecognitionEventKind::Started, RecognitionEventKind::Ended]
        );
        assert_eq!(native.abort_count(), 1);
    }

    #[test]
    fn ended_follows_error_even_without_native_end() {
        let (mut adapter, native) = adapter();
        let mut rx = adapter.subscribe();
        adapter.start(&VoiceSettings::default()).unwrap();
        native.emit(NativeRecognitionEvent::Error {
            code: "no-speech".into(),
        });
        adapter.stop();

        assert_eq!(
            drain(&mut rx),
            vec![
                RecognitionEventKind::Errored(RecognitionErrorKind::NoSpeech),
                RecognitionEventKind::Ended
            ]
        );
    }

    #[test]
    fn interim_results_can_be_suppressed() {
        let (mut adapter, native) = adapter();
        let mut rx = adapter.subscribe();
        let settings = VoiceSettings {
            interim_results: false,
            ..Default::default()
        };
        adapter.start(&settings).unwrap();
        native.emit(result("par", 0.3, false));
        native.emit(result("partial", 0.7, true));

        assert_eq!(
            drain(&mut rx),
            vec![
                RecognitionEventKind::Started,
                RecognitionEventKind::Final {
                    text: "partial".into(),
                    confidence: 0.7
                }
            ]
        );
    }

    #[test]
    fn continuous_mode_accumulates_until_engine_ends() {
        let (mut adapter, native) = adapter();
        let mut rx = adapter.subscribe();
        let settings = VoiceSettings {
            continuous: true,
            ..Default::default()
        };
        adapter.start(&settings).unwrap();
        native.emit(result("turn on", 0.75, true));
        native.emit(result("the li", 0.5, false));
        native.emit(result("the lights", 0.25, true));
        native.emit(NativeRecognitionEvent::End);

        let events = drain(&mut rx);
        assert_eq!(
            events[2],
            RecognitionEventKind::Partial {
                text: "turn on the li".into(),
                confidence: 0.5
            }
        );
        assert_eq!(
            events[events.len() - 2],
            RecognitionEventKind::Final {
                text: "turn on the lights".into(),
                confidence: 0.5
            }
        );
        assert_eq!(events.last(), Some(&RecognitionEventKind::Ended));
    }

    #[test]
    fn best_alternative_respects_max_and_clamps() {
        let alternatives = vec![
            Alternative::new("a", 0.5),
            Alternative::new("b", 1.7),
            Alternative::new("c", f32::NAN),
        ];
        assert_eq!(best_alternative(&alternatives, 1).unwrap().transcript, "a");
        let best = best_alternative(&alternatives, 3).unwrap();
        assert_eq!(best.transcript, "b");
        assert_eq!(best.confidence, 1.0);
        assert!(best_alternative(&[], 2).is_none());
    }

    #[test]
    fn refused_start_leaves_adapter_idle() {
        let (mut adapter, native) = adapter();
        native.refuse_next_start(RecognitionErrorKind::NotAllowed);
        assert_eq!(
            adapter.start(&VoiceSettings::default()),
            Err(VoiceError::RecognitionFailed(RecognitionErrorKind::NotAllowed))
        );
        assert!(!adapter.is_active());
        assert!(adapter.start(&VoiceSettings::default()).is_ok());
    }
}
