//! **VoiceSessionController**: the session state machine.
//!
//! ```text
//!            start_recording                 final / ended / stop
//!   Idle ───────────────────► Recording ───────────────────────────► Idle
//!    ▲ ▲                          │ errored
//!    │ │  timeout / clear_error   ▼
//!    │ └──────────────────── Error(reason) ◄── synthesis / backend failure
//!    │                                                 ▲
//!    └──── done ──── Processing ◄── speak / converse ──┘ (Error exits via Idle)
//! ```
//!
//! Public calls are synchronous and never block: they validate, reject
//! locally (`Unsupported`, `AlreadyActive`, `Busy`) or kick off work whose
//! outcome arrives later on the published streams. Recognition events are
//! consumed by a single pump task in the order the adapter produced them.

use crate::capabilities::{Primitive, VoiceCapabilities};
use crate::conversation::ConversationBackend;
use crate::error::{RecognitionErrorKind, VoiceError, VoiceResult};
use crate::level::{AudioLevelMonitor, LevelSource};
use crate::observe::{lock, EventBus, Observable};
use crate::recognition::{
    AttemptId, NativeRecognizer, RecognitionAdapter, RecognitionEvent, RecognitionEventKind,
};
use crate::settings::{SynthesisSettings, VoiceConfig, VoiceSettings};
use crate::synthesis::{NativeSynthesizer, SynthesisAdapter, VoiceInfo};
use crate::transcript::{AcceptancePolicy, AcceptedTranscript, TranscriptionResult};
use chrono::Utc;
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, Mutex, Weak};
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Why the session is in its `Error` phase.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum SessionFault {
    Recognition(RecognitionErrorKind),
    SynthesisFailed(String),
    BackendFailed(String),
}

impl SessionFault {
    pub fn describe(&self) -> String {
        match self {
            SessionFault::Recognition(kind) => kind.describe().to_string(),
            SessionFault::SynthesisFailed(_) => "Could not play the response.".to_string(),
            SessionFault::BackendFailed(_) => "The assistant did not respond.".to_string(),
        }
    }
}

impl fmt::Display for SessionFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionFault::Recognition(kind) => write!(f, "{kind}"),
            SessionFault::SynthesisFailed(_) => f.write_str("synthesis-failed"),
            SessionFault::BackendFailed(_) => f.write_str("backend-failed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "phase", content = "reason", rename_all = "snake_case")]
pub enum Phase {
    Idle,
    Recording,
    Processing,
    Error(SessionFault),
}

impl Phase {
    pub fn is_recording(&self) -> bool {
        matches!(self, Phase::Recording)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Phase::Error(_))
    }
}

/// The session's single source of truth; all UI state derives from it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VoiceSessionState {
    pub phase: Phase,
    /// Whether recognition exists on this host at all.
    pub supported: bool,
}

/// Error surfaced to the UI layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorNotice {
    pub error: VoiceError,
    pub message: String,
    /// Transient notices clear with the error window; persistent ones (missing
    /// capabilities) cannot heal within the session.
    pub transient: bool,
}

/// Reply produced by a `converse` round-trip.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssistantReply {
    pub request: String,
    pub reply: String,
}

/// Point-in-time report of the whole voice stack.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VoiceStatus {
    pub capabilities: VoiceCapabilities,
    pub state: VoiceSessionState,
    pub recognizer_active: bool,
    pub synthesizer_busy: bool,
    pub voices: usize,
}

/// Native collaborators handed to the controller. The controller owns them
/// for its whole lifetime; nothing else may drive them.
pub struct VoiceEngines {
    pub recognizer: Box<dyn NativeRecognizer>,
    pub synthesizer: Arc<dyn NativeSynthesizer>,
    pub level_source: Option<Arc<dyn LevelSource>>,
    pub backend: Option<Arc<dyn ConversationBackend>>,
}

struct ActiveAttempt {
    id: AttemptId,
    language: String,
    stop_requested: bool,
    started_at: Instant,
}

struct Inner {
    recognition: RecognitionAdapter,
    level: AudioLevelMonitor,
    attempt: Option<ActiveAttempt>,
    latest_partial: Option<TranscriptionResult>,
    error_epoch: u64,
    recovery: Option<JoinHandle<()>>,
    work_epoch: u64,
    work: Option<JoinHandle<()>>,
    pump: Option<JoinHandle<()>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        for task in [self.pump.take(), self.recovery.take(), self.work.take()]
            .into_iter()
            .flatten()
        {
            task.abort();
        }
        self.recognition.stop();
        self.level.stop();
    }
}

struct Shared {
    this: Weak<Shared>,
    config: VoiceConfig,
    capabilities: VoiceCapabilities,
    policy: AcceptancePolicy,
    state: Observable<VoiceSessionState>,
    level: Arc<Observable<f32>>,
    transcripts: EventBus<TranscriptionResult>,
    accepted: EventBus<AcceptedTranscript>,
    errors: EventBus<ErrorNotice>,
    replies: EventBus<AssistantReply>,
    synthesis: SynthesisAdapter,
    backend: Option<Arc<dyn ConversationBackend>>,
    inner: Mutex<Inner>,
}

/// Cloneable handle to one voice session. Dropping the last handle aborts the
/// session's tasks and silences the native recognizer.
#[derive(Clone)]
pub struct VoiceSessionController {
    shared: Arc<Shared>,
}

impl VoiceSessionController {
    /// Build a controller. Must be called inside a tokio runtime.
    pub fn new(
        config: VoiceConfig,
        capabilities: VoiceCapabilities,
        engines: VoiceEngines,
    ) -> VoiceResult<Self> {
        config.validate()?;
        tokio::runtime::Handle::try_current().map_err(|_| {
            VoiceError::Config("voice session must be created inside a tokio runtime".into())
        })?;

        let recognition = RecognitionAdapter::new(engines.recognizer, &capabilities);
        let events = recognition.subscribe();
        let level_source = engines
            .level_source
            .filter(|_| capabilities.level_metering_available());
        let level = AudioLevelMonitor::new(level_source, config.level_tick(), config.level_smoothing);

        let shared = Arc::new_cyclic(|this| Shared {
            this: this.clone(),
            policy: AcceptancePolicy::new(config.auto_accept_threshold),
            state: Observable::new(VoiceSessionState {
                phase: Phase::Idle,
                supported: capabilities.recognition_available,
            }),
            level: Arc::clone(level.level()),
            transcripts: EventBus::new(),
            accepted: EventBus::new(),
            errors: EventBus::new(),
            replies: EventBus::new(),
            synthesis: SynthesisAdapter::new(engines.synthesizer, &capabilities),
            backend: engines.backend,
            inner: Mutex::new(Inner {
                recognition,
                level,
                attempt: None,
                latest_partial: None,
                error_epoch: 0,
                recovery: None,
                work_epoch: 0,
                work: None,
                pump: None,
            }),
            config,
            capabilities,
        });

        let pump = tokio::spawn(pump_recognition(shared.this.clone(), events));
        lock(&shared.inner).pump = Some(pump);

        if !capabilities.recognition_available {
            warn!("speech recognition unavailable; voice input disabled for this session");
        }
        info!(missing = ?capabilities.missing(), "voice session ready");
        Ok(Self { shared })
    }

    pub fn capabilities(&self) -> VoiceCapabilities {
        self.shared.capabilities
    }

    pub fn config(&self) -> &VoiceConfig {
        &self.shared.config
    }

    pub fn state(&self) -> VoiceSessionState {
        self.shared.state.get()
    }

    pub fn phase(&self) -> Phase {
        self.shared.state.get().phase
    }

    /// State changes in order; the current state is delivered first.
    pub fn subscribe_state(&self) -> mpsc::UnboundedReceiver<VoiceSessionState> {
        self.shared.state.subscribe()
    }

    /// Partial and final transcriptions.
    pub fn subscribe_transcripts(&self) -> mpsc::UnboundedReceiver<TranscriptionResult> {
        self.shared.transcripts.subscribe()
    }

    /// Final text for the chat layer, once per completed attempt.
    pub fn subscribe_accepted(&self) -> mpsc::UnboundedReceiver<AcceptedTranscript> {
        self.shared.accepted.subscribe()
    }

    pub fn subscribe_errors(&self) -> mpsc::UnboundedReceiver<ErrorNotice> {
        self.shared.errors.subscribe()
    }

    pub fn subscribe_replies(&self) -> mpsc::UnboundedReceiver<AssistantReply> {
        self.shared.replies.subscribe()
    }

    /// Input level in `0.0..=1.0`; current value first. Non-zero only while recording.
    pub fn subscribe_audio_level(&self) -> mpsc::UnboundedReceiver<f32> {
        self.shared.level.subscribe()
    }

    pub fn audio_level(&self) -> f32 {
        self.shared.level.get()
    }

    /// Most recent partial of the live attempt (later partials supersede earlier ones).
    pub fn current_partial(&self) -> Option<TranscriptionResult> {
        lock(&self.shared.inner).latest_partial.clone()
    }

    pub fn voices(&self) -> Vec<VoiceInfo> {
        self.shared.synthesis.voices()
    }

    pub fn status(&self) -> VoiceStatus {
        let recognizer_active = lock(&self.shared.inner).recognition.is_active();
        VoiceStatus {
            capabilities: self.shared.capabilities,
            state: self.state(),
            recognizer_active,
            synthesizer_busy: self.shared.synthesis.is_busy(),
            voices: self.voices().len(),
        }
    }

    /// Begin a recording attempt with `settings` (or the configured defaults).
    pub fn start_recording(&self, settings: Option<VoiceSettings>) -> VoiceResult<AttemptId> {
        let shared = &self.shared;
        let settings = settings.unwrap_or_else(|| shared.config.recognition.clone());
        let mut inner = lock(&shared.inner);

        if !shared.capabilities.recognition_available {
            let err = VoiceError::Unsupported(Primitive::Recognition);
            shared.notify(err.clone(), false);
            return Err(err);
        }
        match shared.state.get().phase {
            Phase::Recording => return Err(VoiceError::AlreadyActive),
            Phase::Processing => return Err(VoiceError::Busy),
            Phase::Idle | Phase::Error(_) => {}
        }
        if inner.recognition.is_active() {
            return Err(VoiceError::AlreadyActive);
        }

        let id = match inner.recognition.start(&settings) {
            Ok(id) => id,
            Err(VoiceError::RecognitionFailed(kind)) => {
                shared.enter_error(
                    &mut inner,
                    SessionFault::Recognition(kind.clone()),
                    VoiceError::RecognitionFailed(kind.clone()),
                );
                return Err(VoiceError::RecognitionFailed(kind));
            }
            Err(err) => return Err(err),
        };

        shared.leave_error(&mut inner);
        inner.latest_partial = None;
        inner.attempt = Some(ActiveAttempt {
            id,
            language: settings.language.clone(),
            stop_requested: false,
            started_at: Instant::now(),
        });
        shared.set_phase(Phase::Recording);
        inner.level.start();
        Ok(id)
    }

    /// Cancel the live attempt. No-op outside `Recording`.
    ///
    /// Events the engine produced before this call are still processed in
    /// order, so a final or error already in flight settles the attempt as
    /// usual; otherwise the attempt settles to `Idle` without a result.
    pub fn stop_recording(&self) {
        let mut inner = lock(&self.shared.inner);
        if !self.shared.state.get().phase.is_recording() {
            return;
        }
        match inner.attempt.as_mut() {
            Some(attempt) if !attempt.stop_requested => {
                attempt.stop_requested = true;
                info!(attempt = %attempt.id, "stop requested");
            }
            _ => return,
        }
        inner.recognition.stop();
    }

    /// Start when idle, stop when recording.
    pub fn toggle_recording(&self) -> VoiceResult<()> {
        if self.phase().is_recording() {
            self.stop_recording();
            Ok(())
        } else {
            self.start_recording(None).map(|_| ())
        }
    }

    /// Dismiss the current error early. No-op outside `Error`.
    pub fn clear_error(&self) {
        let mut inner = lock(&self.shared.inner);
        if self.shared.state.get().phase.is_error() {
            self.shared.cancel_recovery(&mut inner);
            self.shared.set_phase(Phase::Idle);
        }
    }

    /// Speak `text`. The session is `Processing` until the engine finishes.
    pub fn speak(&self, text: &str, settings: Option<SynthesisSettings>) -> VoiceResult<()> {
        let shared = &self.shared;
        let settings = settings.unwrap_or_else(|| shared.config.synthesis.clone());
        let mut inner = lock(&shared.inner);
        shared.ensure_free()?;

        let task = match shared.synthesis.speak(text, &settings) {
            Ok(task) => task,
            Err(err) => {
                if matches!(err, VoiceError::Unsupported(_)) {
                    shared.notify(err.clone(), false);
                }
                return Err(err);
            }
        };

        let ticket = shared.begin_work(&mut inner);
        let weak = Arc::downgrade(&self.shared);
        inner.work = Some(tokio::spawn(async move {
            let outcome = task.await.map_err(synthesis_fault);
            if let Some(shared) = weak.upgrade() {
                shared.settle_work(ticket, outcome);
            }
        }));
        Ok(())
    }

    /// Send `text` to the conversation backend and speak the reply.
    pub fn converse(&self, text: &str) -> VoiceResult<()> {
        let shared = &self.shared;
        let backend = shared
            .backend
            .clone()
            .ok_or_else(|| VoiceError::Config("no conversation backend configured".into()))?;
        let request = text.trim().to_string();
        if request.is_empty() {
            return Err(VoiceError::InvalidSettings("nothing to send".into()));
        }
        let mut inner = lock(&shared.inner);
        shared.ensure_free()?;

        let ticket = shared.begin_work(&mut inner);
        let weak = Arc::downgrade(&self.shared);
        inner.work = Some(tokio::spawn(async move {
            let reply = backend.reply(&request).await;
            let Some(shared) = weak.upgrade() else {
                return;
            };
            let reply = match reply {
                Ok(reply) => reply,
                Err(e) => {
                    warn!(error = %e, "conversation backend failed");
                    let err = VoiceError::BackendFailed(e.clone());
                    shared.settle_work(ticket, Err((SessionFault::BackendFailed(e), err)));
                    return;
                }
            };
            shared.replies.publish(AssistantReply {
                request,
                reply: reply.clone(),
            });

            if !shared.capabilities.synthesis_available || reply.trim().is_empty() {
                shared.settle_work(ticket, Ok(()));
                return;
            }
            let speech = shared.synthesis.speak(&reply, &shared.config.synthesis);
            drop(shared);

            let outcome = match speech {
                Ok(task) => task.await,
                Err(err) => Err(err),
            }
            .map_err(synthesis_fault);
            if let Some(shared) = weak.upgrade() {
                shared.settle_work(ticket, outcome);
            }
        }));
        Ok(())
    }
}

impl Shared {
    fn set_phase(&self, phase: Phase) {
        let previous = self.state.get().phase;
        info!(from = ?previous, to = ?phase, "voice phase changed");
        self.state.publish(VoiceSessionState {
            phase,
            supported: self.capabilities.recognition_available,
        });
    }

    fn notify(&self, error: VoiceError, transient: bool) {
        let message = match &error {
            VoiceError::Unsupported(primitive) => {
                format!("Voice features are not available: no {primitive}.")
            }
            VoiceError::RecognitionFailed(kind) => kind.describe().to_string(),
            other => other.to_string(),
        };
        self.errors.publish(ErrorNotice {
            error,
            message,
            transient,
        });
    }

    fn ensure_free(&self) -> VoiceResult<()> {
        match self.state.get().phase {
            Phase::Recording | Phase::Processing => Err(VoiceError::Busy),
            Phase::Idle | Phase::Error(_) => Ok(()),
        }
    }

    fn begin_work(&self, inner: &mut Inner) -> u64 {
        self.leave_error(inner);
        inner.work_epoch += 1;
        self.set_phase(Phase::Processing);
        inner.work_epoch
    }

    fn settle_work(&self, ticket: u64, outcome: Result<(), (SessionFault, VoiceError)>) {
        let mut inner = lock(&self.inner);
        if inner.work_epoch != ticket || self.state.get().phase != Phase::Processing {
            debug!(ticket, "stale work outcome ignored");
            return;
        }
        inner.work = None;
        match outcome {
            Ok(()) => self.set_phase(Phase::Idle),
            Err((fault, error)) => self.enter_error(&mut inner, fault, error),
        }
    }

    fn enter_error(&self, inner: &mut Inner, fault: SessionFault, error: VoiceError) {
        self.cancel_recovery(inner);
        inner.error_epoch += 1;
        let epoch = inner.error_epoch;
        self.set_phase(Phase::Error(fault));
        self.notify(error, true);

        let window = self.config.error_display_window();
        let weak = self.this.clone();
        inner.recovery = Some(tokio::spawn(async move {
            tokio::time::sleep(window).await;
            if let Some(shared) = weak.upgrade() {
                shared.recover(epoch);
            }
        }));
    }

    fn recover(&self, epoch: u64) {
        let mut inner = lock(&self.inner);
        if inner.error_epoch != epoch || !self.state.get().phase.is_error() {
            return;
        }
        inner.recovery = None;
        info!("error window elapsed");
        self.set_phase(Phase::Idle);
    }

    /// `Error` only ever exits to `Idle`; callers move on from there.
    fn leave_error(&self, inner: &mut Inner) {
        self.cancel_recovery(inner);
        if self.state.get().phase.is_error() {
            self.set_phase(Phase::Idle);
        }
    }

    fn cancel_recovery(&self, inner: &mut Inner) {
        inner.error_epoch += 1;
        if let Some(task) = inner.recovery.take() {
            task.abort();
        }
    }

    /// Leave `Recording`: silence the engine, drop the meter to 0.
    fn finish_attempt(&self, inner: &mut Inner) -> Option<ActiveAttempt> {
        inner.recognition.stop();
        inner.level.stop();
        inner.latest_partial = None;
        inner.attempt.take()
    }

    fn on_recognition_event(&self, event: RecognitionEvent) {
        let mut inner = lock(&self.inner);
        let Some(attempt) = inner.attempt.as_ref().filter(|a| a.id == event.attempt) else {
            debug!(attempt = %event.attempt, kind = ?event.kind, "event for settled attempt dropped");
            return;
        };
        let stop_requested = attempt.stop_requested;
        let language = attempt.language.clone();

        match event.kind {
            RecognitionEventKind::Started => {
                debug!(attempt = %event.attempt, "native recognition started");
            }
            RecognitionEventKind::Partial { text, confidence } => {
                if stop_requested {
                    return;
                }
                let result = TranscriptionResult {
                    text,
                    confidence,
                    is_final: false,
                    language,
                    attempt: event.attempt,
                    received_at: Utc::now(),
                };
                inner.latest_partial = Some(result.clone());
                self.transcripts.publish(result);
            }
            RecognitionEventKind::Final { text, confidence } => {
                let result = TranscriptionResult {
                    text,
                    confidence,
                    is_final: true,
                    language,
                    attempt: event.attempt,
                    received_at: Utc::now(),
                };
                let finished = self.finish_attempt(&mut inner);
                info!(
                    attempt = %event.attempt,
                    confidence,
                    elapsed_ms = finished.map(|a| a.started_at.elapsed().as_millis() as u64),
                    "final transcription"
                );
                self.transcripts.publish(result.clone());
                if let Some(accepted) = self.policy.accept(&result) {
                    self.accepted.publish(accepted);
                }
                self.set_phase(Phase::Idle);
            }
            RecognitionEventKind::Errored(kind) => {
                // The gate is closed by a stop, so this was reported before it.
                self.finish_attempt(&mut inner);
                self.enter_error(
                    &mut inner,
                    SessionFault::Recognition(kind.clone()),
                    VoiceError::RecognitionFailed(kind),
                );
            }
            RecognitionEventKind::Ended => {
                self.finish_attempt(&mut inner);
                if stop_requested {
                    info!(attempt = %event.attempt, "recording cancelled");
                } else {
                    info!(attempt = %event.attempt, "recognition ended without a result");
                }
                self.set_phase(Phase::Idle);
            }
        }
    }
}

fn synthesis_fault(err: VoiceError) -> (SessionFault, VoiceError) {
    let detail = match &err {
        VoiceError::SynthesisFailed(message) => message.clone(),
        other => other.to_string(),
    };
    (SessionFault::SynthesisFailed(detail), err)
}

/// Drain adapter events in order. Holds only a weak handle so the session can
/// be dropped while the pump is parked on `recv`.
async fn pump_recognition(
    shared: Weak<Shared>,
    mut events: mpsc::UnboundedReceiver<RecognitionEvent>,
) {
    while let Some(event) = events.recv().await {
        let Some(shared) = shared.upgrade() else {
            break;
        };
        shared.on_recognition_event(event);
    }
    debug!("recognition pump exited");
}
