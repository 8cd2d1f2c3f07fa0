//! Simulated native engines for tests, demos and hosts without a speech stack.
//!
//! - [`ManualRecognizer`]: the caller pushes native events by hand.
//! - [`ScriptedRecognizer`]: replays queued scripts with delays on the runtime.
//! - [`ScriptedSynthesizer`]: "speaks" for a fixed duration, optionally failing.
//! - [`FixedLevel`] / [`OscillatingLevel`]: level sources.

use crate::error::RecognitionErrorKind;
use crate::level::LevelSource;
use crate::observe::lock;
use crate::recognition::{
    Alternative, AttemptId, NativeRecognitionEvent, NativeRecognizer, NativeSink,
};
use crate::settings::VoiceSettings;
use crate::synthesis::{NativeSynthesizer, Utterance, VoiceInfo};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

#[derive(Default)]
struct ManualState {
    sink: Option<NativeSink>,
    starts: usize,
    aborts: usize,
    refuse: Option<RecognitionErrorKind>,
    last_settings: Option<VoiceSettings>,
}

/// Recognizer driven by hand. Clones share state, so keep one clone to emit
/// events after handing the other to the adapter.
#[derive(Clone, Default)]
pub struct ManualRecognizer {
    inner: Arc<Mutex<ManualState>>,
}

impl ManualRecognizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Emit into the most recent attempt. Ignored before the first start.
    pub fn emit(&self, event: NativeRecognitionEvent) {
        let sink = lock(&self.inner).sink.clone();
        if let Some(sink) = sink {
            sink.emit(event);
        }
    }

    pub fn partial(&self, text: &str, confidence: f32) {
        self.emit(NativeRecognitionEvent::Result {
            alternatives: vec![Alternative::new(text, confidence)],
            is_final: false,
        });
    }

    pub fn final_result(&self, text: &str, confidence: f32) {
        self.emit(NativeRecognitionEvent::Result {
            alternatives: vec![Alternative::new(text, confidence)],
            is_final: true,
        });
    }

    pub fn error(&self, code: &str) {
        self.emit(NativeRecognitionEvent::Error {
            code: code.to_string(),
        });
    }

    pub fn refuse_next_start(&self, kind: RecognitionErrorKind) {
        lock(&self.inner).refuse = Some(kind);
    }

    pub fn start_count(&self) -> usize {
        lock(&self.inner).starts
    }

    pub fn abort_count(&self) -> usize {
        lock(&self.inner).aborts
    }

    pub fn last_settings(&self) -> Option<VoiceSettings> {
        lock(&self.inner).last_settings.clone()
    }

    pub fn current_attempt(&self) -> Option<AttemptId> {
        lock(&self.inner).sink.as_ref().map(NativeSink::attempt)
    }
}

impl NativeRecognizer for ManualRecognizer {
    fn start(
        &mut self,
        settings: &VoiceSettings,
        sink: NativeSink,
    ) -> Result<(), RecognitionErrorKind> {
        let mut state = lock(&self.inner);
        if let Some(kind) = state.refuse.take() {
            return Err(kind);
        }
        state.starts += 1;
        state.last_settings = Some(settings.clone());
        state.sink = Some(sink);
        Ok(())
    }

    fn abort(&mut self) {
        let sink = {
            let mut state = lock(&self.inner);
            state.aborts += 1;
            state.sink.clone()
        };
        // Platforms report an abort as an error followed by end.
        if let Some(sink) = sink {
            sink.emit(NativeRecognitionEvent::Error {
                code: "aborted".into(),
            });
            sink.emit(NativeRecognitionEvent::End);
        }
    }
}

/// One timed step of a recognition script.
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptStep {
    pub delay: Duration,
    pub event: NativeRecognitionEvent,
}

impl ScriptStep {
    pub fn new(delay: Duration, event: NativeRecognitionEvent) -> Self {
        Self { delay, event }
    }
}

/// Script that "hears" `text` word by word: partial prefixes, then a final, then end.
pub fn utterance_script(text: &str, confidence: f32, step: Duration) -> Vec<ScriptStep> {
    let words: Vec<&str> = text.split_whitespace().collect();
    let mut steps = vec![ScriptStep::new(Duration::ZERO, NativeRecognitionEvent::Start)];
    for n in 1..words.len() {
        let partial_confidence = confidence * n as f32 / words.len() as f32;
        steps.push(ScriptStep::new(
            step,
            NativeRecognitionEvent::Result {
                alternatives: vec![Alternative::new(words[..n].join(" "), partial_confidence)],
                is_final: false,
            },
        ));
    }
    steps.push(ScriptStep::new(
        step,
        NativeRecognitionEvent::Result {
            alternatives: vec![Alternative::new(words.join(" "), confidence)],
            is_final: true,
        },
    ));
    steps.push(ScriptStep::new(Duration::ZERO, NativeRecognitionEvent::End));
    steps
}

/// Script that hears nothing and gives up with `no-speech` after `wait`.
pub fn silence_script(wait: Duration) -> Vec<ScriptStep> {
    vec![
        ScriptStep::new(Duration::ZERO, NativeRecognitionEvent::Start),
        ScriptStep::new(
            wait,
            NativeRecognitionEvent::Error {
                code: "no-speech".into(),
            },
        ),
        ScriptStep::new(Duration::ZERO, NativeRecognitionEvent::End),
    ]
}

/// Recognizer that replays one queued script per attempt on the tokio runtime.
/// With an empty queue the attempt hears silence.
#[derive(Clone)]
pub struct ScriptedRecognizer {
    scripts: Arc<Mutex<VecDeque<Vec<ScriptStep>>>>,
    silence_after: Duration,
    playing: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl ScriptedRecognizer {
    pub fn new(silence_after: Duration) -> Self {
        Self {
            scripts: Arc::new(Mutex::new(VecDeque::new())),
            silence_after,
            playing: Arc::new(Mutex::new(None)),
        }
    }

    /// Queue the script for the next attempt.
    pub fn push_script(&self, steps: Vec<ScriptStep>) {
        lock(&self.scripts).push_back(steps);
    }

    pub fn queued(&self) -> usize {
        lock(&self.scripts).len()
    }
}

impl NativeRecognizer for ScriptedRecognizer {
    fn start(
        &mut self,
        _settings: &VoiceSettings,
        sink: NativeSink,
    ) -> Result<(), RecognitionErrorKind> {
        let steps = lock(&self.scripts)
            .pop_front()
            .unwrap_or_else(|| silence_script(self.silence_after));
        let attempt = sink.attempt();
        let task = tokio::spawn(async move {
            for step in steps {
                if !step.delay.is_zero() {
                    tokio::time::sleep(step.delay).await;
                }
                if !sink.is_open() {
                    break;
                }
                sink.emit(step.event);
            }
            debug!(%attempt, "recognition script finished");
        });
        if let Some(previous) = lock(&self.playing).replace(task) {
            previous.abort();
        }
        Ok(())
    }

    fn abort(&mut self) {
        if let Some(task) = lock(&self.playing).take() {
            task.abort();
        }
    }
}

/// Synthesizer that takes `duration` per utterance and records what it was asked to say.
pub struct ScriptedSynthesizer {
    duration: Duration,
    failure: Option<String>,
    voices: Vec<VoiceInfo>,
    spoken: Arc<Mutex<Vec<Utterance>>>,
}

impl ScriptedSynthesizer {
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            failure: None,
            voices: Vec::new(),
            spoken: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Every utterance fails with `message` after the duration elapses.
    pub fn failing(mut self, message: impl Into<String>) -> Self {
        self.failure = Some(message.into());
        self
    }

    pub fn with_voices(mut self, voices: Vec<VoiceInfo>) -> Self {
        self.voices = voices;
        self
    }

    /// Shared log of utterances, in call order.
    pub fn spoken(&self) -> Arc<Mutex<Vec<Utterance>>> {
        Arc::clone(&self.spoken)
    }
}

#[async_trait]
impl NativeSynthesizer for ScriptedSynthesizer {
    async fn speak(&self, utterance: Utterance) -> Result<(), String> {
        lock(&self.spoken).push(utterance);
        if !self.duration.is_zero() {
            tokio::time::sleep(self.duration).await;
        }
        match &self.failure {
            Some(message) => Err(message.clone()),
            None => Ok(()),
        }
    }

    fn voices(&self) -> Vec<VoiceInfo> {
        self.voices.clone()
    }
}

/// Level source with a settable constant value.
#[derive(Debug)]
pub struct FixedLevel(AtomicU32);

impl FixedLevel {
    pub fn new(level: f32) -> Self {
        Self(AtomicU32::new(level.to_bits()))
    }

    pub fn set(&self, level: f32) {
        self.0.store(level.to_bits(), Ordering::Relaxed);
    }
}

impl LevelSource for FixedLevel {
    fn sample(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }
}

/// Level source that swings like someone talking: a slow envelope over a sampled sine.
#[derive(Debug, Default)]
pub struct OscillatingLevel {
    frame: AtomicU32,
}

impl LevelSource for OscillatingLevel {
    fn sample(&self) -> f32 {
        let frame = self.frame.fetch_add(1, Ordering::Relaxed) as f32;
        let envelope = 0.5 + 0.5 * (frame * 0.07).sin();
        let samples: Vec<f32> = (0..64)
            .map(|i| envelope * ((frame + i as f32) * 0.9).sin())
            .collect();
        crate::level::rms(&samples)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn utterance_script_builds_prefix_partials() {
        let steps = utterance_script("weather today please", 0.9, Duration::from_millis(10));
        // start, 2 partials, final, end
        assert_eq!(steps.len(), 5);
        assert_eq!(steps[0].event, NativeRecognitionEvent::Start);
        match &steps[2].event {
            NativeRecognitionEvent::Result {
                alternatives,
                is_final,
            } => {
                assert!(!is_final);
                assert_eq!(alternatives[0].transcript, "weather today");
            }
            other => panic!("unexpected step {other:?}"),
        }
        assert_eq!(steps[4].event, NativeRecognitionEvent::End);
    }

    #[test]
    fn oscillating_level_stays_in_range() {
        let source = OscillatingLevel::default();
        for _ in 0..200 {
            let level = source.sample();
            assert!((0.0..=1.0).contains(&level));
        }
    }
}
