//! **AudioLevelMonitor**: smoothed input energy while recording.
//!
//! A cooperative task samples a [`LevelSource`] on every render tick and
//! publishes a smoothed level in `0.0..=1.0`. The task is started when the
//! session enters `Recording` and stopped by the transition out of it:
//! `stop()` bumps the meter generation and resets the level to 0 under the
//! same lock the task publishes under, so no stale tick can land after the
//! reset even if the task is mid-tick when it is aborted.

use crate::observe::{lock, Observable};
use crate::recognition::clamp_unit;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

/// Raw input energy for the current render frame, in `0.0..=1.0`.
pub trait LevelSource: Send + Sync {
    fn sample(&self) -> f32;
}

/// Root-mean-square of a PCM frame, scaled into `0.0..=1.0`.
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
    clamp_unit((sum_sq / samples.len() as f32).sqrt())
}

#[derive(Debug, Default)]
struct MeterState {
    generation: u64,
    running: bool,
}

pub struct AudioLevelMonitor {
    source: Option<Arc<dyn LevelSource>>,
    tick: Duration,
    smoothing: f32,
    level: Arc<Observable<f32>>,
    state: Arc<Mutex<MeterState>>,
    task: Option<JoinHandle<()>>,
}

impl AudioLevelMonitor {
    /// `source` is `None` when the host cannot meter input; the level then stays at 0.
    pub fn new(source: Option<Arc<dyn LevelSource>>, tick: Duration, smoothing: f32) -> Self {
        Self {
            source,
            tick,
            smoothing: smoothing.clamp(0.0, 0.99),
            level: Arc::new(Observable::new(0.0)),
            state: Arc::new(Mutex::new(MeterState::default())),
            task: None,
        }
    }

    pub fn level(&self) -> &Arc<Observable<f32>> {
        &self.level
    }

    pub fn is_running(&self) -> bool {
        lock(&self.state).running
    }

    /// Start the render loop. No-op if already running or there is no source.
    pub fn start(&mut self) {
        let Some(source) = self.source.clone() else {
            return;
        };
        let generation = {
            let mut state = lock(&self.state);
            if state.running {
                return;
            }
            state.generation += 1;
            state.running = true;
            state.generation
        };

        let state = Arc::clone(&self.state);
        let level = Arc::clone(&self.level);
        let tick = self.tick;
        let smoothing = self.smoothing;

        self.task = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut smoothed = 0.0f32;
            loop {
                interval.tick().await;
                let raw = clamp_unit(source.sample());
                smoothed = smoothing * smoothed + (1.0 - smoothing) * raw;

                let state = lock(&state);
                if !state.running || state.generation != generation {
                    break;
                }
                level.publish(smoothed);
            }
            debug!(generation, "level meter loop exited");
        }));
        debug!(generation, tick_ms = tick.as_millis() as u64, "level meter started");
    }

    /// Stop the loop and reset the level to 0. Idempotent.
    pub fn stop(&mut self) {
        {
            let mut state = lock(&self.state);
            state.generation += 1;
            state.running = false;
            self.level.publish_if_changed(0.0);
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for AudioLevelMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulated::FixedLevel;

    #[test]
    fn rms_of_silence_and_full_scale() {
        assert_eq!(rms(&[]), 0.0);
        assert_eq!(rms(&[0.0; 480]), 0.0);
        assert!((rms(&[1.0, -1.0, 1.0, -1.0]) - 1.0).abs() < 1e-6);
    }

    #[tokio::test(start_paused = true)]
    async fn meter_rises_while_running_and_resets_on_stop() {
        let source = Arc::new(FixedLevel::new(0.8));
        let mut monitor =
            AudioLevelMonitor::new(Some(source), Duration::from_millis(50), 0.5);
        let mut rx = monitor.level().subscribe();
        assert_eq!(rx.recv().await, Some(0.0));

        monitor.start();
        assert!(monitor.is_running());
        tokio::time::sleep(Duration::from_millis(175)).await;
        let during = monitor.level().get();
        assert!(during > 0.0 && during <= 0.8);

        monitor.stop();
        assert_eq!(monitor.level().get(), 0.0);
        assert!(!monitor.is_running());

        let seen: Vec<f32> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
        assert_eq!(seen.last(), Some(&0.0));

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(rx.try_recv().is_err(), "no ticks after stop");
        assert_eq!(monitor.level().get(), 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn garbage_samples_stay_in_range() {
        let source = Arc::new(FixedLevel::new(f32::NAN));
        let mut monitor =
            AudioLevelMonitor::new(Some(source.clone()), Duration::from_millis(50), 0.5);
        monitor.start();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(monitor.level().get(), 0.0);

        // NaN must not stick in the smoothed value either.
        source.set(0.6);
        tokio::time::sleep(Duration::from_millis(200)).await;
        let level = monitor.level().get();
        assert!(level > 0.0 && level <= 0.6, "level = {level}");

        source.set(f32::INFINITY);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!((0.0..=1.0).contains(&monitor.level().get()));

        assert_eq!(rms(&[f32::NAN; 4]), 0.0);
        monitor.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn without_source_level_stays_zero() {
        let mut monitor = AudioLevelMonitor::new(None, Duration::from_millis(50), 0.5);
        monitor.start();
        assert!(!monitor.is_running());
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(monitor.level().get(), 0.0);
    }
}
