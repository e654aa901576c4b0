// Copyright (C) 2025  Tom Waddington
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published
// by the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! Playback worker for a single macro run
//!
//! Walks the macro's steps with proper timing. Stop and pause requests are
//! observed at every step boundary and between the slices of every wait.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use std::time::Duration;

use tokio::time::{Instant, sleep};
use tracing::{debug, error, trace};

use crate::error::PlaybackError;
use crate::events::EventBus;
use crate::sink::{OutputSink, SinkProvider};
use crate::timing::compute_delay;
use crate::types::{Macro, MacroStep, PlaybackEvent, StepAction};

/// Flags shared between the player and its worker.
#[derive(Debug, Default)]
pub struct WorkerControl {
    stop: AtomicBool,
    pause: AtomicBool,
}

impl WorkerControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn request_pause(&self) {
        self.pause.store(true, Ordering::SeqCst);
    }

    pub fn request_resume(&self) {
        self.pause.store(false, Ordering::SeqCst);
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    pub fn pause_requested(&self) -> bool {
        self.pause.load(Ordering::SeqCst)
    }

    async fn wait_while_paused(&self, increment: Duration) {
        while self.pause_requested() && !self.stop_requested() {
            sleep(increment).await;
        }
    }

    /// Sleep for `duration` in `increment` slices. Returns early on stop;
    /// time spent paused does not count toward the wait.
    async fn interruptible_wait(&self, duration: Duration, increment: Duration) {
        let mut remaining = duration;

        while !remaining.is_zero() && !self.stop_requested() {
            let slice = remaining.min(increment);
            let started = Instant::now();
            sleep(slice).await;

            if !self.pause_requested() {
                remaining = remaining.saturating_sub(started.elapsed());
            }
        }
    }
}

#[derive(Debug)]
pub enum WorkerOutcome {
    Completed,
    Stopped,
    Failed(PlaybackError),
}

// Closes the sink when the worker goes away, however it exits
struct SinkGuard {
    sink: Option<Box<dyn OutputSink>>,
}

impl Drop for SinkGuard {
    fn drop(&mut self) {
        if let Some(mut sink) = self.sink.take()
            && let Err(e) = sink.close()
        {
            debug!(error = %e, "Ignoring output sink close failure");
        }
    }
}

pub struct PlaybackWorker {
    macro_def: Arc<Macro>,
    control: Arc<WorkerControl>,
    provider: Option<Arc<dyn SinkProvider>>,
    sink: SinkGuard,
    events: Arc<EventBus>,
    increment: Duration,
}

impl PlaybackWorker {
    pub fn new(
        macro_def: Arc<Macro>,
        control: Arc<WorkerControl>,
        provider: Option<Arc<dyn SinkProvider>>,
        events: Arc<EventBus>,
        increment: Duration,
    ) -> Self {
        Self {
            macro_def,
            control,
            provider,
            sink: SinkGuard { sink: None },
            events,
            // A zero slice would never make progress on the clock
            increment: increment.max(Duration::from_millis(1)),
        }
    }

    fn should_continue(&self) -> bool {
        !self.control.stop_requested()
    }

    fn emit_key(&mut self, key: &str, pressed: bool) -> Result<(), PlaybackError> {
        let Some(provider) = &self.provider else {
            return Ok(());
        };

        if self.sink.sink.is_none() {
            let sink = provider.open().map_err(PlaybackError::SinkUnavailable)?;
            debug!("Output sink opened");
            self.sink.sink = Some(sink);
        }

        if let Some(sink) = self.sink.sink.as_mut() {
            sink.emit(key, pressed).map_err(|source| PlaybackError::Emit {
                key: key.to_string(),
                source,
            })?;
        }
        Ok(())
    }

    async fn execute_step(&mut self, step: &MacroStep) -> Result<(), PlaybackError> {
        match &step.action {
            StepAction::KeyPress(key) => self.emit_key(key, true)?,
            StepAction::KeyRelease(key) => self.emit_key(key, false)?,
            StepAction::Delay(ms) => {
                self.control
                    .interruptible_wait(Duration::from_millis(*ms), self.increment)
                    .await;
            }
            StepAction::DeviceButton(_) => {
                // No device-side action during playback yet
            }
        }
        Ok(())
    }

    async fn play_steps(&mut self) -> Result<WorkerOutcome, PlaybackError> {
        let macro_def = Arc::clone(&self.macro_def);

        for pass in 0..macro_def.repeat_count.max(1) {
            let mut previous_timestamp = 0;

            for (index, step) in macro_def.steps.iter().enumerate() {
                if !self.should_continue() {
                    return Ok(WorkerOutcome::Stopped);
                }

                self.control.wait_while_paused(self.increment).await;
                if !self.should_continue() {
                    return Ok(WorkerOutcome::Stopped);
                }

                self.execute_step(step).await?;

                let delay = compute_delay(
                    step,
                    previous_timestamp,
                    macro_def.playback_mode,
                    macro_def.fixed_delay_ms,
                    macro_def.speed_multiplier,
                );
                if delay > 0 {
                    self.control
                        .interruptible_wait(Duration::from_millis(delay), self.increment)
                        .await;
                }
                previous_timestamp = step.timestamp_ms;

                trace!(pass, index, %step, "Step executed");
                self.events.publish(PlaybackEvent::StepExecuted {
                    index,
                    step: step.clone(),
                });
            }
        }

        if self.should_continue() {
            Ok(WorkerOutcome::Completed)
        } else {
            Ok(WorkerOutcome::Stopped)
        }
    }

    /// Play the bound macro to completion, stop, or failure.
    ///
    /// The output sink, if one was opened, is closed when this returns.
    pub async fn run(mut self) -> WorkerOutcome {
        match self.play_steps().await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(macro_name = %self.macro_def.name, error = %e, "Macro playback failed");
                WorkerOutcome::Failed(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SinkError;
    use crate::types::PlaybackMode;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::mpsc::UnboundedReceiver;

    #[derive(Clone, Default)]
    struct Recorder {
        calls: Arc<Mutex<Vec<(String, bool)>>>,
        opened: Arc<AtomicUsize>,
        closed: Arc<AtomicUsize>,
        fail_open: bool,
        fail_close: bool,
    }

    struct RecordingSink {
        recorder: Recorder,
    }

    impl OutputSink for RecordingSink {
        fn emit(&mut self, key: &str, pressed: bool) -> Result<(), SinkError> {
            self.recorder
                .calls
                .lock()
                .unwrap()
                .push((key.to_string(), pressed));
            Ok(())
        }

        fn close(&mut self) -> Result<(), SinkError> {
            self.recorder.closed.fetch_add(1, Ordering::SeqCst);
            if self.recorder.fail_close {
                return Err(SinkError::Unavailable("close failed".to_string()));
            }
            Ok(())
        }
    }

    impl SinkProvider for Recorder {
        fn open(&self) -> Result<Box<dyn OutputSink>, SinkError> {
            if self.fail_open {
                return Err(SinkError::Unavailable("no uinput".to_string()));
            }
            self.opened.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(RecordingSink {
                recorder: self.clone(),
            }))
        }
    }

    fn worker_for(
        macro_def: Macro,
        provider: Option<Arc<dyn SinkProvider>>,
    ) -> (PlaybackWorker, Arc<WorkerControl>, UnboundedReceiver<PlaybackEvent>) {
        let control = Arc::new(WorkerControl::new());
        let events = Arc::new(EventBus::new());
        let rx = events.subscribe();
        let worker = PlaybackWorker::new(
            Arc::new(macro_def),
            Arc::clone(&control),
            provider,
            events,
            Duration::from_millis(10),
        );
        (worker, control, rx)
    }

    fn tap(key: &str) -> Macro {
        let mut m = Macro::new("Tap").with_mode(PlaybackMode::AsFast);
        m.add_step(StepAction::KeyPress(key.to_string()), 0);
        m.add_step(StepAction::KeyRelease(key.to_string()), 10);
        m
    }

    #[test]
    fn test_control_flags() {
        let control = WorkerControl::new();
        assert!(!control.stop_requested());
        assert!(!control.pause_requested());

        control.request_pause();
        assert!(control.pause_requested());
        control.request_resume();
        assert!(!control.pause_requested());

        control.request_stop();
        assert!(control.stop_requested());
    }

    #[tokio::test]
    async fn test_press_then_release_in_order() {
        let recorder = Recorder::default();
        let (worker, _, _rx) = worker_for(tap("KEY_A"), Some(Arc::new(recorder.clone())));

        assert!(matches!(worker.run().await, WorkerOutcome::Completed));
        assert_eq!(
            *recorder.calls.lock().unwrap(),
            vec![("KEY_A".to_string(), true), ("KEY_A".to_string(), false)]
        );
    }

    #[tokio::test]
    async fn test_no_sink_is_silent() {
        let (worker, _, mut rx) = worker_for(tap("KEY_A"), None);

        assert!(matches!(worker.run().await, WorkerOutcome::Completed));
        assert!(matches!(
            rx.try_recv().unwrap(),
            PlaybackEvent::StepExecuted { index: 0, .. }
        ));
        assert!(matches!(
            rx.try_recv().unwrap(),
            PlaybackEvent::StepExecuted { index: 1, .. }
        ));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_sink_opened_lazily_and_closed_once() {
        let recorder = Recorder::default();
        let mut m = Macro::new("Buttons").with_mode(PlaybackMode::AsFast);
        m.add_step(StepAction::DeviceButton("G5".to_string()), 0);
        let (worker, _, _rx) = worker_for(m, Some(Arc::new(recorder.clone())));

        worker.run().await;
        assert_eq!(recorder.opened.load(Ordering::SeqCst), 0);
        assert_eq!(recorder.closed.load(Ordering::SeqCst), 0);

        let (worker, _, _rx) = worker_for(tap("KEY_A"), Some(Arc::new(recorder.clone())));
        worker.run().await;
        assert_eq!(recorder.opened.load(Ordering::SeqCst), 1);
        assert_eq!(recorder.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_close_failure_is_swallowed() {
        let recorder = Recorder {
            fail_close: true,
            ..Recorder::default()
        };
        let (worker, _, _rx) = worker_for(tap("KEY_A"), Some(Arc::new(recorder.clone())));

        assert!(matches!(worker.run().await, WorkerOutcome::Completed));
        assert_eq!(recorder.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_open_failure_fails_playback() {
        let recorder = Recorder {
            fail_open: true,
            ..Recorder::default()
        };
        let (worker, _, mut rx) = worker_for(tap("KEY_A"), Some(Arc::new(recorder)));

        let outcome = worker.run().await;
        assert!(matches!(
            outcome,
            WorkerOutcome::Failed(PlaybackError::SinkUnavailable(_))
        ));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_device_button_is_noop() {
        let recorder = Recorder::default();
        let mut m = Macro::new("Button").with_mode(PlaybackMode::AsFast);
        m.add_step(StepAction::DeviceButton("G5".to_string()), 0);
        let (worker, _, mut rx) = worker_for(m, Some(Arc::new(recorder.clone())));

        assert!(matches!(worker.run().await, WorkerOutcome::Completed));
        assert!(recorder.calls.lock().unwrap().is_empty());
        assert!(rx.try_recv().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_step_waits_its_own_duration() {
        let mut m = Macro::new("Delay").with_mode(PlaybackMode::AsFast);
        m.add_step(StepAction::Delay(100), 5000);
        let (worker, _, _rx) = worker_for(m, None);

        let started = Instant::now();
        worker.run().await;
        assert_eq!(started.elapsed(), Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_recorded_timing() {
        let mut m = Macro::new("Recorded").with_mode(PlaybackMode::Recorded);
        m.add_step(StepAction::KeyPress("KEY_A".to_string()), 200);
        m.add_step(StepAction::KeyRelease("KEY_A".to_string()), 500);
        let (worker, _, _rx) = worker_for(m, None);

        let started = Instant::now();
        worker.run().await;
        assert_eq!(started.elapsed(), Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_before_start_runs_nothing() {
        let recorder = Recorder::default();
        let (worker, control, mut rx) = worker_for(tap("KEY_A"), Some(Arc::new(recorder.clone())));

        control.request_stop();
        assert!(matches!(worker.run().await, WorkerOutcome::Stopped));
        assert!(recorder.calls.lock().unwrap().is_empty());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_interrupts_long_wait() {
        let mut m = Macro::new("Long").with_mode(PlaybackMode::AsFast);
        m.add_step(StepAction::Delay(60_000), 0);
        m.add_step(StepAction::KeyPress("KEY_A".to_string()), 0);
        let recorder = Recorder::default();
        let (worker, control, mut rx) = worker_for(m, Some(Arc::new(recorder.clone())));

        let started = Instant::now();
        let handle = tokio::spawn(worker.run());
        sleep(Duration::from_millis(45)).await;
        control.request_stop();

        assert!(matches!(handle.await.unwrap(), WorkerOutcome::Stopped));
        assert!(started.elapsed() <= Duration::from_millis(60));
        assert!(recorder.calls.lock().unwrap().is_empty());
        // The delay step itself still counts as executed
        assert!(matches!(
            rx.try_recv().unwrap(),
            PlaybackEvent::StepExecuted { index: 0, .. }
        ));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_freezes_wait() {
        let mut m = Macro::new("Paused").with_mode(PlaybackMode::AsFast);
        m.add_step(StepAction::Delay(100), 0);
        let (worker, control, _rx) = worker_for(m, None);

        let started = Instant::now();
        let handle = tokio::spawn(worker.run());
        sleep(Duration::from_millis(50)).await;
        control.request_pause();
        sleep(Duration::from_millis(1000)).await;
        assert!(!handle.is_finished());
        control.request_resume();

        assert!(matches!(handle.await.unwrap(), WorkerOutcome::Completed));
        assert!(started.elapsed() >= Duration::from_millis(1100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeat_count() {
        let recorder = Recorder::default();
        let (worker, _, mut rx) = worker_for(tap("KEY_B").with_repeat(3), Some(Arc::new(recorder.clone())));

        assert!(matches!(worker.run().await, WorkerOutcome::Completed));
        assert_eq!(recorder.calls.lock().unwrap().len(), 6);
        assert_eq!(recorder.opened.load(Ordering::SeqCst), 1);

        let mut indices = Vec::new();
        while let Ok(PlaybackEvent::StepExecuted { index, .. }) = rx.try_recv() {
            indices.push(index);
        }
        assert_eq!(indices, vec![0, 1, 0, 1, 0, 1]);
    }
}
