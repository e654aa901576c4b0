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

//! Macro player: the control surface for playback
//!
//! Owns at most one [`PlaybackWorker`] at a time and is the only place
//! playback state changes. Worker progress, completion and errors are
//! republished to every subscriber as [`PlaybackEvent`]s.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::runtime::Handle;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::PlaybackError;
use crate::events::EventBus;
use crate::playback::{PlaybackWorker, WorkerControl, WorkerOutcome};
use crate::sink::SinkProvider;
use crate::types::{Macro, PlaybackEvent, PlaybackState, PlayerConfig};

struct ActiveWorker {
    generation: u64,
    control: Arc<WorkerControl>,
    // Flips to true once finish() has run; every stop() caller waits on it
    done: watch::Receiver<bool>,
}

#[derive(Default)]
struct PlayerInner {
    state: PlaybackState,
    worker: Option<ActiveWorker>,
    current_macro: Option<Arc<Macro>>,
    next_generation: u64,
}

struct Shared {
    inner: Mutex<PlayerInner>,
    events: Arc<EventBus>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, PlayerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, inner: &mut PlayerInner, state: PlaybackState) {
        if inner.state != state {
            inner.state = state;
            self.events.publish(PlaybackEvent::StateChanged(state));
        }
    }

    // Runs once per worker, after its task has ended
    fn finish(&self, generation: u64, outcome: WorkerOutcome) {
        let mut inner = self.lock();

        match outcome {
            WorkerOutcome::Completed => {
                info!("Macro playback complete");
                self.events.publish(PlaybackEvent::PlaybackComplete);
            }
            WorkerOutcome::Stopped => {
                info!("Macro playback stopped");
            }
            WorkerOutcome::Failed(e) => {
                self.events.publish(PlaybackEvent::Error(e.to_string()));
            }
        }

        let is_current = inner
            .worker
            .as_ref()
            .is_some_and(|w| w.generation == generation);
        if is_current {
            inner.worker = None;
            inner.current_macro = None;
            self.set_state(&mut inner, PlaybackState::Idle);
        }
    }
}

pub struct MacroPlayer {
    shared: Arc<Shared>,
    provider: Option<Arc<dyn SinkProvider>>,
    config: PlayerConfig,
    runtime: Option<Handle>,
}

impl Default for MacroPlayer {
    fn default() -> Self {
        Self::new(None)
    }
}

impl MacroPlayer {
    /// Create a player. Without a sink provider, key steps are silent.
    pub fn new(provider: Option<Arc<dyn SinkProvider>>) -> Self {
        Self::with_config(provider, PlayerConfig::default())
    }

    pub fn with_config(provider: Option<Arc<dyn SinkProvider>>, config: PlayerConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                inner: Mutex::new(PlayerInner::default()),
                events: Arc::new(EventBus::new()),
            }),
            provider,
            config,
            runtime: None,
        }
    }

    /// Spawn workers on `runtime` instead of the caller's current runtime.
    ///
    /// Lets a host thread that is not inside tokio call [`play`](Self::play);
    /// it can drive [`stop`](Self::stop) with `runtime.block_on`.
    pub fn with_runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    pub fn subscribe(&self) -> UnboundedReceiver<PlaybackEvent> {
        self.shared.events.subscribe()
    }

    pub fn state(&self) -> PlaybackState {
        self.shared.lock().state
    }

    /// True while a macro is in flight, including while paused.
    pub fn is_playing(&self) -> bool {
        matches!(
            self.state(),
            PlaybackState::Playing | PlaybackState::Paused
        )
    }

    pub fn current_macro(&self) -> Option<Arc<Macro>> {
        self.shared.lock().current_macro.clone()
    }

    /// Start playing `macro_def` on a new worker task.
    ///
    /// Usage errors are returned and also published as
    /// [`PlaybackEvent::Error`]; the player state is left untouched.
    pub fn play(&self, macro_def: impl Into<Arc<Macro>>) -> Result<(), PlaybackError> {
        let result = self.start(macro_def.into());
        if let Err(e) = &result {
            warn!(error = %e, "Cannot start macro playback");
            self.shared.events.publish(PlaybackEvent::Error(e.to_string()));
        }
        result
    }

    fn start(&self, macro_def: Arc<Macro>) -> Result<(), PlaybackError> {
        let mut inner = self.shared.lock();

        if macro_def.is_empty() {
            return Err(PlaybackError::EmptyMacro(macro_def.name.clone()));
        }
        match inner.state {
            PlaybackState::Playing | PlaybackState::Paused => {
                return Err(PlaybackError::AlreadyPlaying);
            }
            PlaybackState::Stopping => return Err(PlaybackError::Stopping),
            PlaybackState::Idle if inner.worker.is_some() => {
                return Err(PlaybackError::AlreadyPlaying);
            }
            PlaybackState::Idle => {}
        }
        let runtime = match &self.runtime {
            Some(runtime) => runtime.clone(),
            None => Handle::try_current().map_err(|_| PlaybackError::NoRuntime)?,
        };

        let generation = inner.next_generation;
        inner.next_generation += 1;

        let control = Arc::new(WorkerControl::new());
        let worker = PlaybackWorker::new(
            Arc::clone(&macro_def),
            Arc::clone(&control),
            self.provider.clone(),
            Arc::clone(&self.shared.events),
            self.config.wait_increment,
        );

        info!(
            macro_name = %macro_def.name,
            steps = macro_def.steps.len(),
            mode = ?macro_def.playback_mode,
            speed = macro_def.speed_multiplier,
            repeat = macro_def.repeat_count,
            "Starting macro playback"
        );
        inner.current_macro = Some(macro_def);
        self.shared.set_state(&mut inner, PlaybackState::Playing);

        // The supervisor turns a panicked worker into an ordinary failure
        let shared = Arc::clone(&self.shared);
        let (done_tx, done) = watch::channel(false);
        runtime.spawn(async move {
            let outcome = match tokio::spawn(worker.run()).await {
                Ok(outcome) => outcome,
                Err(e) => WorkerOutcome::Failed(PlaybackError::WorkerFailed(e.to_string())),
            };
            shared.finish(generation, outcome);
            let _ = done_tx.send(true);
        });

        inner.worker = Some(ActiveWorker {
            generation,
            control,
            done,
        });
        Ok(())
    }

    pub fn pause(&self) {
        let mut inner = self.shared.lock();
        if inner.state != PlaybackState::Playing {
            return;
        }
        if let Some(worker) = &inner.worker {
            worker.control.request_pause();
        }
        debug!("Macro playback paused");
        self.shared.set_state(&mut inner, PlaybackState::Paused);
    }

    pub fn resume(&self) {
        let mut inner = self.shared.lock();
        if inner.state != PlaybackState::Paused {
            return;
        }
        if let Some(worker) = &inner.worker {
            worker.control.request_resume();
        }
        debug!("Macro playback resumed");
        self.shared.set_state(&mut inner, PlaybackState::Playing);
    }

    pub fn toggle_pause(&self) {
        match self.state() {
            PlaybackState::Playing => self.pause(),
            PlaybackState::Paused => self.resume(),
            PlaybackState::Idle | PlaybackState::Stopping => {}
        }
    }

    /// Ask the active worker to stop and wait for it to wind down.
    ///
    /// Returns once the worker has been torn down and the player is idle,
    /// for every caller, including concurrent ones.
    pub async fn stop(&self) {
        let (generation, mut done) = {
            let mut inner = self.shared.lock();
            let Some(worker) = inner.worker.as_ref() else {
                inner.current_macro = None;
                self.shared.set_state(&mut inner, PlaybackState::Idle);
                return;
            };

            worker.control.request_stop();
            let pending = (worker.generation, worker.done.clone());
            info!("Stopping macro playback");
            self.shared.set_state(&mut inner, PlaybackState::Stopping);
            pending
        };

        // A dropped sender means the supervisor died before finish() ran
        if done.wait_for(|finished| *finished).await.is_err() {
            warn!("Playback supervisor did not finish cleanly");
            self.shared.finish(
                generation,
                WorkerOutcome::Failed(PlaybackError::WorkerFailed(
                    "supervisor task ended early".to_string(),
                )),
            );
        }
    }
}

impl Drop for MacroPlayer {
    fn drop(&mut self) {
        // Don't leave a worker typing into the void
        if let Some(worker) = &self.shared.lock().worker {
            worker.control.request_stop();
        }
    }
}
