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

//! Core types for macro playback

use std::fmt;
use std::time::Duration;

use crate::timing::compute_delay;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MacroStepType {
    KeyPress,
    KeyRelease,
    Delay,
    DeviceButton,
}

/// What a step does when it is replayed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepAction {
    KeyPress(String),
    KeyRelease(String),
    // Explicit wait in milliseconds, independent of the playback mode
    Delay(u64),
    // Reserved for device-side handling; replays as a no-op
    DeviceButton(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MacroStep {
    pub action: StepAction,
    // Offset from the start of the recording
    pub timestamp_ms: u64,
}

impl MacroStep {
    pub fn new(action: StepAction, timestamp_ms: u64) -> Self {
        Self {
            action,
            timestamp_ms,
        }
    }

    pub fn step_type(&self) -> MacroStepType {
        match self.action {
            StepAction::KeyPress(_) => MacroStepType::KeyPress,
            StepAction::KeyRelease(_) => MacroStepType::KeyRelease,
            StepAction::Delay(_) => MacroStepType::Delay,
            StepAction::DeviceButton(_) => MacroStepType::DeviceButton,
        }
    }
}

impl fmt::Display for MacroStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.action {
            StepAction::KeyPress(key) => write!(f, "press {key}")?,
            StepAction::KeyRelease(key) => write!(f, "release {key}")?,
            StepAction::Delay(ms) => write!(f, "delay {ms}ms")?,
            StepAction::DeviceButton(button) => write!(f, "button {button}")?,
        }
        write!(f, " @{}", self.timestamp_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackMode {
    AsFast,
    Fixed,
    #[default]
    Recorded,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Macro {
    pub name: String,
    pub description: Option<String>,
    pub steps: Vec<MacroStep>,
    pub playback_mode: PlaybackMode,
    // Only meaningful in Fixed mode
    pub fixed_delay_ms: u64,
    // 2.0 plays twice as fast
    pub speed_multiplier: f64,
    // Number of passes over the step list
    pub repeat_count: u32,
}

impl Default for Macro {
    fn default() -> Self {
        Self {
            name: "Untitled".to_string(),
            description: None,
            steps: Vec::new(),
            playback_mode: PlaybackMode::Recorded,
            fixed_delay_ms: 10,
            speed_multiplier: 1.0,
            repeat_count: 1,
        }
    }
}

impl Macro {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_mode(mut self, mode: PlaybackMode) -> Self {
        self.playback_mode = mode;
        self
    }

    pub fn with_fixed_delay(mut self, ms: u64) -> Self {
        self.fixed_delay_ms = ms;
        self
    }

    pub fn with_speed(mut self, multiplier: f64) -> Self {
        self.speed_multiplier = multiplier;
        self
    }

    pub fn with_repeat(mut self, count: u32) -> Self {
        self.repeat_count = count;
        self
    }

    pub fn add_step(&mut self, action: StepAction, timestamp_ms: u64) {
        self.steps.push(MacroStep::new(action, timestamp_ms));
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Wall-clock time a full playback should take, ignoring pauses.
    pub fn estimated_duration(&self) -> Duration {
        let mut previous = 0;
        let mut pass_ms: u64 = 0;

        for step in &self.steps {
            if let StepAction::Delay(ms) = step.action {
                pass_ms = pass_ms.saturating_add(ms);
            }
            pass_ms = pass_ms.saturating_add(compute_delay(
                step,
                previous,
                self.playback_mode,
                self.fixed_delay_ms,
                self.speed_multiplier,
            ));
            previous = step.timestamp_ms;
        }

        Duration::from_millis(pass_ms.saturating_mul(u64::from(self.repeat_count.max(1))))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackState {
    #[default]
    Idle,
    Playing,
    Paused,
    Stopping,
}

impl fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PlaybackState::Idle => "idle",
            PlaybackState::Playing => "playing",
            PlaybackState::Paused => "paused",
            PlaybackState::Stopping => "stopping",
        };
        f.write_str(name)
    }
}

/// Notifications published by the player to its subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackEvent {
    StepExecuted { index: usize, step: MacroStep },
    PlaybackComplete,
    Error(String),
    StateChanged(PlaybackState),
}

#[derive(Debug, Clone)]
pub struct PlayerConfig {
    // Granularity of interruptible waits; bounds stop/pause latency
    pub wait_increment: Duration,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            wait_increment: Duration::from_millis(10),
        }
    }
}
