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

//! Inter-step delay calculation

use crate::types::{MacroStep, PlaybackMode};

/// Delay in milliseconds to wait after `step`.
///
/// Out-of-order timestamps in recorded mode are clamped to zero rather than
/// rejected. A non-positive or non-finite multiplier is treated as 1.0.
pub fn compute_delay(
    step: &MacroStep,
    previous_timestamp_ms: u64,
    mode: PlaybackMode,
    fixed_delay_ms: u64,
    speed_multiplier: f64,
) -> u64 {
    let base_ms = match mode {
        PlaybackMode::AsFast => return 0,
        PlaybackMode::Fixed => fixed_delay_ms,
        PlaybackMode::Recorded => step.timestamp_ms.saturating_sub(previous_timestamp_ms),
    };

    let speed = if speed_multiplier.is_finite() && speed_multiplier > 0.0 {
        speed_multiplier
    } else {
        1.0
    };

    // `as` truncates toward zero and saturates
    (base_ms as f64 / speed) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StepAction;

    fn key_a(timestamp_ms: u64) -> MacroStep {
        MacroStep::new(StepAction::KeyPress("KEY_A".to_string()), timestamp_ms)
    }

    #[test]
    fn test_as_fast_is_zero() {
        for ts in [0, 1000, 5] {
            assert_eq!(compute_delay(&key_a(ts), 500, PlaybackMode::AsFast, 100, 1.0), 0);
        }
    }

    #[test]
    fn test_fixed() {
        assert_eq!(compute_delay(&key_a(1000), 0, PlaybackMode::Fixed, 50, 1.0), 50);
    }

    #[test]
    fn test_fixed_with_speed() {
        assert_eq!(compute_delay(&key_a(1000), 0, PlaybackMode::Fixed, 100, 2.0), 50);
    }

    #[test]
    fn test_fixed_truncates() {
        assert_eq!(compute_delay(&key_a(0), 0, PlaybackMode::Fixed, 100, 3.0), 33);
    }

    #[test]
    fn test_recorded() {
        assert_eq!(compute_delay(&key_a(500), 200, PlaybackMode::Recorded, 0, 1.0), 300);
    }

    #[test]
    fn test_recorded_with_speed() {
        assert_eq!(compute_delay(&key_a(400), 0, PlaybackMode::Recorded, 0, 2.0), 200);
    }

    #[test]
    fn test_recorded_slow_motion() {
        assert_eq!(compute_delay(&key_a(100), 0, PlaybackMode::Recorded, 0, 0.5), 200);
    }

    #[test]
    fn test_recorded_no_negative() {
        assert_eq!(compute_delay(&key_a(100), 500, PlaybackMode::Recorded, 0, 1.0), 0);
    }

    #[test]
    fn test_invalid_speed_falls_back() {
        assert_eq!(compute_delay(&key_a(0), 0, PlaybackMode::Fixed, 80, 0.0), 80);
        assert_eq!(compute_delay(&key_a(0), 0, PlaybackMode::Fixed, 80, f64::NAN), 80);
        assert_eq!(compute_delay(&key_a(0), 0, PlaybackMode::Fixed, 80, -2.0), 80);
    }
}
