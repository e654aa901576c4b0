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

//! Interactive playback control from the terminal
//!
//! Reads single key presses in raw mode and turns them into player commands

use anyhow::{Context, Result};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use std::io::IsTerminal;
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use std::thread;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    TogglePause,
    Stop,
}

// RAII guard for terminal raw mode - only enables if stdin is a TTY
struct RawModeGuard {
    enabled: bool,
}

impl RawModeGuard {
    fn new() -> Result<Self> {
        let enabled = if std::io::stdin().is_terminal() {
            enable_raw_mode().context("Failed to enable raw mode")?;
            true
        } else {
            false
        };
        Ok(RawModeGuard { enabled })
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if self.enabled {
            let _ = disable_raw_mode();
        }
    }
}

pub fn command_for(key: KeyEvent) -> Option<ControlCommand> {
    if key.kind != KeyEventKind::Press {
        return None;
    }

    match key.code {
        KeyCode::Char(' ') | KeyCode::Char('p') => Some(ControlCommand::TogglePause),
        KeyCode::Char('q') | KeyCode::Esc => Some(ControlCommand::Stop),
        // Raw mode swallows SIGINT, so Ctrl-C arrives as a key
        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
            Some(ControlCommand::Stop)
        }
        _ => None,
    }
}

pub struct KeyListener {
    running: Arc<AtomicBool>,
    reader_thread: Option<thread::JoinHandle<()>>,
    _raw_mode_guard: RawModeGuard,
}

impl KeyListener {
    pub fn spawn(commands: UnboundedSender<ControlCommand>) -> Result<Self> {
        let raw_mode_guard = RawModeGuard::new()?;
        let running = Arc::new(AtomicBool::new(true));

        let r = running.clone();
        let reader_thread = thread::spawn(move || {
            while r.load(Ordering::SeqCst) {
                match event::poll(Duration::from_millis(100)) {
                    Ok(true) => {}
                    Ok(false) => continue,
                    Err(e) => {
                        debug!(error = %e, "Terminal poll failed");
                        break;
                    }
                }

                let key = match event::read() {
                    Ok(Event::Key(key)) => key,
                    Ok(_) => continue,
                    Err(_) => break,
                };

                if let Some(command) = command_for(key)
                    && commands.send(command).is_err()
                {
                    break;
                }
            }
        });

        Ok(Self {
            running,
            reader_thread: Some(reader_thread),
            _raw_mode_guard: raw_mode_guard,
        })
    }
}

impl Drop for KeyListener {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);

        // Join before raw mode is restored so no key is read in cooked mode
        if let Some(handle) = self.reader_thread.take() {
            let _ = handle.join();
        }

        // _raw_mode_guard drops here, restoring terminal state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_space_and_p_toggle_pause() {
        let space = KeyEvent::new(KeyCode::Char(' '), KeyModifiers::NONE);
        let p = KeyEvent::new(KeyCode::Char('p'), KeyModifiers::NONE);
        assert_eq!(command_for(space), Some(ControlCommand::TogglePause));
        assert_eq!(command_for(p), Some(ControlCommand::TogglePause));
    }

    #[test]
    fn test_stop_keys() {
        let q = KeyEvent::new(KeyCode::Char('q'), KeyModifiers::NONE);
        let esc = KeyEvent::new(KeyCode::Esc, KeyModifiers::NONE);
        let ctrl_c = KeyEvent::new(KeyCode::Char('c'), KeyModifiers::CONTROL);
        assert_eq!(command_for(q), Some(ControlCommand::Stop));
        assert_eq!(command_for(esc), Some(ControlCommand::Stop));
        assert_eq!(command_for(ctrl_c), Some(ControlCommand::Stop));
    }

    #[test]
    fn test_other_keys_ignored() {
        let c = KeyEvent::new(KeyCode::Char('c'), KeyModifiers::NONE);
        let mut release = KeyEvent::new(KeyCode::Char('q'), KeyModifiers::NONE);
        release.kind = KeyEventKind::Release;
        assert_eq!(command_for(c), None);
        assert_eq!(command_for(release), None);
    }
}
