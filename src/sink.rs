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

//! Output sinks for synthesized key events
//!
//! The player never talks to a device directly. The host hands it a
//! [`SinkProvider`], and each playback opens one [`OutputSink`] the first
//! time it needs to emit a key.

use std::io::Write;

use tracing::{info, warn};

use crate::error::SinkError;
use crate::keycodes::{EV_KEY, EV_SYN, SYN_REPORT, key_code};

pub trait OutputSink: Send {
    fn emit(&mut self, key: &str, pressed: bool) -> Result<(), SinkError>;

    fn close(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

pub trait SinkProvider: Send + Sync {
    fn open(&self) -> Result<Box<dyn OutputSink>, SinkError>;
}

impl<F> SinkProvider for F
where
    F: Fn() -> Result<Box<dyn OutputSink>, SinkError> + Send + Sync,
{
    fn open(&self) -> Result<Box<dyn OutputSink>, SinkError> {
        self()
    }
}

/// Writes evdev-style `type code value` lines, one report per key transition.
pub struct EventWriterSink<W: Write + Send> {
    writer: W,
    line_ending: &'static str,
}

impl<W: Write + Send> EventWriterSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            line_ending: "\n",
        }
    }

    /// Terminate lines with `\r\n`, for a terminal in raw mode.
    pub fn with_crlf(mut self) -> Self {
        self.line_ending = "\r\n";
        self
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Send> OutputSink for EventWriterSink<W> {
    fn emit(&mut self, key: &str, pressed: bool) -> Result<(), SinkError> {
        let Some(code) = key_code(key) else {
            warn!(key, "Unknown key code, skipping");
            return Ok(());
        };

        let eol = self.line_ending;
        write!(self.writer, "{} {} {}{eol}", EV_KEY, code, u8::from(pressed))?;
        write!(self.writer, "{} {} 0{eol}", EV_SYN, SYN_REPORT)?;
        self.writer.flush()?;
        Ok(())
    }

    fn close(&mut self) -> Result<(), SinkError> {
        self.writer.flush()?;
        Ok(())
    }
}

/// Logs key transitions instead of emitting them anywhere.
#[derive(Debug, Default)]
pub struct TracingSink;

impl OutputSink for TracingSink {
    fn emit(&mut self, key: &str, pressed: bool) -> Result<(), SinkError> {
        info!(key, pressed, "key event");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_writer_press_and_release() {
        let mut sink = EventWriterSink::new(Vec::new());
        sink.emit("KEY_A", true).unwrap();
        sink.emit("KEY_B", false).unwrap();

        let out = String::from_utf8(sink.into_inner()).unwrap();
        assert_eq!(out, "1 30 1\n0 0 0\n1 48 0\n0 0 0\n");
    }

    #[test]
    fn test_event_writer_crlf_for_raw_terminal() {
        let mut sink = EventWriterSink::new(Vec::new()).with_crlf();
        sink.emit("KEY_A", true).unwrap();

        let out = String::from_utf8(sink.into_inner()).unwrap();
        assert_eq!(out, "1 30 1\r\n0 0 0\r\n");
    }

    #[test]
    fn test_event_writer_unknown_key_is_skipped() {
        let mut sink = EventWriterSink::new(Vec::new());
        assert!(sink.emit("KEY_UNKNOWN", true).is_ok());
        assert!(sink.into_inner().is_empty());
    }

    #[test]
    fn test_closure_provider() {
        let provider = || Ok::<_, SinkError>(Box::new(TracingSink) as Box<dyn OutputSink>);
        let mut sink = provider.open().unwrap();
        assert!(sink.emit("KEY_A", true).is_ok());
        assert!(sink.close().is_ok());
    }
}
