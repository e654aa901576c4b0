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

//! Error types for macro playback

use thiserror::Error;

/// Failures raised by an output sink implementation.
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Output device unavailable: {0}")]
    Unavailable(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum PlaybackError {
    #[error("Macro '{0}' has no steps")]
    EmptyMacro(String),

    #[error("Already playing")]
    AlreadyPlaying,

    #[error("Playback is stopping")]
    Stopping,

    #[error("No async runtime available to run playback")]
    NoRuntime,

    #[error("Failed to open output sink: {0}")]
    SinkUnavailable(#[source] SinkError),

    #[error("Failed to emit {key}: {source}")]
    Emit {
        key: String,
        #[source]
        source: SinkError,
    },

    #[error("Playback worker failed: {0}")]
    WorkerFailed(String),
}
