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

mod terminal;

use anyhow::{Context, Result, bail};
use clap::{ArgAction, Parser, ValueEnum};
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use g13_macro::error::SinkError;
use g13_macro::parser::parse_macro;
use g13_macro::sink::{EventWriterSink, OutputSink, SinkProvider, TracingSink};
use g13_macro::types::{Macro, PlaybackEvent, PlaybackMode, PlaybackState, PlayerConfig};
use g13_macro::MacroPlayer;

use crate::terminal::{ControlCommand, KeyListener};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    Fast,
    Fixed,
    Recorded,
}

impl From<ModeArg> for PlaybackMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Fast => PlaybackMode::AsFast,
            ModeArg::Fixed => PlaybackMode::Fixed,
            ModeArg::Recorded => PlaybackMode::Recorded,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputArg {
    /// evdev-style `type code value` lines on stdout
    Events,
    /// Key events in the log only
    Log,
    /// No output device; key steps are skipped
    #[value(name = "none")]
    Off,
}

/// Play back a recorded G13 macro script
#[derive(Parser, Debug)]
#[command(name = "g13-macro", version)]
struct Args {
    /// Macro script to play
    script: PathBuf,

    /// Override the script's playback mode
    #[arg(long, value_enum)]
    mode: Option<ModeArg>,

    /// Override the speed multiplier (2.0 = twice as fast)
    #[arg(long, value_parser = parse_speed)]
    speed: Option<f64>,

    /// Override the fixed delay in milliseconds
    #[arg(long)]
    fixed_delay: Option<u64>,

    /// Override how many times the macro repeats
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    repeat: Option<u32>,

    #[arg(long, value_enum, default_value_t = OutputArg::Events)]
    output: OutputArg,

    /// Space/p pauses and resumes, q/Esc stops
    #[arg(short, long)]
    interactive: bool,

    /// Wait slice in milliseconds; bounds stop and pause latency
    #[arg(long, default_value_t = 10, value_parser = clap::value_parser!(u64).range(1..))]
    increment_ms: u64,

    /// More log output (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

fn parse_speed(s: &str) -> Result<f64, String> {
    let speed: f64 = s.parse().map_err(|_| format!("'{s}' is not a number"))?;
    if speed.is_finite() && speed > 0.0 {
        Ok(speed)
    } else {
        Err("speed must be a positive number".to_string())
    }
}

fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();
}

fn apply_overrides(macro_def: &mut Macro, args: &Args) {
    if let Some(mode) = args.mode {
        macro_def.playback_mode = mode.into();
    }
    if let Some(speed) = args.speed {
        macro_def.speed_multiplier = speed;
    }
    if let Some(ms) = args.fixed_delay {
        macro_def.fixed_delay_ms = ms;
    }
    if let Some(count) = args.repeat {
        macro_def.repeat_count = count;
    }
}

// Raw mode turns off \n -> \r\n translation
fn status(raw: bool, message: std::fmt::Arguments) {
    if raw {
        eprint!("{message}\r\n");
    } else {
        eprintln!("{message}");
    }
}

fn sink_provider(output: OutputArg, raw: bool) -> Option<Arc<dyn SinkProvider>> {
    match output {
        OutputArg::Events => Some(Arc::new(move || {
            let sink = EventWriterSink::new(std::io::stdout());
            let sink = if raw { sink.with_crlf() } else { sink };
            Ok::<_, SinkError>(Box::new(sink) as Box<dyn OutputSink>)
        })),
        OutputArg::Log => Some(Arc::new(|| {
            Ok::<_, SinkError>(Box::new(TracingSink) as Box<dyn OutputSink>)
        })),
        OutputArg::Off => None,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let source = std::fs::read_to_string(&args.script)
        .with_context(|| format!("Failed to read {}", args.script.display()))?;
    let mut macro_def = parse_macro(&source)
        .with_context(|| format!("Failed to parse {}", args.script.display()))?;
    apply_overrides(&mut macro_def, &args);

    eprintln!(
        "Playing '{}': {} steps, about {:.1}s",
        macro_def.name,
        macro_def.steps.len(),
        macro_def.estimated_duration().as_secs_f64()
    );

    let (commands_tx, mut commands) = mpsc::unbounded_channel();
    let ctrlc_tx = commands_tx.clone();
    ctrlc::set_handler(move || {
        let _ = ctrlc_tx.send(ControlCommand::Stop);
    })
    .context("Failed to install Ctrl-C handler")?;

    let listener = if args.interactive && std::io::stdin().is_terminal() {
        Some(KeyListener::spawn(commands_tx)?)
    } else {
        None
    };
    let raw = listener.is_some();

    let player = MacroPlayer::with_config(
        sink_provider(args.output, raw),
        PlayerConfig {
            wait_increment: Duration::from_millis(args.increment_ms),
        },
    );
    let mut events = player.subscribe();

    player.play(macro_def)?;

    let mut failed = false;
    loop {
        tokio::select! {
            Some(event) = events.recv() => match event {
                PlaybackEvent::StepExecuted { index, step } => {
                    info!(index, %step, "Step executed");
                }
                PlaybackEvent::PlaybackComplete => status(raw, format_args!("Playback complete")),
                PlaybackEvent::Error(message) => {
                    status(raw, format_args!("Playback error: {message}"));
                    failed = true;
                }
                PlaybackEvent::StateChanged(PlaybackState::Idle) => break,
                PlaybackEvent::StateChanged(state) => status(raw, format_args!("[{state}]")),
            },
            Some(command) = commands.recv() => match command {
                ControlCommand::TogglePause => player.toggle_pause(),
                ControlCommand::Stop => player.stop().await,
            },
            else => break,
        }
    }

    // Restore the terminal before anyhow prints the error
    drop(listener);

    if failed {
        bail!("Macro playback failed");
    }
    Ok(())
}
