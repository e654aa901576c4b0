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

//! Script parser for macro files
//!
//! Parses scripts with the format:
//! - @ directives (name, description, mode, fixed, speed, repeat)
//! - # comments, on their own line or after a command
//! - step lines: `press KEY_A @120`, `release KEY_A @200`,
//!   `delay 250 @300`, `button G5 @400`
//!
//! A step without `@timestamp` reuses the previous step's timestamp.

use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::{tag, take_till, take_while1},
    character::complete::{char, not_line_ending, space0, space1},
    combinator::{map, opt, value},
    sequence::preceded,
};
use thiserror::Error;

use crate::types::{Macro, PlaybackMode, StepAction};

#[derive(Error, Debug, PartialEq)]
pub enum ParseError {
    #[error("Line {line}: Parse error: {message}")]
    Syntax { line: usize, message: String },

    #[error("Line {line}: Unexpected text after command: '{text}'")]
    TrailingText { line: usize, text: String },

    #[error("Line {line}: Speed multiplier must be positive, got {value}")]
    InvalidSpeed { line: usize, value: f64 },

    #[error("Line {line}: Repeat count must be at least 1")]
    InvalidRepeat { line: usize },
}

#[derive(Debug, Clone, PartialEq)]
enum Line {
    Name(String),
    Description(String),
    Mode(PlaybackMode),
    FixedDelay(u64),
    Speed(f64),
    Repeat(u32),
    Step(StepAction, Option<u64>),
}

fn directive_prefix<'a>(
    name: &'static str,
) -> impl Parser<&'a str, Output = (), Error = nom::error::Error<&'a str>> {
    value((), (tag("@"), space0, tag(name), tag(":"), space0))
}

fn parse_text_directive(input: &str) -> IResult<&str, Line> {
    let (input, is_name) = alt((
        value(true, directive_prefix("name")),
        value(false, directive_prefix("description")),
    ))
    .parse(input)?;
    let (input, text) = take_till(|c: char| c == '#')(input)?;
    let text = text.trim().to_string();
    let line = if is_name {
        Line::Name(text)
    } else {
        Line::Description(text)
    };
    Ok((input, line))
}

fn parse_mode(input: &str) -> IResult<&str, Line> {
    let (input, _) = directive_prefix("mode").parse(input)?;
    let (input, mode) = alt((
        value(PlaybackMode::AsFast, alt((tag("as_fast"), tag("fast")))),
        value(PlaybackMode::Fixed, tag("fixed")),
        value(PlaybackMode::Recorded, tag("recorded")),
    ))
    .parse(input)?;
    Ok((input, Line::Mode(mode)))
}

fn parse_fixed(input: &str) -> IResult<&str, Line> {
    let (input, _) = directive_prefix("fixed").parse(input)?;
    let (input, ms) = nom::character::complete::u64(input)?;
    Ok((input, Line::FixedDelay(ms)))
}

fn parse_speed(input: &str) -> IResult<&str, Line> {
    let (input, _) = directive_prefix("speed").parse(input)?;
    let (input, speed) = nom::number::complete::double(input)?;
    Ok((input, Line::Speed(speed)))
}

fn parse_repeat(input: &str) -> IResult<&str, Line> {
    let (input, _) = directive_prefix("repeat").parse(input)?;
    let (input, count) = nom::character::complete::u32(input)?;
    Ok((input, Line::Repeat(count)))
}

fn parse_directive(input: &str) -> IResult<&str, Line> {
    alt((
        parse_text_directive,
        parse_mode,
        parse_fixed,
        parse_speed,
        parse_repeat,
    ))
    .parse(input)
}

fn identifier(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_ascii_alphanumeric() || c == '_')(input)
}

fn parse_timestamp(input: &str) -> IResult<&str, Option<u64>> {
    opt(preceded((space1, char('@')), nom::character::complete::u64)).parse(input)
}

fn parse_step(input: &str) -> IResult<&str, Line> {
    let (input, action) = alt((
        map(preceded((tag("press"), space1), identifier), |key| {
            StepAction::KeyPress(key.to_string())
        }),
        map(preceded((tag("release"), space1), identifier), |key| {
            StepAction::KeyRelease(key.to_string())
        }),
        map(
            preceded((tag("delay"), space1), nom::character::complete::u64),
            StepAction::Delay,
        ),
        map(preceded((tag("button"), space1), identifier), |button| {
            StepAction::DeviceButton(button.to_string())
        }),
    ))
    .parse(input)?;
    let (input, timestamp) = parse_timestamp(input)?;
    Ok((input, Line::Step(action, timestamp)))
}

fn parse_comment(input: &str) -> IResult<&str, ()> {
    let (input, _) = char('#')(input)?;
    let (input, _) = not_line_ending(input)?;
    Ok((input, ()))
}

fn parse_line(input: &str) -> IResult<&str, Option<Line>> {
    alt((
        map(parse_directive, Some),
        value(None, parse_comment),
        map(parse_step, Some),
    ))
    .parse(input)
}

pub fn parse_macro(input: &str) -> Result<Macro, ParseError> {
    let mut macro_def = Macro::default();
    let mut last_timestamp = 0;

    for (line_num, raw) in input.lines().enumerate() {
        let line = line_num + 1;
        let trimmed = raw.trim();

        if trimmed.is_empty() {
            continue;
        }

        let parsed = match parse_line(trimmed) {
            Ok((remaining, parsed)) => {
                let remaining = remaining.trim();
                if !remaining.is_empty() && !remaining.starts_with('#') {
                    return Err(ParseError::TrailingText {
                        line,
                        text: remaining.to_string(),
                    });
                }
                parsed
            }
            Err(e) => {
                return Err(ParseError::Syntax {
                    line,
                    message: e.to_string(),
                });
            }
        };

        match parsed {
            None => {}
            Some(Line::Name(name)) => macro_def.name = name,
            Some(Line::Description(text)) => macro_def.description = Some(text),
            Some(Line::Mode(mode)) => macro_def.playback_mode = mode,
            Some(Line::FixedDelay(ms)) => macro_def.fixed_delay_ms = ms,
            Some(Line::Speed(speed)) => {
                if !(speed.is_finite() && speed > 0.0) {
                    return Err(ParseError::InvalidSpeed { line, value: speed });
                }
                macro_def.speed_multiplier = speed;
            }
            Some(Line::Repeat(count)) => {
                if count == 0 {
                    return Err(ParseError::InvalidRepeat { line });
                }
                macro_def.repeat_count = count;
            }
            Some(Line::Step(action, timestamp)) => {
                let timestamp = timestamp.unwrap_or(last_timestamp);
                last_timestamp = timestamp;
                macro_def.add_step(action, timestamp);
            }
        }
    }

    Ok(macro_def)
}
