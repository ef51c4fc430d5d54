//! Line-oriented parser for the score text format
//!
//! ```text
//! bpm 120
//! num_parts 1
//! part
//!   num_notes 2
//!   0:0 60 32 1.0
//!   1:0 67 32 1.0
//! end
//! ```
//!
//! Lines starting with `#` are comments; blank lines and surrounding
//! whitespace are ignored. Every error carries the 1-indexed line it was
//! found on, and any error aborts the load; the engine never plays a
//! half-parsed song.

use thiserror::Error;

use super::{Note, Part, Song, DIVS_PER_BEAT};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("line {line}: {message}")]
pub struct ParseError {
    /// 1-indexed line the error was found on.
    pub line: usize,
    pub message: String,
}

impl ParseError {
    fn new(line: usize, message: impl Into<String>) -> Self {
        ParseError {
            line,
            message: message.into(),
        }
    }
}

/// Parses a complete score. The same input always produces a structurally
/// equal [`Song`].
pub fn parse_song(source: &str) -> Result<Song, ParseError> {
    let mut bpm: Option<u32> = None;
    let mut num_parts: Option<usize> = None;
    let mut parts: Vec<Part> = Vec::new();

    let mut in_part = false;
    let mut declared_notes: Option<usize> = None;

    let mut line_no = 0;
    for raw in source.lines() {
        line_no += 1;
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let mut tokens = line.split_whitespace();
        let head = tokens.next().unwrap();

        match head {
            "bpm" => {
                bpm = Some(parse_int(&mut tokens, line_no, "bpm")?);
            }
            "num_parts" => {
                let n: usize = parse_int(&mut tokens, line_no, "num_parts")?;
                num_parts = Some(n);
                parts.reserve(n);
            }
            "part" => {
                if bpm.is_none() || num_parts.is_none() {
                    return Err(ParseError::new(
                        line_no,
                        "part definitions must come after bpm and num_parts",
                    ));
                }
                if in_part {
                    return Err(ParseError::new(line_no, "parts cannot be nested"));
                }
                if parts.len() >= num_parts.unwrap() {
                    return Err(ParseError::new(line_no, "more parts than declared"));
                }
                in_part = true;
                declared_notes = None;
                parts.push(Part::default());
            }
            "end" => {
                if !in_part {
                    return Err(ParseError::new(line_no, "'end' outside of a part"));
                }
                let part = parts.last().unwrap();
                if let Some(declared) = declared_notes {
                    if part.notes.len() != declared {
                        return Err(ParseError::new(
                            line_no,
                            format!(
                                "part declares {} notes but contains {}",
                                declared,
                                part.notes.len()
                            ),
                        ));
                    }
                }
                in_part = false;
            }
            "num_notes" => {
                if !in_part {
                    return Err(ParseError::new(line_no, "num_notes outside of a part"));
                }
                declared_notes = Some(parse_int(&mut tokens, line_no, "num_notes")?);
            }
            _ => {
                if !in_part {
                    return Err(ParseError::new(
                        line_no,
                        format!("unexpected token '{}'", head),
                    ));
                }
                let Some(declared) = declared_notes else {
                    return Err(ParseError::new(
                        line_no,
                        "num_notes must be declared before any notes",
                    ));
                };
                let part = parts.last_mut().unwrap();
                if part.notes.len() >= declared {
                    return Err(ParseError::new(line_no, "more notes than declared"));
                }
                part.notes.push(parse_note(head, &mut tokens, line_no)?);
            }
        }

        if let Some(extra) = tokens.next() {
            return Err(ParseError::new(
                line_no,
                format!("trailing token '{}'", extra),
            ));
        }
    }

    if in_part {
        return Err(ParseError::new(line_no, "unterminated part at end of file"));
    }

    let bpm = bpm.ok_or_else(|| ParseError::new(line_no, "missing bpm"))?;
    let num_parts = num_parts.ok_or_else(|| ParseError::new(line_no, "missing num_parts"))?;
    if parts.len() != num_parts {
        return Err(ParseError::new(
            line_no,
            format!("declared {} parts but found {}", num_parts, parts.len()),
        ));
    }

    // The scheduler walks each part front to back and only looks at the
    // next undispatched note, so the sorted order is load-bearing.
    for part in &mut parts {
        part.notes.sort_by_key(|n| (n.beat, n.division));
    }

    Ok(Song {
        bpm,
        beats_per_bar: 4,
        parts,
    })
}

fn parse_int<'a, T, I>(tokens: &mut I, line: usize, after: &str) -> Result<T, ParseError>
where
    T: std::str::FromStr,
    I: Iterator<Item = &'a str>,
{
    let token = tokens
        .next()
        .ok_or_else(|| ParseError::new(line, format!("expected an integer after {}", after)))?;
    token
        .parse()
        .map_err(|_| ParseError::new(line, format!("invalid integer '{}' after {}", token, after)))
}

/// Parses one `beat:div pitch duration velocity` line. `position` is the
/// already-consumed first token.
fn parse_note<'a, I>(position: &str, tokens: &mut I, line: usize) -> Result<Note, ParseError>
where
    I: Iterator<Item = &'a str>,
{
    let (beat_str, div_str) = position.split_once(':').ok_or_else(|| {
        ParseError::new(line, format!("expected beat:division, found '{}'", position))
    })?;
    let beat: u32 = beat_str
        .parse()
        .map_err(|_| ParseError::new(line, format!("invalid beat '{}'", beat_str)))?;
    let division: u32 = div_str
        .parse()
        .map_err(|_| ParseError::new(line, format!("invalid division '{}'", div_str)))?;
    if division >= DIVS_PER_BEAT {
        return Err(ParseError::new(
            line,
            format!("division {} out of range 0..{}", division, DIVS_PER_BEAT),
        ));
    }

    let pitch: i32 = next_field(tokens, line, "pitch")?;
    let duration: u32 = next_field(tokens, line, "duration")?;
    let velocity: f32 = next_field(tokens, line, "velocity")?;

    Ok(Note {
        pitch,
        beat,
        division,
        duration,
        velocity: velocity.clamp(0.0, 1.0),
    })
}

fn next_field<'a, T, I>(tokens: &mut I, line: usize, what: &str) -> Result<T, ParseError>
where
    T: std::str::FromStr,
    I: Iterator<Item = &'a str>,
{
    let token = tokens
        .next()
        .ok_or_else(|| ParseError::new(line, format!("note is missing its {}", what)))?;
    token
        .parse()
        .map_err(|_| ParseError::new(line, format!("invalid {} '{}'", what, token)))
}
