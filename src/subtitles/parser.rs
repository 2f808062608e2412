//! Cue parsers for SubRip (sequential blocks) and WebVTT (cue markers)
//!
//! Both are line scanners. A block that fails to parse is dropped on its own
//! and scanning resumes at the next line after it, so one corrupt cue never
//! shifts the cues that follow.

use log::{debug, warn};

use super::types::{Cue, CueFormat};
use crate::error::{EngineError, Result};
use crate::timestamp::parse_media_time;

const ARROW: &str = "-->";

/// Parse a track body according to its declared format.
/// Unsupported formats give an empty list and a warning.
pub fn parse_cues(format: &CueFormat, content: &str) -> Vec<Cue> {
    match parser_for(format) {
        Ok(parse) => parse(content),
        Err(e) => {
            warn!("{}; showing no subtitles", e);
            Vec::new()
        }
    }
}

fn parser_for(format: &CueFormat) -> Result<fn(&str) -> Vec<Cue>> {
    match format {
        CueFormat::Srt => Ok(parse_srt),
        CueFormat::Vtt => Ok(parse_vtt),
        CueFormat::Unsupported(name) => Err(EngineError::UnsupportedFormat(name.clone())),
    }
}

/// Parse SubRip: index line, `HH:MM:SS,mmm --> HH:MM:SS,mmm`, one or more text lines
pub fn parse_srt(content: &str) -> Vec<Cue> {
    let mut cues = Vec::new();
    let mut block: Vec<&str> = Vec::new();

    for line in content.lines().chain(std::iter::once("")) {
        let line = line.trim_end_matches('\r');
        if !line.trim().is_empty() {
            block.push(line);
            continue;
        }
        if block.is_empty() {
            continue;
        }

        if block.len() < 3 {
            debug!("Skipping SRT block with {} lines", block.len());
        } else {
            match parse_time_range(block[1], ',') {
                Ok((start, end)) => push_cue(&mut cues, start, end, block[2..].join("\n")),
                Err(e) => debug!("Skipping SRT block {:?}: {}", block[0], e),
            }
        }
        block.clear();
    }

    sort_cues(&mut cues);
    cues
}

/// Parse WebVTT: optional header, then marker lines each followed by text
/// lines up to the next blank line
pub fn parse_vtt(content: &str) -> Vec<Cue> {
    let lines: Vec<&str> = content.lines().map(|l| l.trim_end_matches('\r')).collect();
    let mut cues = Vec::new();

    // Skip the WEBVTT header and anything else before the first marker
    let mut i = lines.iter().position(|l| l.contains(ARROW)).unwrap_or(lines.len());

    while i < lines.len() {
        let line = lines[i];
        if !line.contains(ARROW) {
            i += 1;
            continue;
        }

        let text_start = i + 1;
        let text_end = lines[text_start..]
            .iter()
            .position(|l| l.trim().is_empty())
            .map_or(lines.len(), |p| text_start + p);

        match parse_time_range(line, '.') {
            Ok((start, end)) if text_end > text_start => {
                push_cue(&mut cues, start, end, lines[text_start..text_end].join("\n"));
            }
            Ok(_) => debug!("Skipping VTT cue without text at line {}", i + 1),
            Err(e) => debug!("Skipping VTT cue at line {}: {}", i + 1, e),
        }

        i = text_end + 1;
    }

    sort_cues(&mut cues);
    cues
}

/// Parse "start --> end [settings]" with the given decimal separator
fn parse_time_range(line: &str, decimal: char) -> Result<(f64, f64)> {
    let (left, right) = line
        .split_once(ARROW)
        .ok_or_else(|| EngineError::MalformedTimestamp(format!("no {} in {:?}", ARROW, line)))?;

    let start = left.trim();
    // WebVTT allows cue settings after the end time
    let end = right.split_whitespace().next().unwrap_or("");

    for stamp in [start, end] {
        let other = if decimal == ',' { '.' } else { ',' };
        if stamp.contains(other) {
            return Err(EngineError::MalformedTimestamp(format!(
                "expected '{}' before milliseconds in {:?}",
                decimal, stamp
            )));
        }
    }

    Ok((parse_media_time(start)?, parse_media_time(end)?))
}

fn push_cue(cues: &mut Vec<Cue>, start: f64, end: f64, text: String) {
    match Cue::new(start, end, text) {
        Some(cue) => cues.push(cue),
        None => debug!("Skipping empty cue {}..{}", start, end),
    }
}

/// Stable sort by start so the playback cursor can rely on order
fn sort_cues(cues: &mut [Cue]) {
    cues.sort_by(|a, b| a.start.total_cmp(&b.start));
}

#[cfg(test)]
#[path = "parser_tests.rs"]
mod tests;
