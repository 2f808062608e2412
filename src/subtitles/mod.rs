//! Subtitle module
//!
//! SRT and WebVTT cue parsing, active-cue lookup and the track selection.

mod parser;
mod query;
mod selection;
mod types;

pub use parser::{parse_cues, parse_srt, parse_vtt};
pub use query::{active_cue, CueCursor};
pub use selection::{LoadOutcome, SubtitleSelection};
pub use types::{Cue, CueFormat, SubtitleTrack};

/// Format playback seconds as H:MM:SS.mmm for display
pub fn format_media_time(seconds: f64) -> String {
    let total_ms = (seconds.max(0.0) * 1000.0).round() as u64;
    let ms = total_ms % 1000;
    let secs = (total_ms / 1000) % 60;
    let mins = (total_ms / 60_000) % 60;
    let hours = total_ms / 3_600_000;
    format!("{}:{:02}:{:02}.{:03}", hours, mins, secs, ms)
}
