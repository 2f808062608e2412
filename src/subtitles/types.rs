use std::fmt;

use serde::{Deserialize, Serialize};

use crate::interval::{is_valid_span, Interval};

/// One subtitle cue, times in seconds from the start of playback
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cue {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

impl Cue {
    /// `None` for empty or inverted time ranges
    pub fn new(start: f64, end: f64, text: impl Into<String>) -> Option<Self> {
        is_valid_span(&start, &end).then(|| Self {
            start,
            end,
            text: text.into(),
        })
    }

    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

impl Interval for Cue {
    type Point = f64;

    fn start(&self) -> f64 {
        self.start
    }

    fn end(&self) -> f64 {
        self.end
    }
}

/// Declared format of a subtitle track
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum CueFormat {
    /// SubRip: numbered blocks separated by blank lines
    Srt,
    /// WebVTT: header followed by `-->` marker lines
    Vtt,
    /// Anything else, e.g. "ass"; parses to no cues
    Unsupported(String),
}

impl CueFormat {
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "srt" | "subrip" => CueFormat::Srt,
            "vtt" | "webvtt" => CueFormat::Vtt,
            other => CueFormat::Unsupported(other.to_string()),
        }
    }

    /// Guess from a URL or path extension, ignoring any query string
    pub fn from_url(url: &str) -> Self {
        let path = url.split(['?', '#']).next().unwrap_or(url);
        let ext = path.rsplit_once('.').map(|(_, ext)| ext).unwrap_or("");
        Self::from_name(ext)
    }

    pub fn name(&self) -> &str {
        match self {
            CueFormat::Srt => "srt",
            CueFormat::Vtt => "vtt",
            CueFormat::Unsupported(name) => name,
        }
    }
}

impl fmt::Display for CueFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl From<String> for CueFormat {
    fn from(name: String) -> Self {
        Self::from_name(&name)
    }
}

impl From<CueFormat> for String {
    fn from(format: CueFormat) -> Self {
        format.name().to_string()
    }
}

/// A selectable subtitle track
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubtitleTrack {
    pub id: String,
    pub language: String,
    pub label: String,
    pub url: String,
    #[serde(rename = "type")]
    pub format: CueFormat,
}

impl SubtitleTrack {
    pub fn new(id: impl Into<String>, url: impl Into<String>, format: CueFormat) -> Self {
        let id = id.into();
        Self {
            label: id.clone(),
            id,
            language: String::new(),
            url: url.into(),
            format,
        }
    }
}
