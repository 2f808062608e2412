//! Guide records: programs and the channels that own them

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::interval::{is_valid_span, Interval};

/// A single TV program/show
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Program {
    /// Derived from channel id and start, stable across re-parses
    pub id: String,
    /// Channel ID this program belongs to
    pub channel_id: String,
    pub title: String,
    /// Empty when the source has none
    pub description: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub start: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub end: DateTime<Utc>,
    /// Category/genre (optional)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Program icon/poster URL (optional)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

impl Program {
    /// Build a program, or `None` if the interval is empty or inverted.
    pub fn new(
        channel_id: impl Into<String>,
        title: impl Into<String>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Option<Self> {
        if !is_valid_span(&start, &end) {
            return None;
        }
        let channel_id = channel_id.into();
        Some(Self {
            id: Self::id_for(&channel_id, start),
            channel_id,
            title: title.into(),
            description: String::new(),
            start,
            end,
            category: None,
            icon: None,
        })
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_category(mut self, category: Option<String>) -> Self {
        self.category = category;
        self
    }

    pub fn with_icon(mut self, icon: Option<String>) -> Self {
        self.icon = icon;
        self
    }

    pub fn id_for(channel_id: &str, start: DateTime<Utc>) -> String {
        format!("{}-{}", channel_id, start.timestamp_millis())
    }

    pub fn duration_minutes(&self) -> i64 {
        (self.end - self.start).num_minutes()
    }

    /// Elapsed share of the program at `now`, clamped to 0..=100
    pub fn progress_percent(&self, now: DateTime<Utc>) -> f32 {
        if now <= self.start {
            return 0.0;
        }
        if now >= self.end {
            return 100.0;
        }
        let elapsed = (now - self.start).num_milliseconds() as f64;
        let total = (self.end - self.start).num_milliseconds() as f64;
        (elapsed / total * 100.0) as f32
    }
}

impl Interval for Program {
    type Point = DateTime<Utc>;

    fn start(&self) -> DateTime<Utc> {
        self.start
    }

    fn end(&self) -> DateTime<Utc> {
        self.end
    }
}

/// Channel information from the guide, with its programs sorted by start
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    pub id: String,
    /// Display name, falls back to the id
    pub name: String,
    pub programs: Vec<Program>,
}

impl Channel {
    pub fn new(id: impl Into<String>, name: Option<String>) -> Self {
        let id = id.into();
        let name = name.filter(|n| !n.is_empty()).unwrap_or_else(|| id.clone());
        Self {
            id,
            name,
            programs: Vec::new(),
        }
    }

    /// Stable sort by start time; source order breaks ties.
    pub fn sort_programs(&mut self) {
        self.programs.sort_by_key(|p| p.start);
    }
}
