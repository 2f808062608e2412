//! EPG (Electronic Program Guide) module
//!
//! Contains the XMLTV parser, the schedule cache and the query layer.

mod cache;
mod parser;
mod query;
mod service;
mod types;

// Re-export public types
pub use cache::{CacheEntry, ScheduleCache, Snapshot, DEFAULT_RETENTION_SECS, SNAPSHOT_KEY};
pub use parser::{ParseReport, ParsedGuide, ScheduleParser, UNKNOWN_TITLE};
pub use query::{current_program, next_programs, programs_in_range};
pub use service::{GuideService, RefreshOutcome};
pub use types::{Channel, Program};

use chrono::{DateTime, Local, Utc};

/// Format an instant as local time HH:MM
pub fn format_time(ts: DateTime<Utc>) -> String {
    ts.with_timezone(&Local).format("%H:%M").to_string()
}

/// Format an instant as local datetime YYYY-MM-DD HH:MM
pub fn format_datetime(ts: DateTime<Utc>) -> String {
    ts.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string()
}
