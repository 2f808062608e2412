//! Program guide and subtitle timing engine
//!
//! Parses XMLTV guides into per-channel schedules with a time-bounded cache,
//! and SRT/WebVTT tracks into cue lists, answering "what is on / what is
//! shown at time t" queries over half-open intervals.

pub mod config;
pub mod epg;
pub mod error;
pub mod fetch;
pub mod interval;
pub mod store;
pub mod subtitles;
pub mod timestamp;

pub use config::EngineConfig;
pub use error::{EngineError, Result};
pub use fetch::{DownloadConfig, HttpFetcher, TextFetcher};
pub use interval::Interval;
pub use store::{BlobStore, FileBlobStore, MemoryBlobStore};
pub use timestamp::{parse_broadcast_time, parse_media_time, TimezonePolicy};
