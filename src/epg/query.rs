//! Point-in-time and range queries over a channel's sorted program list

use chrono::{DateTime, Utc};

use super::cache::ScheduleCache;
use super::types::{Channel, Program};
use crate::interval::{first_containing, Interval};

/// Program airing at `now`; under overlapping input the earliest start wins.
pub fn current_program(channel: &Channel, now: DateTime<Utc>) -> Option<&Program> {
    first_containing(&channel.programs, now)
}

/// Up to `count` programs starting strictly after `now`, in start order
pub fn next_programs(channel: &Channel, now: DateTime<Utc>, count: usize) -> &[Program] {
    let first = channel.programs.partition_point(|p| p.start <= now);
    let upcoming = &channel.programs[first..];
    &upcoming[..upcoming.len().min(count)]
}

/// Programs intersecting `[start, end)`, in start order
pub fn programs_in_range(channel: &Channel, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<&Program> {
    channel
        .programs
        .iter()
        .take_while(|p| p.start < end)
        .filter(|p| p.overlaps(start, end))
        .collect()
}

/// Query helpers resolving a channel id through the cache first.
/// A missing or stale channel is an empty result, never an error.
impl ScheduleCache {
    pub fn current_program(&self, channel_id: &str, now: DateTime<Utc>) -> Option<Program> {
        let channel = self.get(channel_id, now)?;
        current_program(&channel, now).cloned()
    }

    pub fn next_programs(&self, channel_id: &str, now: DateTime<Utc>, count: usize) -> Vec<Program> {
        self.get(channel_id, now)
            .map(|channel| next_programs(&channel, now, count).to_vec())
            .unwrap_or_default()
    }

    /// `now` is only used for the freshness check
    pub fn programs_in_range(
        &self,
        channel_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Vec<Program> {
        self.get(channel_id, now)
            .map(|channel| programs_in_range(&channel, start, end).into_iter().cloned().collect())
            .unwrap_or_default()
    }
}
