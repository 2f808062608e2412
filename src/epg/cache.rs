//! Schedule cache keyed by channel id
//!
//! Entries are replaced wholesale by `put` and expire once older than the
//! retention window. Expired entries are dropped lazily when read. Every
//! `put` also writes a snapshot of all fresh entries to the blob store so a
//! later failed refresh (or a cold start) can fall back to it. Channels from
//! separate sources share the one snapshot, each with its own fetch time.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use chrono::{DateTime, TimeDelta, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use super::types::Channel;
use crate::store::BlobStore;

/// Default retention window: 1 hour
pub const DEFAULT_RETENTION_SECS: i64 = 3600;

/// Blob store key of the persisted snapshot
pub const SNAPSHOT_KEY: &str = "guide_engine.epg";

/// A channel as fetched at a given instant
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub channel: Arc<Channel>,
    pub fetched_at: DateTime<Utc>,
}

/// Persisted form of every channel fresh at the last `put`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub channels: Vec<Channel>,
    /// Latest fetch time in the snapshot, epoch millis
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    /// Epoch millis per channel id, for channels fetched before `timestamp`
    #[serde(default, rename = "fetchedAt", skip_serializing_if = "HashMap::is_empty")]
    pub fetched_at: HashMap<String, i64>,
}

impl Snapshot {
    /// When `channel_id` was fetched; `timestamp` unless listed otherwise
    pub fn fetched_at(&self, channel_id: &str) -> DateTime<Utc> {
        self.fetched_at
            .get(channel_id)
            .and_then(|&ms| DateTime::from_timestamp_millis(ms))
            .unwrap_or(self.timestamp)
    }
}

pub struct ScheduleCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    retention: TimeDelta,
    store: Option<Arc<dyn BlobStore>>,
    /// Orders snapshot writes so the last one written saw every earlier put
    persist: Mutex<()>,
}

impl ScheduleCache {
    /// In-memory cache without persistence
    pub fn new(retention: TimeDelta) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            retention,
            store: None,
            persist: Mutex::new(()),
        }
    }

    pub fn with_store(retention: TimeDelta, store: Arc<dyn BlobStore>) -> Self {
        Self {
            store: Some(store),
            ..Self::new(retention)
        }
    }

    pub fn retention(&self) -> TimeDelta {
        self.retention
    }

    fn is_fresh(&self, fetched_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        now - fetched_at <= self.retention
    }

    /// Replace the entry of every given channel and persist a snapshot.
    pub fn put(&self, channels: Vec<Channel>, now: DateTime<Utc>) {
        let _persist = self.persist.lock().unwrap_or_else(PoisonError::into_inner);
        self.insert_all(channels, now);
        self.persist_snapshot(now);
    }

    fn insert_all(&self, channels: Vec<Channel>, fetched_at: DateTime<Utc>) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        for channel in channels {
            entries.insert(
                channel.id.clone(),
                CacheEntry {
                    channel: Arc::new(channel),
                    fetched_at,
                },
            );
        }
    }

    fn persist_snapshot(&self, now: DateTime<Utc>) {
        let Some(store) = &self.store else {
            return;
        };

        let mut fresh: Vec<(Arc<Channel>, DateTime<Utc>)> = {
            let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
            entries
                .values()
                .filter(|entry| self.is_fresh(entry.fetched_at, now))
                .map(|entry| (Arc::clone(&entry.channel), entry.fetched_at))
                .collect()
        };
        fresh.sort_by(|a, b| a.0.id.cmp(&b.0.id));

        #[derive(Serialize)]
        struct SnapshotRef<'a> {
            channels: Vec<&'a Channel>,
            #[serde(with = "chrono::serde::ts_milliseconds")]
            timestamp: DateTime<Utc>,
            #[serde(rename = "fetchedAt", skip_serializing_if = "HashMap::is_empty")]
            fetched_at: HashMap<&'a str, i64>,
        }

        let timestamp = fresh.iter().map(|(_, t)| *t).max().unwrap_or(now);
        let snapshot = SnapshotRef {
            channels: fresh.iter().map(|(channel, _)| channel.as_ref()).collect(),
            timestamp,
            fetched_at: fresh
                .iter()
                .filter(|(_, t)| *t != timestamp)
                .map(|(channel, t)| (channel.id.as_str(), t.timestamp_millis()))
                .collect(),
        };

        let result = serde_json::to_vec(&snapshot)
            .map_err(crate::error::EngineError::from)
            .and_then(|bytes| store.set(SNAPSHOT_KEY, &bytes));
        if let Err(e) = result {
            warn!("Failed to persist guide snapshot: {}", e);
        }
    }

    /// Cached channel, if present and not older than the retention window
    pub fn get(&self, channel_id: &str, now: DateTime<Utc>) -> Option<Arc<Channel>> {
        {
            let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
            let entry = entries.get(channel_id)?;
            if self.is_fresh(entry.fetched_at, now) {
                return Some(Arc::clone(&entry.channel));
            }
        }

        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        // Re-check: a put may have landed between the two locks
        match entries.get(channel_id) {
            Some(entry) if self.is_fresh(entry.fetched_at, now) => Some(Arc::clone(&entry.channel)),
            Some(_) => {
                debug!("Evicting stale guide entry for channel {}", channel_id);
                entries.remove(channel_id);
                None
            }
            None => None,
        }
    }

    /// Ids of all cached channels, stale or not
    pub fn channel_ids(&self) -> Vec<String> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let mut ids: Vec<String> = entries.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Persisted snapshot, if present, readable and within the retention window
    pub fn load_snapshot(&self, now: DateTime<Utc>) -> Option<Snapshot> {
        let store = self.store.as_ref()?;
        let bytes = match store.get(SNAPSHOT_KEY) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                warn!("Guide snapshot retrieval failed: {}", e);
                return None;
            }
        };

        let snapshot: Snapshot = match serde_json::from_slice(&bytes) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("Ignoring unreadable guide snapshot: {}", e);
                return None;
            }
        };

        if !self.is_fresh(snapshot.timestamp, now) {
            debug!("Guide snapshot from {} is stale", snapshot.timestamp);
            return None;
        }
        Some(snapshot)
    }

    /// Load the persisted snapshot into memory. Each channel keeps its
    /// original fetch time so it expires on schedule; stale channels and
    /// channels already held with newer data are left out. Returns the
    /// channels restored.
    pub fn warm_from_store(&self, now: DateTime<Utc>) -> Vec<Channel> {
        let Some(snapshot) = self.load_snapshot(now) else {
            return Vec::new();
        };
        let times: Vec<DateTime<Utc>> = snapshot.channels.iter().map(|c| snapshot.fetched_at(&c.id)).collect();

        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let mut restored = Vec::new();
        for (channel, fetched_at) in snapshot.channels.into_iter().zip(times) {
            if !self.is_fresh(fetched_at, now) {
                debug!("Snapshot entry for channel {} is stale", channel.id);
                continue;
            }
            if entries.get(&channel.id).is_some_and(|e| e.fetched_at > fetched_at) {
                continue;
            }
            entries.insert(
                channel.id.clone(),
                CacheEntry {
                    channel: Arc::new(channel.clone()),
                    fetched_at,
                },
            );
            restored.push(channel);
        }
        restored
    }

    /// Drop every entry and the persisted snapshot
    pub fn clear(&self) {
        let _persist = self.persist.lock().unwrap_or_else(PoisonError::into_inner);
        self.entries.write().unwrap_or_else(PoisonError::into_inner).clear();
        if let Some(store) = &self.store {
            if let Err(e) = store.remove(SNAPSHOT_KEY) {
                warn!("Guide snapshot clear failed: {}", e);
            }
        }
    }
}

impl Default for ScheduleCache {
    fn default() -> Self {
        Self::new(TimeDelta::seconds(DEFAULT_RETENTION_SECS))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::epg::types::Program;
    use crate::store::MemoryBlobStore;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, h, m, 0).unwrap()
    }

    fn channel(id: &str) -> Channel {
        let mut c = Channel::new(id, None);
        c.programs.push(Program::new(id, "Show", at(18, 0), at(19, 0)).unwrap());
        c
    }

    #[test]
    fn test_retention_boundary() {
        let cache = ScheduleCache::default();
        let fetched = at(12, 0);
        cache.put(vec![channel("5")], fetched);

        let window = TimeDelta::seconds(DEFAULT_RETENTION_SECS);
        let ms = TimeDelta::milliseconds(1);
        assert!(cache.get("5", fetched + window - ms).is_some());
        assert!(cache.get("5", fetched + window).is_some());
        assert!(cache.get("5", fetched + window + ms).is_none());
    }

    #[test]
    fn test_stale_entry_is_evicted() {
        let cache = ScheduleCache::default();
        cache.put(vec![channel("5"), channel("7")], at(12, 0));
        assert_eq!(cache.len(), 2);

        assert!(cache.get("5", at(14, 0)).is_none());
        assert_eq!(cache.channel_ids(), vec!["7".to_string()]);
        // Even going back in time does not resurrect it
        assert!(cache.get("5", at(12, 0)).is_none());
    }

    #[test]
    fn test_put_replaces_wholesale() {
        let cache = ScheduleCache::default();
        cache.put(vec![channel("5")], at(12, 0));

        let mut updated = Channel::new("5", Some("Five".into()));
        updated.programs.clear();
        cache.put(vec![updated], at(12, 30));

        let got = cache.get("5", at(13, 15)).unwrap();
        assert_eq!(got.name, "Five");
        assert!(got.programs.is_empty());
    }

    #[test]
    fn test_put_persists_snapshot() {
        let store = Arc::new(MemoryBlobStore::new());
        let cache = ScheduleCache::with_store(TimeDelta::hours(1), store.clone());
        cache.put(vec![channel("5")], at(12, 0));

        let raw = store.get(SNAPSHOT_KEY).unwrap().unwrap();
        let json: serde_json::Value = serde_json::from_slice(&raw).unwrap();
        assert_eq!(json["timestamp"], at(12, 0).timestamp_millis());
        assert_eq!(json["channels"][0]["id"], "5");
        assert_eq!(json["channels"][0]["programs"][0]["channelId"], "5");
    }

    #[test]
    fn test_warm_from_store_keeps_original_fetch_time() {
        let store = Arc::new(MemoryBlobStore::new());
        ScheduleCache::with_store(TimeDelta::hours(1), store.clone()).put(vec![channel("5")], at(12, 0));

        let cache = ScheduleCache::with_store(TimeDelta::hours(1), store);
        assert_eq!(cache.warm_from_store(at(12, 30)).len(), 1);
        assert!(cache.get("5", at(12, 45)).is_some());
        assert!(cache.get("5", at(13, 1)).is_none());
    }

    #[test]
    fn test_snapshot_merges_puts_from_separate_sources() {
        let store = Arc::new(MemoryBlobStore::new());
        let cache = ScheduleCache::with_store(TimeDelta::hours(1), store.clone());
        cache.put(vec![channel("a")], at(12, 0));
        cache.put(vec![channel("b")], at(12, 20));

        let raw = store.get(SNAPSHOT_KEY).unwrap().unwrap();
        let json: serde_json::Value = serde_json::from_slice(&raw).unwrap();
        assert_eq!(json["timestamp"], at(12, 20).timestamp_millis());
        assert_eq!(json["fetchedAt"]["a"], at(12, 0).timestamp_millis());
        assert!(json["fetchedAt"].get("b").is_none());

        let restarted = ScheduleCache::with_store(TimeDelta::hours(1), store);
        let restored = restarted.warm_from_store(at(12, 30));
        let mut ids: Vec<&str> = restored.iter().map(|c| c.id.as_str()).collect();
        ids.sort_unstable();
        assert_eq!(ids, vec!["a", "b"]);

        // Each channel expires on its own fetch time
        assert!(restarted.get("a", at(13, 5)).is_none());
        assert!(restarted.get("b", at(13, 5)).is_some());
    }

    #[test]
    fn test_snapshot_drops_channels_that_went_stale() {
        let store = Arc::new(MemoryBlobStore::new());
        let cache = ScheduleCache::with_store(TimeDelta::hours(1), store.clone());
        cache.put(vec![channel("a")], at(12, 0));
        cache.put(vec![channel("b")], at(13, 30));

        let snapshot = cache.load_snapshot(at(13, 40)).unwrap();
        let ids: Vec<&str> = snapshot.channels.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["b"]);
    }

    #[test]
    fn test_warm_start_keeps_newer_memory_entries() {
        let store = Arc::new(MemoryBlobStore::new());
        ScheduleCache::with_store(TimeDelta::hours(1), store.clone()).put(vec![channel("a")], at(12, 0));

        let cache = ScheduleCache::with_store(TimeDelta::hours(1), store.clone());
        let mut newer = Channel::new("a", Some("Newer".into()));
        newer.programs.clear();
        cache.insert_all(vec![newer], at(12, 10));

        assert!(cache.warm_from_store(at(12, 15)).is_empty());
        assert_eq!(cache.get("a", at(12, 15)).unwrap().name, "Newer");
    }

    #[test]
    fn test_stale_or_corrupt_snapshot_is_ignored() {
        let store = Arc::new(MemoryBlobStore::new());
        let cache = ScheduleCache::with_store(TimeDelta::hours(1), store.clone());
        cache.put(vec![channel("5")], at(12, 0));
        assert!(cache.load_snapshot(at(14, 0)).is_none());

        store.set(SNAPSHOT_KEY, b"not json").unwrap();
        assert!(cache.load_snapshot(at(12, 10)).is_none());
        assert!(cache.warm_from_store(at(12, 10)).is_empty());
    }

    #[test]
    fn test_clear_removes_memory_and_snapshot() {
        let store = Arc::new(MemoryBlobStore::new());
        let cache = ScheduleCache::with_store(TimeDelta::hours(1), store.clone());
        cache.put(vec![channel("5")], at(12, 0));

        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(store.get(SNAPSHOT_KEY).unwrap(), None);
    }

    #[test]
    fn test_concurrent_puts_on_distinct_keys() {
        let cache = Arc::new(ScheduleCache::default());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || cache.put(vec![channel(&format!("ch{}", i))], at(12, 0)))
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(cache.len(), 8);
        for i in 0..8 {
            assert!(cache.get(&format!("ch{}", i), at(12, 5)).is_some());
        }
    }
}
