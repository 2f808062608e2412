//! Guide refresh: fetch, parse, cache, and fall back to the stored snapshot

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{channel, Receiver};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};

use super::cache::ScheduleCache;
use super::parser::{ParseReport, ScheduleParser};
use super::types::Program;
use crate::fetch::TextFetcher;

/// How a refresh ended
#[derive(Debug, Clone, PartialEq)]
pub enum RefreshOutcome {
    /// Fresh data fetched, parsed and cached
    Fetched {
        channels: usize,
        programs: usize,
        report: ParseReport,
    },
    /// Live data unavailable; the stored snapshot was loaded instead
    Restored { channels: usize },
    /// Nothing usable; queries answer with empty results
    NoData,
    /// A newer refresh of the same source started before this one finished;
    /// its result was dropped
    Superseded,
}

/// Schedule engine front: owns no globals, constructed once and shared via `Arc`
pub struct GuideService {
    cache: Arc<ScheduleCache>,
    fetcher: Arc<dyn TextFetcher>,
    parser: ScheduleParser,
    next_generation: AtomicU64,
    /// Latest refresh token per source URL. Held while a result is committed.
    refreshes: Mutex<HashMap<String, u64>>,
}

impl GuideService {
    pub fn new(cache: Arc<ScheduleCache>, fetcher: Arc<dyn TextFetcher>, parser: ScheduleParser) -> Self {
        Self {
            cache,
            fetcher,
            parser,
            next_generation: AtomicU64::new(0),
            refreshes: Mutex::new(HashMap::new()),
        }
    }

    pub fn cache(&self) -> &Arc<ScheduleCache> {
        &self.cache
    }

    fn lock_refreshes(&self) -> MutexGuard<'_, HashMap<String, u64>> {
        self.refreshes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim the newest token for `url`, superseding any refresh of it in flight
    fn begin_refresh(&self, url: &str) -> u64 {
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.lock_refreshes().insert(url.to_string(), generation);
        generation
    }

    /// Fetch and parse `url` on the calling thread.
    pub fn refresh(&self, url: &str, now: DateTime<Utc>) -> RefreshOutcome {
        let generation = self.begin_refresh(url);
        self.run_refresh(generation, url, || now)
    }

    /// Fetch and parse `url` on a background thread. The outcome arrives on
    /// the returned receiver; starting another refresh of the same URL
    /// supersedes this one. Refreshes of different URLs all commit.
    pub fn spawn_refresh(self: &Arc<Self>, url: impl Into<String>) -> Receiver<RefreshOutcome> {
        let (sender, receiver) = channel();
        let url = url.into();
        let generation = self.begin_refresh(&url);
        let service = Arc::clone(self);

        thread::spawn(move || {
            let outcome = service.run_refresh(generation, &url, Utc::now);
            let _ = sender.send(outcome);
        });

        receiver
    }

    fn run_refresh(&self, generation: u64, url: &str, now: impl Fn() -> DateTime<Utc>) -> RefreshOutcome {
        info!("Loading guide from: {}", url);
        let fetched = self
            .fetcher
            .fetch_text(url)
            .and_then(|text| self.parser.parse(&text));

        let refreshes = self.lock_refreshes();
        if refreshes.get(url) != Some(&generation) {
            debug!("Discarding superseded guide refresh #{} from {}", generation, url);
            return RefreshOutcome::Superseded;
        }

        match fetched {
            Ok(guide) => {
                let channels = guide.channels.len();
                let programs = guide.program_count();
                self.cache.put(guide.channels, now());
                RefreshOutcome::Fetched {
                    channels,
                    programs,
                    report: guide.report,
                }
            }
            Err(e) => {
                warn!("Guide refresh from {} failed: {}; using stored snapshot", url, e);
                self.restore(now())
            }
        }
    }

    /// Seed the cache from the stored snapshot, e.g. at startup
    pub fn warm_start(&self, now: DateTime<Utc>) -> RefreshOutcome {
        let _refreshes = self.lock_refreshes();
        self.restore(now)
    }

    fn restore(&self, now: DateTime<Utc>) -> RefreshOutcome {
        let restored = self.cache.warm_from_store(now);
        if restored.is_empty() {
            info!("No usable guide data available");
            RefreshOutcome::NoData
        } else {
            info!("Restored {} channels from stored guide snapshot", restored.len());
            RefreshOutcome::Restored {
                channels: restored.len(),
            }
        }
    }

    pub fn current_program(&self, channel_id: &str, now: DateTime<Utc>) -> Option<Program> {
        self.cache.current_program(channel_id, now)
    }

    pub fn next_programs(&self, channel_id: &str, now: DateTime<Utc>, count: usize) -> Vec<Program> {
        self.cache.next_programs(channel_id, now, count)
    }

    pub fn programs_in_range(
        &self,
        channel_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Vec<Program> {
        self.cache.programs_in_range(channel_id, start, end, now)
    }

    pub fn clear(&self) {
        let _refreshes = self.lock_refreshes();
        self.cache.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::scripted::ScriptedFetcher;
    use crate::store::MemoryBlobStore;
    use crate::timestamp::TimezonePolicy;
    use chrono::{TimeDelta, TimeZone};
    use std::time::Duration;

    const GUIDE_URL: &str = "http://example.com/epg.xml";

    const GUIDE: &str = r#"<tv>
  <channel id="5"><display-name>Five</display-name></channel>
  <programme start="20240101180000 +0000" stop="20240101190000 +0000" channel="5"><title>News</title></programme>
  <programme start="20240101190000 +0000" stop="20240101200000 +0000" channel="5"><title>Movie</title></programme>
</tv>"#;

    const OTHER_GUIDE: &str = r#"<tv>
  <channel id="5"><display-name>Five</display-name></channel>
  <programme start="20240101180000 +0000" stop="20240101200000 +0000" channel="5"><title>Marathon</title></programme>
</tv>"#;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, h, m, 0).unwrap()
    }

    fn service(fetcher: Arc<ScriptedFetcher>, store: Arc<MemoryBlobStore>) -> Arc<GuideService> {
        let cache = Arc::new(ScheduleCache::with_store(TimeDelta::hours(1), store));
        Arc::new(GuideService::new(
            cache,
            fetcher,
            ScheduleParser::new(TimezonePolicy::HonorOffset),
        ))
    }

    #[test]
    fn test_refresh_fetches_and_caches() {
        let fetcher = Arc::new(ScriptedFetcher::new());
        fetcher.respond(GUIDE_URL, GUIDE);
        let svc = service(fetcher, Arc::new(MemoryBlobStore::new()));

        match svc.refresh(GUIDE_URL, at(18, 0)) {
            RefreshOutcome::Fetched { channels, programs, .. } => {
                assert_eq!((channels, programs), (1, 2));
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(svc.current_program("5", at(18, 30)).unwrap().title, "News");
        assert_eq!(svc.next_programs("5", at(18, 30), 5).len(), 1);
    }

    #[test]
    fn test_failed_refresh_falls_back_to_snapshot() {
        let store = Arc::new(MemoryBlobStore::new());
        let fetcher = Arc::new(ScriptedFetcher::new());
        fetcher.respond(GUIDE_URL, GUIDE);
        service(fetcher.clone(), store.clone()).refresh(GUIDE_URL, at(18, 0));

        // A fresh process: empty memory, the source is now unreachable
        fetcher.fail(GUIDE_URL);
        let svc = service(fetcher, store);
        assert_eq!(svc.refresh(GUIDE_URL, at(18, 20)), RefreshOutcome::Restored { channels: 1 });
        assert_eq!(svc.current_program("5", at(18, 30)).unwrap().title, "News");
    }

    #[test]
    fn test_unparseable_source_falls_back_too() {
        let store = Arc::new(MemoryBlobStore::new());
        let fetcher = Arc::new(ScriptedFetcher::new());
        fetcher.respond(GUIDE_URL, GUIDE);
        service(fetcher.clone(), store.clone()).refresh(GUIDE_URL, at(18, 0));

        fetcher.respond(GUIDE_URL, "<html>maintenance</html>");
        let svc = service(fetcher, store);
        assert_eq!(svc.refresh(GUIDE_URL, at(18, 10)), RefreshOutcome::Restored { channels: 1 });
    }

    #[test]
    fn test_stale_snapshot_gives_no_data() {
        let store = Arc::new(MemoryBlobStore::new());
        let fetcher = Arc::new(ScriptedFetcher::new());
        fetcher.respond(GUIDE_URL, GUIDE);
        service(fetcher.clone(), store.clone()).refresh(GUIDE_URL, at(18, 0));

        fetcher.fail(GUIDE_URL);
        let svc = service(fetcher, store);
        assert_eq!(svc.refresh(GUIDE_URL, at(19, 30)), RefreshOutcome::NoData);
        assert!(svc.current_program("5", at(19, 30)).is_none());
        assert!(svc.next_programs("5", at(19, 30), 5).is_empty());
    }

    #[test]
    fn test_warm_start_and_clear() {
        let store = Arc::new(MemoryBlobStore::new());
        let fetcher = Arc::new(ScriptedFetcher::new());
        fetcher.respond(GUIDE_URL, GUIDE);
        service(fetcher.clone(), store.clone()).refresh(GUIDE_URL, at(18, 0));

        let svc = service(fetcher, store);
        assert_eq!(svc.warm_start(at(18, 5)), RefreshOutcome::Restored { channels: 1 });
        svc.clear();
        assert!(svc.current_program("5", at(18, 30)).is_none());
        assert_eq!(svc.warm_start(at(18, 5)), RefreshOutcome::NoData);
    }

    #[test]
    fn test_superseded_refresh_of_same_source_is_discarded() {
        let fetcher = Arc::new(ScriptedFetcher::new());
        fetcher.respond(GUIDE_URL, OTHER_GUIDE);
        let gate = fetcher.gate(GUIDE_URL);
        let svc = service(fetcher.clone(), Arc::new(MemoryBlobStore::new()));

        let slow = svc.spawn_refresh(GUIDE_URL);
        gate.entered.recv_timeout(Duration::from_secs(5)).unwrap();

        // The source changed while the first fetch was still in flight
        fetcher.respond(GUIDE_URL, GUIDE);
        assert!(matches!(svc.refresh(GUIDE_URL, Utc::now()), RefreshOutcome::Fetched { .. }));

        gate.release.send(()).unwrap();
        let outcome = slow.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(outcome, RefreshOutcome::Superseded);

        let channel = svc.cache().get("5", Utc::now()).unwrap();
        let titles: Vec<&str> = channel.programs.iter().map(|p| p.title.as_str()).collect();
        assert_eq!(titles, vec!["News", "Movie"]);
    }

    #[test]
    fn test_refreshes_of_different_sources_both_commit() {
        let other_url = "http://other.example.com/epg.xml";
        let other = r#"<tv>
  <channel id="9"><display-name>Nine</display-name></channel>
  <programme start="20240101180000 +0000" stop="20240101190000 +0000" channel="9"><title>Quiz</title></programme>
</tv>"#;
        let store = Arc::new(MemoryBlobStore::new());
        let fetcher = Arc::new(ScriptedFetcher::new());
        fetcher.respond(other_url, other);
        fetcher.respond(GUIDE_URL, GUIDE);
        let gate = fetcher.gate(other_url);
        let svc = service(fetcher.clone(), store.clone());

        let slow = svc.spawn_refresh(other_url);
        gate.entered.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(matches!(svc.refresh(GUIDE_URL, Utc::now()), RefreshOutcome::Fetched { .. }));

        gate.release.send(()).unwrap();
        let outcome = slow.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(matches!(outcome, RefreshOutcome::Fetched { channels: 1, .. }));

        let now = Utc::now();
        assert!(svc.cache().get("5", now).is_some());
        assert!(svc.cache().get("9", now).is_some());

        // The shared snapshot carries both sources
        fetcher.fail(GUIDE_URL);
        let restarted = service(fetcher, store);
        assert_eq!(restarted.refresh(GUIDE_URL, now), RefreshOutcome::Restored { channels: 2 });
    }

    #[test]
    fn test_spawn_refresh_reports_outcome() {
        let fetcher = Arc::new(ScriptedFetcher::new());
        fetcher.respond(GUIDE_URL, GUIDE);
        let svc = service(fetcher, Arc::new(MemoryBlobStore::new()));

        let outcome = svc.spawn_refresh(GUIDE_URL).recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(matches!(outcome, RefreshOutcome::Fetched { channels: 1, .. }));
    }
}
