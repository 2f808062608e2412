//! The active subtitle selection: owns the cue list for the chosen track

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{channel, Receiver};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

use log::{debug, info, warn};

use super::parser::parse_cues;
use super::query::CueCursor;
use super::types::{Cue, SubtitleTrack};
use crate::fetch::TextFetcher;

/// How a track load ended
#[derive(Debug, Clone, PartialEq)]
pub enum LoadOutcome {
    /// Cues parsed and installed for the track (possibly zero)
    Loaded { track_id: String, cues: usize },
    /// The selection was cleared
    Cleared,
    /// The track could not be fetched; the selection shows no cues
    Failed { track_id: String },
    /// Another selection was made while this one was loading
    Superseded,
}

struct ActiveTrack {
    track: Option<SubtitleTrack>,
    cues: Arc<[Cue]>,
    cursor: Option<CueCursor>,
}

impl Default for ActiveTrack {
    fn default() -> Self {
        Self {
            track: None,
            cues: Arc::from(Vec::new()),
            cursor: None,
        }
    }
}

/// Holds at most one track's cues; a new selection replaces them wholesale.
pub struct SubtitleSelection {
    fetcher: Arc<dyn TextFetcher>,
    generation: AtomicU64,
    active: Mutex<ActiveTrack>,
}

impl SubtitleSelection {
    pub fn new(fetcher: Arc<dyn TextFetcher>) -> Self {
        Self {
            fetcher,
            generation: AtomicU64::new(0),
            active: Mutex::new(ActiveTrack::default()),
        }
    }

    /// Switch to `track` (or to none) and load its cues in the background.
    /// Cues of the previous track are dropped immediately.
    pub fn select(self: &Arc<Self>, track: Option<SubtitleTrack>) -> Receiver<LoadOutcome> {
        let (sender, receiver) = channel();
        let generation = self.begin(track.clone());

        match track {
            None => {
                let _ = sender.send(LoadOutcome::Cleared);
            }
            Some(track) => {
                let selection = Arc::clone(self);
                thread::spawn(move || {
                    let _ = sender.send(selection.load(generation, track));
                });
            }
        }

        receiver
    }

    /// Same as [`select`](Self::select) but loads on the calling thread
    pub fn select_blocking(&self, track: Option<SubtitleTrack>) -> LoadOutcome {
        let generation = self.begin(track.clone());
        match track {
            None => LoadOutcome::Cleared,
            Some(track) => self.load(generation, track),
        }
    }

    fn begin(&self, track: Option<SubtitleTrack>) -> u64 {
        let mut active = self.lock();
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        *active = ActiveTrack {
            track,
            ..ActiveTrack::default()
        };
        generation
    }

    fn load(&self, generation: u64, track: SubtitleTrack) -> LoadOutcome {
        info!("Loading subtitles {} ({}) from {}", track.id, track.format, track.url);
        let fetched = self.fetcher.fetch_text(&track.url);
        let cues: Option<Vec<Cue>> = match fetched {
            Ok(text) => Some(parse_cues(&track.format, &text)),
            Err(e) => {
                warn!("Failed to load subtitles {}: {}", track.id, e);
                None
            }
        };

        let mut active = self.lock();
        if self.generation.load(Ordering::SeqCst) != generation {
            debug!("Discarding superseded subtitle load for {}", track.id);
            return LoadOutcome::Superseded;
        }

        match cues {
            Some(cues) => {
                let count = cues.len();
                active.cursor = Some(CueCursor::new(&cues));
                active.cues = cues.into();
                info!("Loaded {} cues for {}", count, track.id);
                LoadOutcome::Loaded {
                    track_id: track.id,
                    cues: count,
                }
            }
            None => LoadOutcome::Failed { track_id: track.id },
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ActiveTrack> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn track(&self) -> Option<SubtitleTrack> {
        self.lock().track.clone()
    }

    /// Shared view of the installed cues, empty while loading or unselected
    pub fn cues(&self) -> Arc<[Cue]> {
        Arc::clone(&self.lock().cues)
    }

    /// Cue to display at playback time `t` seconds
    pub fn active_cue(&self, t: f64) -> Option<Cue> {
        let mut guard = self.lock();
        let ActiveTrack { cues, cursor, .. } = &mut *guard;
        cursor.as_mut()?.active(&**cues, t).cloned()
    }
}
