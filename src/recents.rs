//! Saving fetched scrobbles to JSON and replaying them later.
//!
//! A dump taken with `--dump-recent` can be fed back with `--replay` to
//! rerun matching without touching the network.

use std::fs;
use std::path::Path;

use crate::error::Result;
use crate::models::PlayEvent;
use crate::source::TrackSource;

pub fn save_recent_tracks(path: &Path, events: &[PlayEvent]) -> Result<()> {
    let json = serde_json::to_string_pretty(events)?;
    fs::write(path, json)?;
    log::info!("Saved {} scrobbles to {}", events.len(), path.display());
    Ok(())
}

pub fn load_recent_tracks(path: &Path) -> Result<Vec<PlayEvent>> {
    let content = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

/// Track source backed by a fixed list of scrobbles.
///
/// Applies the same window and page-size rules as the Last.fm client, so it
/// exercises the fetch-window controller exactly like the real thing.
#[derive(Clone, Debug, Default)]
pub struct RecordedSource {
    events: Vec<PlayEvent>,
}

impl RecordedSource {
    pub fn new(mut events: Vec<PlayEvent>) -> Self {
        events.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Self { events }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        Ok(Self::new(load_recent_tracks(path)?))
    }
}

impl TrackSource for RecordedSource {
    fn recent_tracks(&mut self, from: i64, to: i64, limit: u32) -> Result<Vec<PlayEvent>> {
        Ok(self
            .events
            .iter()
            .filter(|e| e.timestamp >= from && e.timestamp <= to)
            .take(limit as usize)
            .cloned()
            .collect())
    }
}
