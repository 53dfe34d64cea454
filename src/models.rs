//! Core data models for scrobble synchronization.
//!
//! Play events come from the remote source, match outcomes come out of the
//! engine, and the run summary is what the binary reports at the end.

use serde::{Deserialize, Serialize};

// ============================================================================
// Play Events
// ============================================================================

/// A single scrobble: one play of one track at one point in time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayEvent {
    pub artist: String,
    pub title: String,
    pub album: Option<String>,
    pub timestamp: i64, // epoch seconds, as reported by Last.fm
}

impl PlayEvent {
    pub fn new(artist: &str, title: &str, album: Option<&str>, timestamp: i64) -> Self {
        Self {
            artist: artist.to_string(),
            title: title.to_string(),
            album: album.map(str::to_string),
            timestamp,
        }
    }

    /// Album for display; empty when Last.fm had none.
    pub fn album_display(&self) -> &str {
        self.album.as_deref().unwrap_or("")
    }
}

// ============================================================================
// Match Results
// ============================================================================

/// What happened to a single play event during matching.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MatchOutcome {
    /// An entry was updated; `play_count` is its new value.
    Matched { event: PlayEvent, play_count: u64 },
    /// No entry shares artist/title/album with the event.
    Unmatched { event: PlayEvent },
    /// Several entries matched and the duplicate policy refused to pick one.
    Ambiguous { event: PlayEvent, candidates: usize },
}

impl MatchOutcome {
    pub fn event(&self) -> &PlayEvent {
        match self {
            MatchOutcome::Matched { event, .. }
            | MatchOutcome::Unmatched { event }
            | MatchOutcome::Ambiguous { event, .. } => event,
        }
    }

    pub fn is_match(&self) -> bool {
        matches!(self, MatchOutcome::Matched { .. })
    }
}

/// Aggregate of a full matching pass.
#[derive(Clone, Debug, Default)]
pub struct MatchReport {
    pub outcomes: Vec<MatchOutcome>,
    pub matched: usize,
}

impl MatchReport {
    pub fn unmatched(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, MatchOutcome::Unmatched { .. }))
            .count()
    }

    pub fn ambiguous(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, MatchOutcome::Ambiguous { .. }))
            .count()
    }
}

// ============================================================================
// Run Summary
// ============================================================================

/// Everything the binary needs to print once a run is over.
#[derive(Clone, Debug)]
pub struct RunSummary {
    pub window_start: i64,
    pub window_end: i64,
    pub fetched: usize,
    pub pages: usize,
    /// Set when the fetch stopped early on an error.
    pub interrupted: Option<String>,
    pub report: MatchReport,
    /// True when the library file was rewritten.
    pub written: bool,
    pub backup: Option<std::path::PathBuf>,
    /// The watermark stored for the next run.
    pub last_update: i64,
}
