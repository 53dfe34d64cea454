//! Match-and-update engine.
//!
//! Each scrobble is looked up in the library by artist/title/album. The
//! first matching entry (document order) gets its play count bumped and its
//! last-played time raised to the scrobble's timestamp if that is newer.
//! Entries are never created or removed.

use crate::config::DuplicatePolicy;
use crate::error::Result;
use crate::library::{Element, Library};
use crate::models::{MatchOutcome, MatchReport, PlayEvent};
use crate::query::find_entries;

pub const PLAY_COUNT: &str = "play-count";
pub const LAST_PLAYED: &str = "last-played";

pub struct MatchEngine {
    duplicates: DuplicatePolicy,
}

impl MatchEngine {
    pub fn new(duplicates: DuplicatePolicy) -> Self {
        Self { duplicates }
    }

    /// Applies one scrobble to the library.
    pub fn apply(&self, library: &mut Library, event: &PlayEvent) -> Result<MatchOutcome> {
        let matches = find_entries(
            library,
            &event.artist,
            &event.title,
            event.album.as_deref(),
        )?;

        let Some(first) = matches.first() else {
            return Ok(MatchOutcome::Unmatched {
                event: event.clone(),
            });
        };

        if matches.len() > 1 {
            match self.duplicates {
                DuplicatePolicy::Skip => {
                    return Ok(MatchOutcome::Ambiguous {
                        event: event.clone(),
                        candidates: matches.len(),
                    });
                }
                DuplicatePolicy::FirstMatch => log::debug!(
                    "{} entries match {} - {}; updating the first",
                    matches.len(),
                    event.artist,
                    event.title
                ),
            }
        }

        // Paths come straight from the query, so the entry exists.
        let Some(entry) = library.get_mut(first) else {
            return Ok(MatchOutcome::Unmatched {
                event: event.clone(),
            });
        };
        let play_count = record_play(entry, event.timestamp);

        Ok(MatchOutcome::Matched {
            event: event.clone(),
            play_count,
        })
    }

    /// Applies every scrobble in order and counts the matches.
    pub fn match_scrobbles(&self, library: &mut Library, events: &[PlayEvent]) -> Result<MatchReport> {
        let mut report = MatchReport::default();
        for event in events {
            let outcome = self.apply(library, event)?;
            if outcome.is_match() {
                report.matched += 1;
            }
            report.outcomes.push(outcome);
        }
        Ok(report)
    }
}

/// Bumps `play-count` and raises `last-played`; returns the new play count.
pub fn record_play(entry: &mut Element, timestamp: i64) -> u64 {
    let previous = match entry.child_text(PLAY_COUNT) {
        None => 0,
        Some(text) => text.trim().parse::<u64>().unwrap_or_else(|_| {
            log::warn!("Ignoring malformed play-count '{}'", text);
            0
        }),
    };
    let play_count = previous + 1;
    entry.set_child_text(PLAY_COUNT, &play_count.to_string());

    let last_played = entry.child_text(LAST_PLAYED).and_then(|text| {
        let parsed = text.trim().parse::<i64>().ok();
        if parsed.is_none() {
            log::warn!("Ignoring malformed last-played '{}'", text);
        }
        parsed
    });
    if last_played.map_or(true, |last| timestamp > last) {
        entry.set_child_text(LAST_PLAYED, &timestamp.to_string());
    }

    play_count
}
