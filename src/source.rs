//! Remote track sources and the fetch-window controller.
//!
//! A source only ever returns up to `limit` scrobbles per call, newest first.
//! [`fetch_window`] gets everything since the watermark by shrinking the upper
//! bound of the window past the oldest scrobble of each page.

use crate::error::Result;
use crate::models::PlayEvent;
use crate::progress::create_spinner;

/// Something that can list scrobbles inside a time window.
pub trait TrackSource {
    /// Scrobbles with `from <= timestamp <= to`, newest first, at most `limit`.
    fn recent_tracks(&mut self, from: i64, to: i64, limit: u32) -> Result<Vec<PlayEvent>>;
}

/// Result of draining a window.
#[derive(Clone, Debug, Default)]
pub struct FetchOutcome {
    pub events: Vec<PlayEvent>,
    pub pages: usize,
    /// Error that ended the fetch early, if any. Events gathered before it
    /// are still in `events`.
    pub interrupted: Option<String>,
}

/// Collects every scrobble in `[time_start, time_end]`.
///
/// After each non-empty page the upper bound becomes one second before the
/// page's oldest scrobble. Stops on an empty page, an exhausted window, or a
/// source error (logged, partial results kept).
pub fn fetch_window(
    source: &mut dyn TrackSource,
    time_start: i64,
    time_end: i64,
    limit: u32,
) -> FetchOutcome {
    let spinner = create_spinner("Fetching scrobbles");
    let mut outcome = FetchOutcome::default();
    let mut time_end = time_end;

    while time_start < time_end {
        let page = match source.recent_tracks(time_start, time_end, limit) {
            Ok(page) => page,
            Err(e) => {
                log::warn!(
                    "Stopped fetching after {} scrobbles: {}",
                    outcome.events.len(),
                    e
                );
                outcome.interrupted = Some(e.to_string());
                break;
            }
        };

        let Some(oldest) = page.iter().map(|e| e.timestamp).min() else {
            break;
        };

        outcome.pages += 1;
        outcome.events.extend(page);
        spinner.set_message(format!(
            "Fetching scrobbles ({} so far)",
            outcome.events.len()
        ));
        log::debug!(
            "Page {}: window [{}, {}], oldest scrobble {}",
            outcome.pages,
            time_start,
            time_end,
            oldest
        );

        let next_end = oldest - 1;
        if next_end >= time_end {
            // The source ignored the window; narrowing would never finish.
            log::warn!(
                "Source returned scrobbles outside [{}, {}]; stopping",
                time_start,
                time_end
            );
            break;
        }
        time_end = next_end;
    }

    spinner.finish_with_message(format!(
        "Fetched {} scrobbles in {} pages",
        outcome.events.len(),
        outcome.pages
    ));
    outcome
}
