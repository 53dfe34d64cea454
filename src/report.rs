//! Console reporting: one line per scrobble plus the end-of-run summary.

use chrono::{Local, TimeZone, Utc};
use std::io::IsTerminal;

use crate::models::{MatchOutcome, RunSummary};
use crate::progress::format_duration;

const GREEN: &str = "\x1b[92m";
const RED: &str = "\x1b[91m";
const YELLOW: &str = "\x1b[93m";
const RESET: &str = "\x1b[00m";

/// Renders an epoch timestamp in `tz`, e.g. `2017-07-13 19:40:00 (PDT)`.
pub fn format_timestamp<Tz: TimeZone>(timestamp: i64, tz: &Tz) -> String
where
    Tz::Offset: std::fmt::Display,
{
    match tz.timestamp_opt(timestamp, 0).single() {
        Some(dt) => dt.format("%Y-%m-%d %H:%M:%S (%Z)").to_string(),
        None => timestamp.to_string(),
    }
}

/// [`format_timestamp`] in the machine's local zone.
pub fn local_timestamp(timestamp: i64) -> String {
    format_timestamp(timestamp, &Local)
}

/// Whether stdout should get ANSI colors.
pub fn use_color() -> bool {
    std::io::stdout().is_terminal()
}

/// `✓ artist - album - title {{n}}`, `x artist - album - title`, or
/// `? artist - album - title [n candidates]`.
pub fn format_outcome(outcome: &MatchOutcome, color: bool) -> String {
    let paint = |code: &'static str, mark: &str| {
        if color {
            format!("{}{}{}", code, mark, RESET)
        } else {
            mark.to_string()
        }
    };
    let event = outcome.event();
    let track = format!("{} - {} - {}", event.artist, event.album_display(), event.title);

    match outcome {
        MatchOutcome::Matched { play_count, .. } => {
            format!("{} {} {{{{{}}}}}", paint(GREEN, "✓"), track, play_count)
        }
        MatchOutcome::Unmatched { .. } => format!("{} {}", paint(RED, "x"), track),
        MatchOutcome::Ambiguous { candidates, .. } => {
            format!("{} {} [{} candidates]", paint(YELLOW, "?"), track, candidates)
        }
    }
}

pub fn print_outcomes(outcomes: &[MatchOutcome]) {
    let color = use_color();
    for outcome in outcomes {
        println!("{}", format_outcome(outcome, color));
    }
}

pub fn print_summary(summary: &RunSummary, elapsed: std::time::Duration) {
    let report = &summary.report;
    println!("\n{:=<60}", "");
    println!("Sync complete!");
    println!(
        "  Window: {} .. {}",
        local_timestamp(summary.window_start),
        local_timestamp(summary.window_end)
    );
    println!("  Scrobbles fetched: {} ({} pages)", summary.fetched, summary.pages);
    if let Some(reason) = &summary.interrupted {
        println!("  Fetch interrupted: {}", reason);
    }
    println!("  Matched: {}", report.matched);
    println!("  Unmatched: {}", report.unmatched());
    if report.ambiguous() > 0 {
        println!("  Ambiguous (skipped): {}", report.ambiguous());
    }
    println!(
        "  Library: {}",
        if summary.written { "updated" } else { "unchanged" }
    );
    if let Some(backup) = &summary.backup {
        println!("  Backup: {}", backup.display());
    }
    println!("  Last sync: {}", local_timestamp(summary.last_update));
    println!("  Elapsed: {}", format_duration(elapsed));
    println!("{:=<60}", "");
}

/// Readable form of a stored `last-played` value.
pub fn describe_last_played(text: Option<&str>) -> String {
    match text.and_then(|t| t.trim().parse::<i64>().ok()) {
        Some(ts) => local_timestamp(ts),
        None => "never".to_string(),
    }
}

/// Current time as epoch seconds, captured once per run.
pub fn now_epoch() -> i64 {
    Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PlayEvent;

    #[test]
    fn test_format_timestamp_utc() {
        assert_eq!(format_timestamp(0, &Utc), "1970-01-01 00:00:00 (UTC)");
        assert_eq!(
            format_timestamp(1_500_000_000, &Utc),
            "2017-07-14 02:40:00 (UTC)"
        );
    }

    #[test]
    fn test_format_matched_plain() {
        let outcome = MatchOutcome::Matched {
            event: PlayEvent::new("Artist", "Title", Some("Album"), 1),
            play_count: 12,
        };
        assert_eq!(format_outcome(&outcome, false), "✓ Artist - Album - Title {{12}}");
    }

    #[test]
    fn test_format_unmatched_colored() {
        let outcome = MatchOutcome::Unmatched {
            event: PlayEvent::new("Artist", "Title", None, 1),
        };
        assert_eq!(
            format_outcome(&outcome, true),
            "\x1b[91mx\x1b[00m Artist -  - Title"
        );
    }

    #[test]
    fn test_format_ambiguous() {
        let outcome = MatchOutcome::Ambiguous {
            event: PlayEvent::new("A", "T", Some("L"), 1),
            candidates: 3,
        };
        assert_eq!(format_outcome(&outcome, false), "? A - L - T [3 candidates]");
    }

    #[test]
    fn test_describe_last_played() {
        assert_eq!(describe_last_played(None), "never");
        assert_eq!(describe_last_played(Some("soon")), "never");
        assert_ne!(describe_last_played(Some("1000")), "never");
    }
}
