//! One synchronization run, start to finish.
//!
//! [`SyncRun::prepare`] does everything that can fail on bad local state
//! (config, library) before any network traffic. [`SyncRun::execute`] then
//! drains the scrobble window, applies matches, persists the library when
//! something matched, and advances the watermark.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::config::RunConfig;
use crate::engine::MatchEngine;
use crate::library::{backup_path, Library};
use crate::models::{PlayEvent, RunSummary};
use crate::recents::save_recent_tracks;
use crate::report::local_timestamp;
use crate::safety::{validate_backup_path, validate_library_path};
use crate::source::{fetch_window, TrackSource};

#[derive(Clone, Debug, Default)]
pub struct RunOptions {
    /// Use this database instead of the configured one (not saved).
    pub rhythmdb: Option<PathBuf>,
    /// Match and report, but write neither the library nor the config.
    pub dry_run: bool,
    /// Save fetched scrobbles here as JSON.
    pub dump_recent: Option<PathBuf>,
    /// Scrobbles come from a recorded dump rather than Last.fm.
    pub replay: bool,
}

pub struct SyncRun {
    config_path: PathBuf,
    config: RunConfig,
    library: Library,
    started_at: i64,
    options: RunOptions,
}

impl SyncRun {
    /// Loads the configuration and the library. `started_at` is the run's
    /// single notion of "now": the fetch window's upper bound, the backup
    /// suffix and the next watermark.
    pub fn prepare(config_path: &Path, options: RunOptions, started_at: i64) -> Result<Self> {
        let config = RunConfig::load(config_path)?;
        let library_path = options
            .rhythmdb
            .clone()
            .unwrap_or_else(|| config.sync.rhythmdb.clone());

        validate_library_path(&library_path)?;
        let library = Library::load(&library_path)
            .with_context(|| format!("Failed to load library {}", library_path.display()))?;
        log::info!(
            "Loaded {} songs from {}",
            library.entry_count(),
            library_path.display()
        );

        Ok(Self {
            config_path: config_path.to_path_buf(),
            config,
            library,
            started_at,
            options,
        })
    }

    pub fn execute(mut self, source: &mut dyn TrackSource) -> Result<RunSummary> {
        let settings = self.config.sync.clone();
        let window_start = settings.last_update;
        let window_end = self.started_at;

        println!(
            "Updating with scrobbles since {}",
            local_timestamp(window_start)
        );

        let fetched = fetch_window(source, window_start, window_end, settings.limit);
        if let Some(reason) = &fetched.interrupted {
            log::warn!(
                "Continuing with {} scrobbles; older scrobbles in the window were not fetched ({})",
                fetched.events.len(),
                reason
            );
        }

        if let Some(path) = &self.options.dump_recent {
            if let Err(e) = save_recent_tracks(path, &fetched.events) {
                log::warn!("Could not dump scrobbles to {}: {}", path.display(), e);
            }
        }

        let engine = MatchEngine::new(settings.duplicates);
        let report = engine
            .match_scrobbles(&mut self.library, &fetched.events)
            .context("Failed to match scrobbles")?;

        let mut written = false;
        let mut backup = None;
        if report.matched > 0 && !self.options.dry_run {
            let suffix = self.started_at.to_string();
            if settings.backup {
                let target = backup_path(self.library.path(), &suffix);
                validate_backup_path(&target, self.library.path())?;
            }
            backup = self
                .library
                .save(settings.backup.then_some(suffix.as_str()))
                .with_context(|| {
                    format!("Failed to write library {}", self.library.path().display())
                })?;
            written = true;
        } else if report.matched == 0 {
            log::info!("No matches; library left untouched");
        }

        // The watermark moves to the run start, not to the newest scrobble.
        // Scrobbles that reach Last.fm late with an earlier timestamp fall
        // behind it and are never counted.
        let last_update = if self.options.replay {
            replay_watermark(window_start, &fetched.events)
        } else {
            self.started_at
        };
        self.config.sync.last_update = last_update;
        if self.options.dry_run {
            log::info!("Dry run: configuration not saved");
        } else {
            self.config
                .save(&self.config_path)
                .with_context(|| format!("Failed to save {}", self.config_path.display()))?;
        }

        Ok(RunSummary {
            window_start,
            window_end,
            fetched: fetched.events.len(),
            pages: fetched.pages,
            interrupted: fetched.interrupted,
            report,
            written,
            backup,
            last_update,
        })
    }
}

/// A dump only covers scrobbles up to the moment it was taken, so a replay
/// advances the watermark just past the newest replayed scrobble. Anything
/// played after the dump is still fetched by the next live run.
fn replay_watermark(current: i64, events: &[PlayEvent]) -> i64 {
    events
        .iter()
        .map(|e| e.timestamp + 1)
        .max()
        .map_or(current, |next| next.max(current))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{LAST_PLAYED, PLAY_COUNT};
    use crate::library::NodePath;
    use crate::recents::RecordedSource;
    use std::fs;
    use tempfile::TempDir;

    const DB: &str = r#"<?xml version="1.0" standalone="yes"?>
<rhythmdb version="2.0">
  <entry type="song">
    <title>T</title>
    <artist>A</artist>
    <album>Music</album>
  </entry>
</rhythmdb>
"#;

    const RUN_START: i64 = 1_700_000_000;

    struct Fixture {
        dir: TempDir,
        config: PathBuf,
        db: PathBuf,
    }

    fn fixture(backup: bool) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("rhythmdb.xml");
        let config = dir.path().join("rbsync.toml");
        fs::write(&db, DB).unwrap();
        fs::write(
            &config,
            format!(
                "[sync]\nlast_update = 500\nrhythmdb = {:?}\nbackup = {}\n",
                db.to_str().unwrap(),
                backup
            ),
        )
        .unwrap();
        Fixture { dir, config, db }
    }

    fn run(fx: &Fixture, events: Vec<PlayEvent>, options: RunOptions) -> RunSummary {
        let run = SyncRun::prepare(&fx.config, options, RUN_START).unwrap();
        run.execute(&mut RecordedSource::new(events)).unwrap()
    }

    #[test]
    fn test_match_updates_and_writes() {
        let fx = fixture(true);
        let summary = run(
            &fx,
            vec![PlayEvent::new("a", "t", Some("music"), 1000)],
            RunOptions::default(),
        );

        assert_eq!(summary.report.matched, 1);
        assert!(summary.written);

        let lib = Library::load(&fx.db).unwrap();
        let entry = lib.get(&NodePath(vec![1])).unwrap();
        assert_eq!(entry.child_text(PLAY_COUNT).as_deref(), Some("1"));
        assert_eq!(entry.child_text(LAST_PLAYED).as_deref(), Some("1000"));

        let backup = fx.dir.path().join("rhythmdb.xml.backup-1700000000");
        assert_eq!(summary.backup.as_deref(), Some(backup.as_path()));
        assert_eq!(fs::read_to_string(backup).unwrap(), DB);

        assert_eq!(RunConfig::load(&fx.config).unwrap().sync.last_update, RUN_START);
    }

    #[test]
    fn test_no_match_skips_write_but_advances_watermark() {
        let fx = fixture(true);
        let summary = run(
            &fx,
            vec![PlayEvent::new("X", "Y", Some("Z"), 2000)],
            RunOptions::default(),
        );

        assert_eq!(summary.report.matched, 0);
        assert_eq!(summary.report.unmatched(), 1);
        assert!(!summary.written);
        assert_eq!(fs::read_to_string(&fx.db).unwrap(), DB);
        assert_eq!(fs::read_dir(fx.dir.path()).unwrap().count(), 2);
        assert_eq!(RunConfig::load(&fx.config).unwrap().sync.last_update, RUN_START);
    }

    #[test]
    fn test_events_before_watermark_are_not_fetched() {
        let fx = fixture(false);
        let summary = run(
            &fx,
            vec![
                PlayEvent::new("A", "T", None, 400),
                PlayEvent::new("A", "T", None, 600),
            ],
            RunOptions::default(),
        );
        assert_eq!(summary.fetched, 1);
        assert_eq!(summary.report.matched, 1);
        assert!(summary.backup.is_none());
    }

    #[test]
    fn test_dry_run_writes_nothing() {
        let fx = fixture(true);
        let config_before = fs::read_to_string(&fx.config).unwrap();
        let summary = run(
            &fx,
            vec![PlayEvent::new("A", "T", Some("Music"), 1000)],
            RunOptions {
                dry_run: true,
                ..RunOptions::default()
            },
        );

        assert_eq!(summary.report.matched, 1);
        assert!(!summary.written);
        assert_eq!(fs::read_to_string(&fx.db).unwrap(), DB);
        assert_eq!(fs::read_to_string(&fx.config).unwrap(), config_before);
    }

    #[test]
    fn test_rhythmdb_override_is_not_saved() {
        let fx = fixture(false);
        let other = fx.dir.path().join("other.xml");
        fs::write(&other, DB).unwrap();

        run(
            &fx,
            vec![PlayEvent::new("A", "T", None, 1000)],
            RunOptions {
                rhythmdb: Some(other.clone()),
                ..RunOptions::default()
            },
        );

        assert!(fs::read_to_string(&other).unwrap().contains("<play-count>1</play-count>"));
        assert_eq!(fs::read_to_string(&fx.db).unwrap(), DB);
        assert_eq!(RunConfig::load(&fx.config).unwrap().sync.rhythmdb, fx.db);
    }

    #[test]
    fn test_dump_recent_tracks() {
        let fx = fixture(false);
        let dump = fx.dir.path().join("recents.json");
        run(
            &fx,
            vec![PlayEvent::new("X", "Y", None, 1000)],
            RunOptions {
                dump_recent: Some(dump.clone()),
                ..RunOptions::default()
            },
        );
        let dumped = crate::recents::load_recent_tracks(&dump).unwrap();
        assert_eq!(dumped, vec![PlayEvent::new("X", "Y", None, 1000)]);
    }

    #[test]
    fn test_replay_advances_watermark_to_newest_replayed_scrobble() {
        let fx = fixture(false);
        let summary = run(
            &fx,
            vec![
                PlayEvent::new("A", "T", None, 900),
                PlayEvent::new("X", "Y", None, 1200),
            ],
            RunOptions {
                replay: true,
                ..RunOptions::default()
            },
        );

        assert_eq!(summary.report.matched, 1);
        assert_eq!(summary.last_update, 1201);
        assert_eq!(RunConfig::load(&fx.config).unwrap().sync.last_update, 1201);
    }

    #[test]
    fn test_empty_replay_keeps_watermark() {
        let fx = fixture(false);
        let summary = run(
            &fx,
            vec![PlayEvent::new("A", "T", None, 100)],
            RunOptions {
                replay: true,
                ..RunOptions::default()
            },
        );

        assert_eq!(summary.fetched, 0);
        assert_eq!(RunConfig::load(&fx.config).unwrap().sync.last_update, 500);
    }

    #[test]
    fn test_missing_config_fails_before_fetch() {
        let dir = tempfile::tempdir().unwrap();
        let result = SyncRun::prepare(&dir.path().join("absent.toml"), RunOptions::default(), RUN_START);
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_library_fails_before_fetch() {
        let fx = fixture(true);
        fs::remove_file(&fx.db).unwrap();
        assert!(SyncRun::prepare(&fx.config, RunOptions::default(), RUN_START).is_err());
    }
}
