use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Instant;

use rbsync::config::{default_config_path, RunConfig};
use rbsync::credentials::{default_secrets_path, Credentials, StdinPrompt};
use rbsync::lastfm::LastFmClient;
use rbsync::progress::set_log_only;
use rbsync::recents::RecordedSource;
use rbsync::report::{now_epoch, print_outcomes, print_summary};
use rbsync::source::TrackSource;
use rbsync::sync::{RunOptions, SyncRun};

#[derive(Parser)]
#[command(name = "rbsync")]
#[command(about = "Sync Last.fm scrobbles into the Rhythmbox play counts")]
struct Args {
    /// Run configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Last.fm credentials file (created interactively when missing)
    #[arg(long)]
    secrets: Option<PathBuf>,

    /// Rhythmbox database to update instead of the configured one
    #[arg(long)]
    rhythmdb: Option<PathBuf>,

    /// Write a default configuration file and exit
    #[arg(long)]
    init: bool,

    /// Match and report without writing the library or the configuration
    #[arg(long)]
    dry_run: bool,

    /// Read scrobbles from a JSON dump instead of Last.fm
    #[arg(long)]
    replay: Option<PathBuf>,

    /// Save fetched scrobbles to a JSON file
    #[arg(long)]
    dump_recent: Option<PathBuf>,

    /// Hide the spinner (for cron logs)
    #[arg(long)]
    log_only: bool,

    /// Debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();
    set_log_only(args.log_only);

    if let Err(e) = run(args) {
        log::error!("{:#}", e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    let config_path = args.config.unwrap_or_else(default_config_path);

    if args.init {
        if RunConfig::init(&config_path)? {
            println!("Wrote default configuration to {}", config_path.display());
        } else {
            println!("Configuration already exists at {}", config_path.display());
        }
        return Ok(());
    }

    let start = Instant::now();
    let started_at = now_epoch();

    let options = RunOptions {
        rhythmdb: args.rhythmdb,
        dry_run: args.dry_run,
        dump_recent: args.dump_recent,
        replay: args.replay.is_some(),
    };
    let run = SyncRun::prepare(&config_path, options, started_at)?;

    let mut source: Box<dyn TrackSource> = match &args.replay {
        Some(path) => {
            log::info!("Replaying scrobbles from {}", path.display());
            Box::new(
                RecordedSource::from_file(path)
                    .with_context(|| format!("Failed to read {}", path.display()))?,
            )
        }
        None => {
            let secrets_path = args.secrets.unwrap_or_else(default_secrets_path);
            let credentials = Credentials::load_or_create(&secrets_path, &mut StdinPrompt)?;
            Box::new(LastFmClient::connect(credentials).context("Failed to connect to Last.fm")?)
        }
    };

    let summary = run.execute(source.as_mut())?;

    print_outcomes(&summary.report.outcomes);
    print_summary(&summary, start.elapsed());

    Ok(())
}
