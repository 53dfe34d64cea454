//! Look up library entries the way a sync run would.
//! Usage: rbsync-lookup <artist> <title> [--album <album>] [--rhythmdb <path>]

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

use rbsync::config::default_rhythmdb_path;
use rbsync::engine::{LAST_PLAYED, PLAY_COUNT};
use rbsync::library::Library;
use rbsync::query::{entry_query, find_entries};
use rbsync::report::describe_last_played;

#[derive(Parser)]
#[command(name = "rbsync-lookup")]
#[command(about = "Show which Rhythmbox entries a scrobble would match")]
struct Args {
    artist: String,

    title: String,

    #[arg(long)]
    album: Option<String>,

    #[arg(long)]
    rhythmdb: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let path = args.rhythmdb.unwrap_or_else(default_rhythmdb_path);

    let library = Library::load(&path)
        .with_context(|| format!("Failed to load {}", path.display()))?;

    println!(
        "Query: {}",
        entry_query(&args.artist, &args.title, args.album.as_deref())
    );
    println!("{:-<80}", "");

    let matches = find_entries(&library, &args.artist, &args.title, args.album.as_deref())?;
    for (i, path) in matches.iter().enumerate() {
        let Some(entry) = library.get(path) else {
            continue;
        };
        println!(
            "{}{} - {} - {} (plays: {}, last played: {})",
            if i == 0 { "* " } else { "  " },
            entry.child_text("artist").unwrap_or_default(),
            entry.child_text("album").unwrap_or_default(),
            entry.child_text("title").unwrap_or_default(),
            entry.child_text(PLAY_COUNT).unwrap_or_else(|| "0".to_string()),
            describe_last_played(entry.child_text(LAST_PLAYED).as_deref()),
        );
    }

    if matches.is_empty() {
        println!("No matching entries.");
    } else if matches.len() > 1 {
        println!("\n{} entries match; a sync updates the one marked '*'.", matches.len());
    }

    Ok(())
}
