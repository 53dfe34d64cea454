//! rbsync library - shared modules for the `rbsync` and `rbsync-lookup` binaries.

pub mod config;
pub mod credentials;
pub mod engine;
pub mod error;
pub mod lastfm;
pub mod library;
pub mod models;
pub mod progress;
pub mod query;
pub mod recents;
pub mod report;
pub mod safety;
pub mod source;
pub mod sync;
