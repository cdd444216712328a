//! Practice Player: a terminal dance-practice jukebox.
//!
//! Builds a playlist (one announcement per dance followed by a few random songs from that
//! dance's folder, or the files given on the command line) and plays it through the
//! `player-engine` library, one track at a time, at the output device's sample rate.
//!
//! ## Modes
//! - `practice` (default): dance rotation from `music_dir` and `announce_dir`.
//! - `play <paths…>`: the given files in order.

mod cli;
mod config;
mod control;
mod library;
mod metadata;
mod runtime;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let args = cli::Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,practice_player=info,player_engine=info")
        }))
        .init();

    if args.list_devices {
        return runtime::list_devices();
    }

    runtime::run(args)
}
