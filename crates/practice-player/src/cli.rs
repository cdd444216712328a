use std::path::PathBuf;

use clap::{Parser, Subcommand};

const VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("GIT_SHA"),
    ", ",
    env!("BUILD_DATE"),
    ")"
);

#[derive(Parser, Debug)]
#[command(name = "practice-player", version = VERSION)]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Option<Command>,

    /// Settings file; a default one is written if it does not exist
    #[arg(long, default_value = "config.toml")]
    pub config: PathBuf,

    /// List output devices and exit
    #[arg(long)]
    pub list_devices: bool,

    /// Use a specific output device by substring match
    #[arg(long)]
    pub device: Option<String>,

    /// Render in real time without opening a sound card
    #[arg(long)]
    pub no_output: bool,

    /// Device sample rate every track is converted to
    #[arg(long, default_value_t = 44_100)]
    pub sample_rate: u32,

    /// Render block / device buffer duration in milliseconds
    #[arg(long, default_value_t = 100)]
    pub buffer_ms: u32,

    /// Starting volume (0-120, 100 is unity gain); overrides the settings file
    #[arg(long)]
    pub volume: Option<f64>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Build a dance-practice playlist from the music directory (default)
    Practice,

    /// Play the given files in order
    Play {
        /// Audio files (mp3, flac, ogg, m4a, wav)
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
}
