//! User settings file.
//!
//! A missing file is created with defaults so the user has something to edit.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_VOLUME: f64 = 120.0;
pub const DEFAULT_SONG_MAX_PLAYTIME: u32 = 210;
pub const DEFAULT_SONGS_PER_DANCE: usize = 4;
pub const DEFAULT_ANNOUNCE_DIR: &str = "announce";

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default)]
    pub user: UserSettings,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UserSettings {
    /// Starting volume, 0-120.
    pub volume: f64,
    /// Root holding one folder per dance.
    pub music_dir: PathBuf,
    /// Seconds each song is allowed to play; `0` plays songs to the end.
    pub song_max_playtime: u32,
    pub songs_per_dance: usize,
    /// Folder of `<Dance>.mp3` announcements.
    pub announce_dir: PathBuf,
}

impl Default for UserSettings {
    fn default() -> Self {
        Self {
            volume: DEFAULT_VOLUME,
            music_dir: default_music_dir(),
            song_max_playtime: DEFAULT_SONG_MAX_PLAYTIME,
            songs_per_dance: DEFAULT_SONGS_PER_DANCE,
            announce_dir: PathBuf::from(DEFAULT_ANNOUNCE_DIR),
        }
    }
}

impl UserSettings {
    /// Volume with non-positive values replaced by the default.
    pub fn effective_volume(&self) -> f64 {
        if self.volume.is_nan() || self.volume <= 0.0 {
            DEFAULT_VOLUME
        } else {
            self.volume
        }
    }

    pub fn max_track_seconds(&self) -> Option<u32> {
        (self.song_max_playtime > 0).then_some(self.song_max_playtime)
    }
}

fn default_music_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("Music")
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self> {
        let raw =
            std::fs::read_to_string(path).with_context(|| format!("read config {:?}", path))?;
        let cfg = toml::from_str::<Settings>(&raw)
            .with_context(|| format!("parse config {:?}", path))?;
        Ok(cfg)
    }

    /// Load `path`, writing a default file first when it does not exist.
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if !path.exists() {
            let defaults = Settings::default();
            defaults.save(path)?;
            tracing::info!(path = %path.display(), "wrote default config");
        }
        Self::load(path)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let raw = toml::to_string_pretty(self).context("serialize config")?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create config dir {:?}", parent))?;
        }
        std::fs::write(path, raw).with_context(|| format!("write config {:?}", path))?;
        Ok(())
    }
}
