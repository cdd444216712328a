//! Track sources: the dance-practice rotation and plain file lists.

use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use player_engine::{Playlist, Track, decode};
use rand::Rng;
use rand::seq::SliceRandom;

use crate::config::UserSettings;
use crate::metadata;

/// Dance folders grouped by category, in playing order.
pub const CATEGORIES: &[(&str, &[&str])] = &[
    (
        "Ballroom",
        &["Waltz", "Tango", "VienneseWaltz", "Foxtrot", "QuickStep"],
    ),
    ("Latin", &["Samba", "ChaCha", "Rumba", "PasoDoble", "Jive"]),
    ("Other", &["WCS"]),
];

/// One announcement per dance followed by up to `songs_per_dance` random songs from it.
///
/// Dances without an announcement or without a readable folder are skipped.
pub fn practice_playlist<R: Rng + ?Sized>(user: &UserSettings, rng: &mut R) -> Playlist {
    let mut tracks = Vec::new();
    for (category, dances) in CATEGORIES {
        for dance in *dances {
            let announce = user.announce_dir.join(format!("{dance}.mp3"));
            if !announce.is_file() {
                tracing::info!(
                    category,
                    dance,
                    path = %announce.display(),
                    "no announcement, skipping dance"
                );
                continue;
            }

            let dir = user.music_dir.join(dance);
            let mut songs = match list_audio_files(&dir) {
                Ok(songs) => songs,
                Err(e) => {
                    tracing::warn!(category, dance, "skipping dance: {e:#}");
                    continue;
                }
            };
            songs.shuffle(rng);
            songs.truncate(user.songs_per_dance);

            tracing::info!(category, dance, songs = songs.len(), "dance added");
            tracks.push(Track::new(announce, format!("{dance} ({category})")));
            tracks.extend(songs.into_iter().map(labelled));
        }
    }
    Playlist::new(tracks)
}

/// Playlist of the given files in order.
pub fn file_playlist(paths: &[PathBuf]) -> Playlist {
    Playlist::new(paths.iter().cloned().map(labelled).collect())
}

fn labelled(path: PathBuf) -> Track {
    let label = metadata::track_label(&path);
    Track::new(path, label)
}

/// Playable files under `dir`, recursively, sorted by path.
pub fn list_audio_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    walk(dir, &mut out)?;
    out.sort();
    Ok(out)
}

fn walk(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    for entry in fs::read_dir(dir).with_context(|| format!("read_dir {:?}", dir))? {
        let entry = entry.context("read_dir entry")?;
        let path = entry.path();
        if path.is_dir() {
            walk(&path, out)?;
            continue;
        }
        let supported = path
            .extension()
            .and_then(OsStr::to_str)
            .is_some_and(decode::is_supported_extension);
        if path.is_file() && supported {
            out.push(path);
        }
    }
    Ok(())
}
