//! Ordered track list with a cursor.

use std::path::{Path, PathBuf};

use crate::error::{PlayerError, Result};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Track {
    pub path: PathBuf,
    /// Display label; defaults to the file stem.
    pub label: String,
}

impl Track {
    pub fn new(path: impl Into<PathBuf>, label: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            label: label.into(),
        }
    }

    pub fn from_path(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let label = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self::new(path, label)
    }
}

/// Tracks plus the index of the one that is (or would be) playing.
///
/// The cursor never leaves `0..len`; navigation past either end is a no-op.
#[derive(Clone, Debug, Default)]
pub struct Playlist {
    tracks: Vec<Track>,
    cursor: usize,
}

impl Playlist {
    pub fn new(tracks: Vec<Track>) -> Self {
        Self { tracks, cursor: 0 }
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn get(&self, index: usize) -> Option<&Track> {
        self.tracks.get(index)
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn current(&self) -> Option<&Track> {
        self.tracks.get(self.cursor)
    }

    /// Advance the cursor. `None` (cursor unchanged) at the last track.
    pub fn next(&mut self) -> Option<&Track> {
        if self.cursor + 1 >= self.tracks.len() {
            return None;
        }
        self.cursor += 1;
        self.tracks.get(self.cursor)
    }

    /// Step the cursor back. `None` (cursor unchanged) at the first track.
    pub fn previous(&mut self) -> Option<&Track> {
        if self.cursor == 0 || self.tracks.is_empty() {
            return None;
        }
        self.cursor -= 1;
        self.tracks.get(self.cursor)
    }

    pub fn select_index(&mut self, index: usize) -> Result<&Track> {
        if index >= self.tracks.len() {
            return Err(PlayerError::Index {
                index,
                len: self.tracks.len(),
            });
        }
        self.cursor = index;
        Ok(&self.tracks[index])
    }
}
