//! Error taxonomy for the playback engine.

use std::path::PathBuf;

use thiserror::Error;

/// Boxed underlying cause (I/O, codec, device back-end).
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result type alias using the engine's error type.
pub type Result<T> = std::result::Result<T, PlayerError>;

#[derive(Debug, Error)]
pub enum PlayerError {
    /// The file extension has no codec adapter.
    #[error("unsupported audio format {extension:?}: {path}")]
    UnsupportedFormat { path: PathBuf, extension: String },

    /// The file could not be opened or its header/codec could not be decoded.
    #[error("decode failed for {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: BoxError,
    },

    /// Seek beyond stream bounds or on a closed/finished stream.
    #[error("seek failed: {0}")]
    Seek(String),

    /// Playlist selection outside `0..len`.
    #[error("track index {index} out of range (playlist has {len} tracks)")]
    Index { index: usize, len: usize },

    /// The output device could not be claimed.
    #[error("output device error: {0}")]
    Device(String),
}

impl PlayerError {
    pub(crate) fn decode(path: impl Into<PathBuf>, source: impl Into<BoxError>) -> Self {
        Self::Decode {
            path: path.into(),
            source: source.into(),
        }
    }

    /// Whether the error only affects a single track (the engine keeps running).
    pub fn is_track_error(&self) -> bool {
        matches!(self, Self::UnsupportedFormat { .. } | Self::Decode { .. })
    }
}
