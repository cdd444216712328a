//! Single-stream playback engine.
//!
//! A track is opened by [`decode`], adapted to the device rate by [`resample`], wrapped in a
//! [`gain`] stage and installed into the [`session`] slot that the [`speaker`] render thread
//! pulls from. The [`engine`] owns the transport state machine and the [`playlist`].

pub mod config;
pub mod decode;
pub mod device;
pub mod engine;
pub mod error;
pub mod gain;
pub mod playback;
pub mod playlist;
pub mod progress;
pub mod queue;
pub mod resample;
pub mod session;
pub mod speaker;
pub mod stream;
pub mod transport;

pub use config::PlaybackConfig;
pub use engine::{Engine, EngineEvent, FileOpener, TrackOpener};
pub use error::{PlayerError, Result};
pub use playlist::{Playlist, Track};
pub use progress::Progress;
pub use speaker::{MemoryCapture, MemorySink, Sink};
pub use stream::{Format, SampleStream};
pub use transport::{Command, TransportState};
