//! Transport state and user commands.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum TransportState {
    #[default]
    Stopped,
    Playing,
    Paused,
}

impl TransportState {
    /// Label for a play/pause control in this state.
    pub fn button_label(self) -> &'static str {
        match self {
            TransportState::Playing => "Pause",
            TransportState::Paused | TransportState::Stopped => "Play",
        }
    }

    fn to_u8(self) -> u8 {
        match self {
            TransportState::Stopped => 0,
            TransportState::Playing => 1,
            TransportState::Paused => 2,
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            1 => TransportState::Playing,
            2 => TransportState::Paused,
            _ => TransportState::Stopped,
        }
    }
}

impl fmt::Display for TransportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransportState::Stopped => "stopped",
            TransportState::Playing => "playing",
            TransportState::Paused => "paused",
        };
        f.write_str(s)
    }
}

/// Lock-free mirror of the transport state for readers outside the control lock.
#[derive(Clone, Debug, Default)]
pub struct TransportCell(Arc<AtomicU8>);

impl TransportCell {
    pub fn load(&self) -> TransportState {
        TransportState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn store(&self, state: TransportState) {
        self.0.store(state.to_u8(), Ordering::Release);
    }
}

/// User-level commands accepted by the engine.
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    PlayPause,
    Restart,
    Next,
    Previous,
    SetVolume(f64),
    SelectTrack(usize),
}
