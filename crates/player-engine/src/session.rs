//! The single playback slot shared between the control side and the render thread.
//!
//! At most one [`PlaybackSession`] is active. Installing a new one closes the previous
//! stream first, so two tracks can never be mixed into the same block.

use crate::error::{PlayerError, Result};
use crate::gain::{Gain, NORMAL_VOLUME, clamp_volume};
use crate::stream::SampleStream;

/// Invoked once the active session's last samples have been handed to the device.
pub type Completion = Box<dyn FnOnce() + Send>;

/// One track's playback pipeline.
pub struct PlaybackSession {
    id: u64,
    index: usize,
    stream: Gain<Box<dyn SampleStream>>,
    paused: bool,
    finished: bool,
}

impl PlaybackSession {
    pub fn new(id: u64, index: usize, stream: Box<dyn SampleStream>) -> Self {
        Self {
            id,
            index,
            stream: Gain::new(stream, NORMAL_VOLUME),
            paused: false,
            finished: false,
        }
    }

    /// Start in the paused state; the first render waits for `resume`.
    pub fn held(mut self) -> Self {
        self.paused = true;
        self
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Playlist index this session was loaded from.
    pub fn index(&self) -> usize {
        self.index
    }
}

/// Output of one render pass.
pub struct Rendered {
    pub frames: usize,
    pub channels: usize,
    /// Set on the pass that exhausted the stream.
    pub completion: Option<Completion>,
}

pub struct SessionSlot {
    active: Option<PlaybackSession>,
    on_complete: Option<Completion>,
    volume: f64,
}

impl SessionSlot {
    pub fn new(volume: f64) -> Self {
        Self {
            active: None,
            on_complete: None,
            volume: clamp_volume(volume),
        }
    }

    /// Replace the active session. The previous stream is closed and its completion dropped.
    pub fn install(&mut self, mut session: PlaybackSession, on_complete: Completion) {
        self.close();
        session.stream.set_volume(self.volume);
        tracing::debug!(session = session.id, index = session.index, "session installed");
        self.active = Some(session);
        self.on_complete = Some(on_complete);
    }

    /// Close the active session without firing its completion.
    pub fn close(&mut self) {
        if let Some(mut old) = self.active.take() {
            old.stream.close();
            tracing::debug!(session = old.id, "session closed");
        }
        self.on_complete = None;
    }

    pub fn pause(&mut self) -> bool {
        match self.active.as_mut() {
            Some(s) if !s.finished => {
                s.paused = true;
                true
            }
            _ => false,
        }
    }

    pub fn resume(&mut self) -> bool {
        match self.active.as_mut() {
            Some(s) if !s.finished => {
                s.paused = false;
                true
            }
            _ => false,
        }
    }

    pub fn is_paused(&self) -> bool {
        self.active.as_ref().is_some_and(|s| s.paused)
    }

    /// Rewind the active session. The paused flag is left as is.
    pub fn seek_to_start(&mut self) -> Result<()> {
        match self.active.as_mut() {
            None => Err(PlayerError::Seek("no active session".to_string())),
            Some(s) if s.finished => Err(PlayerError::Seek("session already finished".to_string())),
            Some(s) => s.stream.seek(0),
        }
    }

    pub fn set_volume(&mut self, volume: f64) {
        self.volume = clamp_volume(volume);
        if let Some(s) = self.active.as_mut() {
            s.stream.set_volume(self.volume);
        }
    }

    pub fn volume(&self) -> f64 {
        self.volume
    }

    pub fn active_id(&self) -> Option<u64> {
        self.active.as_ref().map(|s| s.id)
    }

    /// Frames played in the active session, `0` when idle.
    pub fn position(&self) -> u64 {
        self.active.as_ref().map_or(0, |s| s.stream.position())
    }

    /// Active session length in frames, `0` when idle or unknown.
    pub fn length(&self) -> u64 {
        self.active.as_ref().map_or(0, |s| s.stream.len())
    }

    pub fn sample_rate(&self) -> Option<u32> {
        self.active.as_ref().map(|s| s.stream.format().sample_rate)
    }

    /// Pull up to `frames` frames of the active session into `buf`.
    ///
    /// Returns `None` when there is nothing to play (idle, paused or already finished).
    pub fn render(&mut self, frames: usize, buf: &mut Vec<f32>) -> Option<Rendered> {
        let session = self.active.as_mut()?;
        if session.paused || session.finished {
            return None;
        }

        let channels = session.stream.format().channels;
        buf.resize(frames * channels, 0.0);
        let n = session.stream.read(buf);
        buf.truncate(n * channels);

        let completion = if n < frames {
            session.finished = true;
            tracing::debug!(session = session.id, "session drained");
            self.on_complete.take()
        } else {
            None
        };
        Some(Rendered {
            frames: n,
            channels,
            completion,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::test_util::VecStream;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn session(id: u64, frames: usize, value: f32) -> PlaybackSession {
        let stream = VecStream::constant(100, 1, frames, value);
        PlaybackSession::new(id, id as usize, Box::new(stream))
    }

    fn counter() -> (Arc<AtomicUsize>, Completion) {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let done: Completion = Box::new(move || {
            h.fetch_add(1, Ordering::SeqCst);
        });
        (hits, done)
    }

    #[test]
    fn render_hands_out_completion_once() {
        let mut slot = SessionSlot::new(100.0);
        let (hits, done) = counter();
        slot.install(session(1, 15, 0.5), done);

        let mut buf = Vec::new();
        let r = slot.render(10, &mut buf).unwrap();
        assert_eq!(r.frames, 10);
        assert!(r.completion.is_none());

        let r = slot.render(10, &mut buf).unwrap();
        assert_eq!(r.frames, 5);
        assert_eq!(buf.len(), 5);
        (r.completion.unwrap())();

        assert!(slot.render(10, &mut buf).is_none());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn install_closes_previous_without_completion() {
        let mut slot = SessionSlot::new(100.0);
        let (hits, done) = counter();
        slot.install(session(1, 100, 0.1), done);
        let (_, done2) = counter();
        slot.install(session(2, 100, 0.2), done2);

        assert_eq!(slot.active_id(), Some(2));
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        let mut buf = Vec::new();
        slot.render(4, &mut buf).unwrap();
        assert!(buf.iter().all(|s| *s == 0.2));
    }

    #[test]
    fn paused_session_renders_nothing_and_keeps_position() {
        let mut slot = SessionSlot::new(100.0);
        slot.install(session(1, 100, 0.1), Box::new(|| {}));
        let mut buf = Vec::new();
        slot.render(10, &mut buf).unwrap();

        assert!(slot.pause());
        assert!(slot.render(10, &mut buf).is_none());
        assert_eq!(slot.position(), 10);

        assert!(slot.resume());
        assert_eq!(slot.render(10, &mut buf).unwrap().frames, 10);
    }

    #[test]
    fn held_session_waits_for_resume() {
        let mut slot = SessionSlot::new(100.0);
        slot.install(session(1, 100, 0.3).held(), Box::new(|| {}));
        let mut buf = Vec::new();
        assert!(slot.is_paused());
        assert!(slot.render(10, &mut buf).is_none());
        assert_eq!(slot.position(), 0);

        assert!(slot.resume());
        assert_eq!(slot.render(10, &mut buf).unwrap().frames, 10);
    }

    #[test]
    fn finished_session_cannot_be_paused() {
        let mut slot = SessionSlot::new(100.0);
        slot.install(session(1, 5, 0.1), Box::new(|| {}));
        let mut buf = Vec::new();
        assert!(slot.render(10, &mut buf).unwrap().completion.is_some());
        assert!(!slot.pause());
        assert!(!slot.is_paused());
    }

    #[test]
    fn seek_to_start_requires_live_session() {
        let mut slot = SessionSlot::new(100.0);
        assert!(matches!(slot.seek_to_start(), Err(PlayerError::Seek(_))));

        slot.install(session(1, 5, 0.1), Box::new(|| {}));
        let mut buf = Vec::new();
        slot.render(10, &mut buf);
        assert!(slot.seek_to_start().is_err());
    }

    #[test]
    fn seek_to_start_keeps_pause() {
        let mut slot = SessionSlot::new(100.0);
        slot.install(session(1, 50, 0.1), Box::new(|| {}));
        let mut buf = Vec::new();
        slot.render(20, &mut buf);
        slot.pause();
        slot.seek_to_start().unwrap();
        assert_eq!(slot.position(), 0);
        assert!(slot.is_paused());
    }

    #[test]
    fn volume_carries_over_to_new_sessions() {
        let mut slot = SessionSlot::new(100.0);
        slot.set_volume(0.0);
        slot.install(session(1, 10, 0.7), Box::new(|| {}));
        let mut buf = Vec::new();
        slot.render(10, &mut buf);
        assert!(buf.iter().all(|s| *s == 0.0));
        assert_eq!(slot.volume(), 0.0);
    }

    #[test]
    fn idle_slot_reports_zero() {
        let slot = SessionSlot::new(100.0);
        assert_eq!(slot.position(), 0);
        assert_eq!(slot.length(), 0);
        assert!(slot.sample_rate().is_none());
    }
}
