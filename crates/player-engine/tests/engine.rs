use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;
use player_engine::{
    Command, Engine, EngineEvent, Format, MemoryCapture, MemorySink, PlaybackConfig, PlayerError,
    Playlist, Result, SampleStream, Sink, Track, TrackOpener, TransportState,
};

const RATE: u32 = 1_000;

/// Mono stream of a constant level.
struct ConstStream {
    frames: u64,
    value: f32,
    pos: u64,
    closed: bool,
    closes: Arc<AtomicUsize>,
}

impl SampleStream for ConstStream {
    fn format(&self) -> Format {
        Format::new(RATE, 1)
    }

    fn read(&mut self, out: &mut [f32]) -> usize {
        if self.closed {
            return 0;
        }
        let n = (out.len() as u64).min(self.frames - self.pos) as usize;
        out[..n].fill(self.value);
        self.pos += n as u64;
        n
    }

    fn seek(&mut self, frame: u64) -> Result<()> {
        if self.closed || frame > self.frames {
            return Err(PlayerError::Seek(format!("frame {frame}")));
        }
        self.pos = frame;
        Ok(())
    }

    fn position(&self) -> u64 {
        self.pos
    }

    fn len(&self) -> u64 {
        self.frames
    }

    fn close(&mut self) {
        if !self.closed {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
        self.closed = true;
    }

    fn is_closed(&self) -> bool {
        self.closed
    }
}

/// Track `trackN` plays level `(N + 1) / 8`; paths starting with `bad` fail to open.
struct SyntheticOpener {
    frames: u64,
    opened: Arc<AtomicUsize>,
    closed: Arc<AtomicUsize>,
}

impl TrackOpener for SyntheticOpener {
    fn open(&self, track: &Track) -> Result<Box<dyn SampleStream>> {
        let name = track.path.to_string_lossy().into_owned();
        if name.starts_with("bad") {
            return Err(PlayerError::Decode {
                path: track.path.clone(),
                source: "corrupt header".into(),
            });
        }
        let index: usize = name.trim_start_matches("track").parse().unwrap_or(0);
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ConstStream {
            frames: self.frames,
            value: level(index),
            pos: 0,
            closed: false,
            closes: self.closed.clone(),
        }))
    }
}

fn level(index: usize) -> f32 {
    (index + 1) as f32 / 8.0
}

struct Harness {
    engine: Engine,
    events: Receiver<EngineEvent>,
    capture: MemoryCapture,
    opened: Arc<AtomicUsize>,
    closed: Arc<AtomicUsize>,
}

fn harness_with(names: &[&str], frames: u64, config: PlaybackConfig) -> Harness {
    let tracks = names
        .iter()
        .map(|n| Track::new(PathBuf::from(n), *n))
        .collect();
    let sink = MemorySink::new(RATE, 1);
    let capture = sink.capture();
    let opened = Arc::new(AtomicUsize::new(0));
    let closed = Arc::new(AtomicUsize::new(0));
    let engine = Engine::new(
        config,
        Playlist::new(tracks),
        Box::new(move || Ok(Box::new(sink) as Box<dyn Sink>)),
        Box::new(SyntheticOpener {
            frames,
            opened: opened.clone(),
            closed: closed.clone(),
        }),
    )
    .unwrap();
    let events = engine.events();
    Harness {
        engine,
        events,
        capture,
        opened,
        closed,
    }
}

fn test_config() -> PlaybackConfig {
    PlaybackConfig {
        device_rate: RATE,
        buffer_ms: 10,
        progress_interval: Duration::from_millis(20),
        ..PlaybackConfig::default()
    }
}

fn harness(names: &[&str], frames: u64) -> Harness {
    harness_with(names, frames, test_config())
}

/// Collect events until `done` matches one, or panic after `timeout`.
fn wait_for(
    events: &Receiver<EngineEvent>,
    timeout: Duration,
    done: impl Fn(&EngineEvent) -> bool,
) -> Vec<EngineEvent> {
    let deadline = Instant::now() + timeout;
    let mut seen = Vec::new();
    loop {
        let left = deadline.saturating_duration_since(Instant::now());
        match events.recv_timeout(left) {
            Ok(ev) => {
                let hit = done(&ev);
                seen.push(ev);
                if hit {
                    return seen;
                }
            }
            Err(_) => panic!("timed out; events so far: {seen:?}"),
        }
    }
}

fn wait_until(timeout: Duration, mut f: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if f() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    f()
}

fn drain(events: &Receiver<EngineEvent>) -> Vec<EngineEvent> {
    events.try_iter().collect()
}

fn started(index: usize) -> impl Fn(&EngineEvent) -> bool {
    move |ev| matches!(ev, EngineEvent::TrackStarted { index: i, .. } if *i == index)
}

#[test]
fn playlist_plays_through_and_stops() {
    let h = harness(&["track0", "track1", "track2"], 100);
    h.engine.run().unwrap();

    let events = wait_for(&h.events, Duration::from_secs(5), |ev| {
        *ev == EngineEvent::TransportChanged(TransportState::Stopped)
    });

    let completed: Vec<usize> = events
        .iter()
        .filter_map(|ev| match ev {
            EngineEvent::StreamCompleted { index } => Some(*index),
            _ => None,
        })
        .collect();
    assert_eq!(completed, vec![0, 1, 2]);

    let started: Vec<usize> = events
        .iter()
        .filter_map(|ev| match ev {
            EngineEvent::TrackStarted { index, .. } => Some(*index),
            _ => None,
        })
        .collect();
    assert_eq!(started, vec![0, 1, 2]);
    assert_eq!(h.engine.current_transport_state(), TransportState::Stopped);

    // Every track is heard in full, in order, and never mixed with another.
    let samples = h.capture.samples();
    assert_eq!(samples.len(), 300);
    for (i, chunk) in samples.chunks(100).enumerate() {
        assert!(chunk.iter().all(|s| *s == level(i)), "track {i} corrupted");
    }
}

#[test]
fn select_track_switches_immediately() {
    let h = harness(&["track0", "track1", "track2", "track3", "track4"], 10_000);
    h.engine.run().unwrap();
    wait_for(&h.events, Duration::from_secs(2), started(0));
    thread::sleep(Duration::from_millis(50));

    h.engine.command(Command::SelectTrack(2)).unwrap();
    let events = wait_for(&h.events, Duration::from_secs(2), started(2));
    assert!(
        !events
            .iter()
            .any(|ev| matches!(ev, EngineEvent::StreamCompleted { .. }))
    );
    assert_eq!(h.engine.current_track_label().as_deref(), Some("track2"));
    assert_eq!(h.engine.current_index(), Some(2));

    thread::sleep(Duration::from_millis(100));
    let samples = h.capture.samples();
    let first_new = samples
        .iter()
        .position(|s| *s == level(2))
        .expect("selected track never reached the sink");
    assert!(samples[first_new..].iter().all(|s| *s == level(2)));
    assert!(h.capture.clears() >= 1);
}

#[test]
fn select_track_from_stopped_skips_earlier_tracks() {
    let h = harness(&["track0", "track1", "track2", "track3"], 10_000);
    h.engine.command(Command::SelectTrack(2)).unwrap();

    let events = wait_for(&h.events, Duration::from_secs(2), |ev| {
        matches!(ev, EngineEvent::TrackStarted { .. })
    });
    assert_eq!(
        events.last(),
        Some(&EngineEvent::TrackStarted {
            index: 2,
            label: "track2".to_string()
        })
    );
    assert_eq!(h.opened.load(Ordering::SeqCst), 1);

    assert!(wait_until(Duration::from_secs(2), || h.capture.frames() > 0));
    assert!(h.capture.samples().iter().all(|s| *s == level(2)));
}

#[test]
fn next_then_previous_returns_to_first_track() {
    let h = harness(&["track0", "track1", "track2"], 10_000);
    h.engine.run().unwrap();
    wait_for(&h.events, Duration::from_secs(2), started(0));

    h.engine.command(Command::Next).unwrap();
    wait_for(&h.events, Duration::from_secs(2), started(1));
    h.engine.command(Command::Previous).unwrap();
    wait_for(&h.events, Duration::from_secs(2), started(0));

    assert_eq!(h.engine.current_index(), Some(0));
    assert_eq!(h.engine.current_transport_state(), TransportState::Playing);
}

#[test]
fn navigation_past_either_end_is_a_no_op() {
    let h = harness(&["track0", "track1"], 10_000);
    h.engine.run().unwrap();
    wait_for(&h.events, Duration::from_secs(2), started(0));

    h.engine.command(Command::Previous).unwrap();
    h.engine.command(Command::SelectTrack(1)).unwrap();
    wait_for(&h.events, Duration::from_secs(2), started(1));
    h.engine.command(Command::Next).unwrap();
    thread::sleep(Duration::from_millis(50));

    assert!(
        !drain(&h.events)
            .iter()
            .any(|ev| matches!(ev, EngineEvent::TrackStarted { .. }))
    );
    assert_eq!(h.engine.current_index(), Some(1));
    assert_eq!(h.opened.load(Ordering::SeqCst), 2);

    let err = h.engine.command(Command::SelectTrack(9)).unwrap_err();
    assert!(matches!(err, PlayerError::Index { index: 9, len: 2 }));
    assert_eq!(h.engine.current_transport_state(), TransportState::Playing);
    assert_eq!(h.engine.current_index(), Some(1));
}

#[test]
fn restart_while_paused_rewinds_and_stays_paused() {
    let h = harness(&["track0"], 10_000);
    h.engine.run().unwrap();
    let deadline = Instant::now() + Duration::from_secs(2);
    while h.engine.progress().position < 50 {
        assert!(Instant::now() < deadline, "playback did not advance");
        thread::sleep(Duration::from_millis(5));
    }

    h.engine.command(Command::PlayPause).unwrap();
    assert_eq!(h.engine.current_transport_state(), TransportState::Paused);
    assert_eq!(h.engine.current_transport_state().button_label(), "Play");

    h.engine.command(Command::Restart).unwrap();
    h.engine.command(Command::Restart).unwrap();
    assert_eq!(h.engine.progress().position, 0);
    assert_eq!(h.engine.current_transport_state(), TransportState::Paused);

    h.engine.command(Command::PlayPause).unwrap();
    assert_eq!(h.engine.current_transport_state().button_label(), "Pause");
    thread::sleep(Duration::from_millis(50));
    assert!(h.engine.progress().position > 0);
}

#[test]
fn restart_when_stopped_does_nothing() {
    let h = harness(&["track0"], 10_000);
    h.engine.command(Command::Restart).unwrap();
    assert_eq!(h.engine.current_transport_state(), TransportState::Stopped);
    assert_eq!(h.opened.load(Ordering::SeqCst), 0);
}

#[test]
fn rapid_play_pause_toggles_keep_one_session() {
    let h = harness(&["track0", "track1"], 10_000);
    h.engine.run().unwrap();
    wait_for(&h.events, Duration::from_secs(2), started(0));

    thread::scope(|scope| {
        let control = scope.spawn(|| {
            for _ in 0..1000 {
                h.engine.command(Command::PlayPause).unwrap();
                // The one session stays installed and open through every toggle.
                assert_eq!(h.closed.load(Ordering::SeqCst), 0);
                assert_eq!(h.engine.progress().length, 10_000);
            }
        });
        // Progress polling races the toggles the way the reporter does.
        while !control.is_finished() {
            let p = h.engine.progress();
            assert!(p.position <= p.length);
            thread::yield_now();
        }
        control.join().unwrap();
    });

    assert_eq!(h.engine.current_transport_state(), TransportState::Playing);
    h.engine.command(Command::PlayPause).unwrap();
    assert_eq!(h.engine.current_transport_state(), TransportState::Paused);

    assert_eq!(h.opened.load(Ordering::SeqCst), 1);
    assert_eq!(h.closed.load(Ordering::SeqCst), 0);
    assert!(
        !drain(&h.events)
            .iter()
            .any(|ev| matches!(ev, EngineEvent::TrackStarted { .. } | EngineEvent::Error(_)))
    );
}

#[test]
fn pause_at_end_of_track_cues_next_without_playing() {
    // One render block holds the whole first track, so the pause lands after its last
    // block was rendered but before its completion is handled.
    let config = PlaybackConfig {
        buffer_ms: 400,
        ..test_config()
    };
    let h = harness_with(&["track0", "track1"], 300, config);
    h.engine.run().unwrap();
    wait_for(&h.events, Duration::from_secs(2), started(0));
    thread::sleep(Duration::from_millis(60));

    h.engine.command(Command::PlayPause).unwrap();
    assert_eq!(h.engine.current_transport_state(), TransportState::Paused);

    let events = wait_for(&h.events, Duration::from_secs(2), started(1));
    assert!(events.contains(&EngineEvent::StreamCompleted { index: 0 }));
    thread::sleep(Duration::from_millis(600));
    assert_eq!(h.engine.current_transport_state(), TransportState::Paused);
    assert_eq!(h.engine.current_index(), Some(1));
    assert_eq!(h.engine.progress().position, 0);
    assert_eq!(h.capture.frames(), 300);
    assert!(h.capture.is_paused());

    h.engine.command(Command::PlayPause).unwrap();
    assert_eq!(h.engine.current_transport_state(), TransportState::Playing);
    wait_for(&h.events, Duration::from_secs(3), |ev| {
        *ev == EngineEvent::TransportChanged(TransportState::Stopped)
    });
    let samples = h.capture.samples();
    assert_eq!(samples.len(), 600);
    assert!(samples[300..].iter().all(|s| *s == level(1)));
}

#[test]
fn independent_event_receivers_each_see_every_event() {
    let h = harness(&["track0"], 10_000);
    let second = h.engine.events();
    let dropped = h.engine.events();
    drop(dropped);

    h.engine.command(Command::SetVolume(80.0)).unwrap();
    assert_eq!(drain(&h.events), vec![EngineEvent::VolumeChanged(80.0)]);
    assert_eq!(drain(&second), vec![EngineEvent::VolumeChanged(80.0)]);
}

#[test]
fn play_pause_from_stopped_loads_cursor_track() {
    let h = harness(&["track0", "track1"], 10_000);
    h.engine.command(Command::PlayPause).unwrap();
    wait_for(&h.events, Duration::from_secs(2), started(0));
    assert_eq!(h.engine.current_transport_state(), TransportState::Playing);
}

#[test]
fn failed_open_leaves_engine_stopped() {
    let h = harness(&["track0", "bad1"], 10_000);
    h.engine.run().unwrap();
    wait_for(&h.events, Duration::from_secs(2), started(0));

    let err = h.engine.command(Command::SelectTrack(1)).unwrap_err();
    assert!(err.is_track_error());
    assert_eq!(h.engine.current_transport_state(), TransportState::Stopped);
    assert_eq!(h.engine.progress().position, 0);
    assert_eq!(h.engine.progress().length, 0);

    let events = drain(&h.events);
    assert!(events.iter().any(|ev| matches!(ev, EngineEvent::Error(_))));

    // Navigating back recovers.
    h.engine.command(Command::Previous).unwrap();
    wait_for(&h.events, Duration::from_secs(2), started(0));
    assert_eq!(h.engine.current_transport_state(), TransportState::Playing);
}

#[test]
fn auto_advance_into_bad_track_stops() {
    let h = harness(&["track0", "bad1", "track2"], 50);
    h.engine.run().unwrap();
    let events = wait_for(&h.events, Duration::from_secs(3), |ev| {
        *ev == EngineEvent::TransportChanged(TransportState::Stopped)
    });
    assert!(events.contains(&EngineEvent::StreamCompleted { index: 0 }));
    assert!(events.iter().any(|ev| matches!(ev, EngineEvent::Error(_))));
    assert!(
        !events
            .iter()
            .any(|ev| matches!(ev, EngineEvent::TrackStarted { index: 2, .. }))
    );
    assert_eq!(h.engine.current_index(), Some(1));
}

#[test]
fn volume_is_clamped_and_applied() {
    let h = harness(&["track0"], 10_000);
    h.engine.command(Command::SetVolume(500.0)).unwrap();
    assert_eq!(h.engine.volume(), 120.0);
    h.engine.command(Command::SetVolume(0.0)).unwrap();
    assert_eq!(h.engine.volume(), 0.0);

    let events = drain(&h.events);
    assert_eq!(
        events,
        vec![EngineEvent::VolumeChanged(120.0), EngineEvent::VolumeChanged(0.0)]
    );

    h.engine.run().unwrap();
    wait_for(&h.events, Duration::from_secs(2), started(0));
    thread::sleep(Duration::from_millis(50));
    let samples = h.capture.samples();
    assert!(!samples.is_empty());
    assert!(samples.iter().all(|s| *s == 0.0));
}

#[test]
fn play_time_limit_truncates_tracks() {
    let config = PlaybackConfig {
        max_track_seconds: Some(1),
        ..test_config()
    };
    let h = harness_with(&["track0"], 5_000, config);
    h.engine.run().unwrap();
    wait_for(&h.events, Duration::from_secs(4), |ev| {
        *ev == EngineEvent::StreamCompleted { index: 0 }
    });
    assert_eq!(h.capture.frames(), 1_000);
}

#[test]
fn progress_subscribers_receive_updates() {
    let h = harness(&["track0"], 10_000);
    let hits = Arc::new(AtomicUsize::new(0));
    let seen = hits.clone();
    h.engine.subscribe(move |p| {
        assert_eq!(p.length, 10_000);
        assert_eq!(p.sample_rate, RATE);
        seen.fetch_add(1, Ordering::SeqCst);
    });
    h.engine.run().unwrap();
    thread::sleep(Duration::from_millis(150));
    assert!(hits.load(Ordering::SeqCst) >= 2);
}

#[test]
fn empty_playlist_is_inert() {
    let h = harness(&[], 100);
    h.engine.run().unwrap();
    h.engine.command(Command::PlayPause).unwrap();
    h.engine.command(Command::Next).unwrap();
    assert_eq!(h.engine.current_transport_state(), TransportState::Stopped);
    assert!(h.engine.current_track_label().is_none());
    assert!(h.engine.current_index().is_none());
}
