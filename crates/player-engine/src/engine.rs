//! Transport state machine and playlist control.
//!
//! All commands are serialized by one control lock. Opening and decoding a track happens
//! under that lock but off the render thread's slot lock, so a slow open never stalls audio
//! that is already playing. Natural completions arrive on a worker thread and are matched
//! against the current session id; a completion from a session that has since been
//! replaced is dropped.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;

use crate::config::PlaybackConfig;
use crate::decode;
use crate::device::pick_device;
use crate::error::{PlayerError, Result};
use crate::gain::clamp_volume;
use crate::playback::CpalSink;
use crate::playlist::{Playlist, Track};
use crate::progress::{Progress, ProgressCallback, ProgressReporter, Subscribers};
use crate::resample;
use crate::session::PlaybackSession;
use crate::speaker::{Sink, SinkFactory, Speaker};
use crate::stream::{Limit, SampleStream};
use crate::transport::{Command, TransportCell, TransportState};

/// Turns a playlist entry into a stream in its native format.
pub trait TrackOpener: Send + Sync {
    fn open(&self, track: &Track) -> Result<Box<dyn SampleStream>>;
}

/// Opens tracks from disk through [`decode::open`].
pub struct FileOpener;

impl TrackOpener for FileOpener {
    fn open(&self, track: &Track) -> Result<Box<dyn SampleStream>> {
        Ok(Box::new(decode::open(&track.path)?))
    }
}

/// Notifications published by the engine.
#[derive(Clone, Debug, PartialEq)]
pub enum EngineEvent {
    /// The track at `index` was installed. If the transport is `Paused` it waits at the start.
    TrackStarted { index: usize, label: String },
    /// The track at `index` played to its end (not emitted for interrupted tracks).
    StreamCompleted { index: usize },
    TransportChanged(TransportState),
    VolumeChanged(f64),
    Error(String),
}

/// How a newly loaded session takes over from the previous one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Handoff {
    /// Drop whatever the device still has queued.
    Interrupt,
    /// Let the previous tail play out first.
    Gapless,
    /// Gapless, but the new session waits paused.
    Held,
}

enum WorkerMsg {
    Completed(u64),
    Shutdown,
}

struct Control {
    playlist: Playlist,
    session: Option<u64>,
    reporter: Option<ProgressReporter>,
}

struct EngineInner {
    config: PlaybackConfig,
    speaker: Speaker,
    opener: Box<dyn TrackOpener>,
    control: Mutex<Control>,
    transport: TransportCell,
    subscribers: Subscribers,
    /// One sender per `events()` caller; dropped once its receiver goes away.
    listeners: Mutex<Vec<Sender<EngineEvent>>>,
    worker_tx: Sender<WorkerMsg>,
    next_session: AtomicU64,
}

/// Single-stream player over a fixed playlist.
pub struct Engine {
    inner: Arc<EngineInner>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Engine {
    /// Build an engine rendering into the sink produced by `make_sink`.
    ///
    /// The engine starts `Stopped`; call [`Engine::run`] to start the first track.
    pub fn new(
        config: PlaybackConfig,
        playlist: Playlist,
        make_sink: SinkFactory,
        opener: Box<dyn TrackOpener>,
    ) -> Result<Self> {
        let speaker = Speaker::init(&config, make_sink)?;
        let (worker_tx, worker_rx) = crossbeam_channel::unbounded();

        let inner = Arc::new(EngineInner {
            config,
            speaker,
            opener,
            control: Mutex::new(Control {
                playlist,
                session: None,
                reporter: None,
            }),
            transport: TransportCell::default(),
            subscribers: Subscribers::default(),
            listeners: Mutex::new(Vec::new()),
            worker_tx,
            next_session: AtomicU64::new(1),
        });

        let worker_inner = inner.clone();
        let worker = thread::Builder::new()
            .name("engine".to_string())
            .spawn(move || worker_loop(worker_inner, worker_rx))
            .map_err(|e| PlayerError::Device(format!("spawn engine worker: {e}")))?;

        Ok(Self {
            inner,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Build an engine on a CPAL output device (`device` is a name substring, `None` for the
    /// host default) that opens tracks from disk.
    pub fn with_device(
        config: PlaybackConfig,
        playlist: Playlist,
        device: Option<String>,
    ) -> Result<Self> {
        let sink_config = config.clone();
        let make_sink: SinkFactory = Box::new(move || {
            let host = cpal::default_host();
            let device = pick_device(&host, device.as_deref())?;
            Ok(Box::new(CpalSink::open(&device, &sink_config)?) as Box<dyn Sink>)
        });
        Self::new(config, playlist, make_sink, Box::new(FileOpener))
    }

    /// Start playing the track under the cursor. No-op if already running or empty.
    pub fn run(&self) -> Result<()> {
        let mut ctl = self.inner.control.lock();
        if self.inner.transport.load() != TransportState::Stopped || ctl.playlist.is_empty() {
            return Ok(());
        }
        let index = ctl.playlist.cursor();
        self.inner.load(&mut ctl, index, Handoff::Gapless)
    }

    pub fn command(&self, cmd: Command) -> Result<()> {
        tracing::debug!(?cmd, "command");
        self.inner.handle(cmd)
    }

    /// Register a callback invoked at the progress interval while playing or paused.
    pub fn subscribe(&self, callback: impl Fn(&Progress) + Send + 'static) {
        let callback: ProgressCallback = Box::new(callback);
        self.inner.subscribers.add(callback);
    }

    /// A new event stream that sees every event published from now on.
    ///
    /// Nothing is queued for a receiver once it is dropped.
    pub fn events(&self) -> Receiver<EngineEvent> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.inner.listeners.lock().push(tx);
        rx
    }

    pub fn progress(&self) -> Progress {
        self.inner.progress()
    }

    pub fn current_transport_state(&self) -> TransportState {
        self.inner.transport.load()
    }

    pub fn current_track_label(&self) -> Option<String> {
        self.inner
            .control
            .lock()
            .playlist
            .current()
            .map(|t| t.label.clone())
    }

    pub fn current_index(&self) -> Option<usize> {
        let ctl = self.inner.control.lock();
        (!ctl.playlist.is_empty()).then(|| ctl.playlist.cursor())
    }

    pub fn volume(&self) -> f64 {
        self.inner.speaker.lock().volume()
    }

    pub fn playlist(&self) -> Playlist {
        self.inner.control.lock().playlist.clone()
    }

    /// Stop playback, end the worker and release the device. Idempotent.
    pub fn shutdown(&self) {
        {
            let mut ctl = self.inner.control.lock();
            self.inner.stop_locked(&mut ctl);
        }
        let _ = self.inner.worker_tx.send(WorkerMsg::Shutdown);
        if let Some(handle) = self.worker.lock().take() {
            if handle.join().is_err() {
                tracing::error!("engine worker panicked");
            }
        }
        self.inner.speaker.shutdown();
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(inner: Arc<EngineInner>, rx: Receiver<WorkerMsg>) {
    for msg in rx.iter() {
        match msg {
            WorkerMsg::Completed(id) => inner.on_completed(id),
            WorkerMsg::Shutdown => break,
        }
    }
    tracing::debug!("engine worker exiting");
}

impl EngineInner {
    fn emit(&self, event: EngineEvent) {
        tracing::trace!(?event, "event");
        self.listeners
            .lock()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn set_state(&self, state: TransportState) {
        if self.transport.load() != state {
            self.transport.store(state);
            tracing::debug!(%state, "transport");
            self.emit(EngineEvent::TransportChanged(state));
        }
    }

    fn progress(&self) -> Progress {
        let slot = self.speaker.lock();
        Progress {
            position: slot.position(),
            length: slot.length(),
            sample_rate: slot
                .sample_rate()
                .unwrap_or(self.speaker.format().sample_rate),
        }
    }

    fn handle(self: &Arc<Self>, cmd: Command) -> Result<()> {
        let mut ctl = self.control.lock();
        match cmd {
            Command::PlayPause => match self.transport.load() {
                TransportState::Playing => {
                    // A session that already rendered its last block cannot be paused; its
                    // completion is pending and will honour the Paused state.
                    if !self.speaker.pause() {
                        tracing::debug!("paused at end of track");
                    }
                    self.set_state(TransportState::Paused);
                    Ok(())
                }
                TransportState::Paused => {
                    self.speaker.resume();
                    self.set_state(TransportState::Playing);
                    Ok(())
                }
                TransportState::Stopped => {
                    if ctl.playlist.is_empty() {
                        return Ok(());
                    }
                    let index = ctl.playlist.cursor();
                    self.load(&mut ctl, index, Handoff::Interrupt)
                }
            },
            Command::Restart => {
                if self.transport.load() == TransportState::Stopped {
                    return Ok(());
                }
                self.speaker.rewind().inspect_err(|e| {
                    tracing::warn!("restart failed: {e}");
                    self.emit(EngineEvent::Error(e.to_string()));
                })
            }
            Command::Next => {
                if ctl.playlist.next().is_none() {
                    tracing::debug!("already at last track");
                    return Ok(());
                }
                let index = ctl.playlist.cursor();
                self.load(&mut ctl, index, Handoff::Interrupt)
            }
            Command::Previous => {
                if ctl.playlist.previous().is_none() {
                    tracing::debug!("already at first track");
                    return Ok(());
                }
                let index = ctl.playlist.cursor();
                self.load(&mut ctl, index, Handoff::Interrupt)
            }
            Command::SelectTrack(index) => {
                ctl.playlist.select_index(index)?;
                self.load(&mut ctl, index, Handoff::Interrupt)
            }
            Command::SetVolume(volume) => {
                let volume = clamp_volume(volume);
                self.speaker.with_slot(|slot| slot.set_volume(volume));
                self.emit(EngineEvent::VolumeChanged(volume));
                Ok(())
            }
        }
    }

    /// Open, adapt and install the track at `index`.
    ///
    /// On failure the transport ends `Stopped` with no session.
    fn load(self: &Arc<Self>, ctl: &mut Control, index: usize, handoff: Handoff) -> Result<()> {
        let track = ctl.playlist.select_index(index)?.clone();

        let stream = match self.open_stream(&track) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(path = %track.path.display(), "load failed: {e}");
                self.emit(EngineEvent::Error(e.to_string()));
                self.stop_locked(ctl);
                return Err(e);
            }
        };

        let id = self.next_session.fetch_add(1, Ordering::Relaxed);
        let tx = self.worker_tx.clone();
        let mut session = PlaybackSession::new(id, index, stream);
        if handoff == Handoff::Held {
            session = session.held();
        }
        self.speaker.play(
            session,
            Box::new(move || {
                let _ = tx.send(WorkerMsg::Completed(id));
            }),
            handoff == Handoff::Interrupt,
        );
        ctl.session = Some(id);

        if handoff == Handoff::Held {
            tracing::info!(index, label = %track.label, "cued (paused)");
            self.set_state(TransportState::Paused);
        } else {
            tracing::info!(index, label = %track.label, "now playing");
            self.set_state(TransportState::Playing);
        }
        self.ensure_reporter(ctl);
        self.emit(EngineEvent::TrackStarted {
            index,
            label: track.label,
        });
        Ok(())
    }

    fn open_stream(&self, track: &Track) -> Result<Box<dyn SampleStream>> {
        let mut stream = self.opener.open(track)?;
        if let Some(secs) = self.config.max_track_seconds.filter(|s| *s > 0) {
            stream = Box::new(Limit::duration(stream, Duration::from_secs(secs as u64)));
        }
        resample::adapt(
            stream,
            self.speaker.format().sample_rate,
            self.config.chunk_frames,
        )
        .map_err(|e| PlayerError::decode(&track.path, e))
    }

    fn stop_locked(&self, ctl: &mut Control) {
        self.speaker.with_slot(|slot| slot.close());
        ctl.session = None;
        self.set_state(TransportState::Stopped);
        if let Some(reporter) = ctl.reporter.take() {
            reporter.cancel();
        }
    }

    fn ensure_reporter(self: &Arc<Self>, ctl: &mut Control) {
        if ctl.reporter.as_ref().is_some_and(|r| !r.is_finished()) {
            return;
        }
        if let Some(old) = ctl.reporter.take() {
            old.cancel();
        }
        let weak = Arc::downgrade(self);
        match ProgressReporter::start(
            self.config.progress_interval,
            self.transport.clone(),
            move || weak.upgrade().map(|inner| inner.progress()),
            self.subscribers.clone(),
        ) {
            Ok(reporter) => ctl.reporter = Some(reporter),
            Err(e) => tracing::warn!("progress reporter not started: {e}"),
        }
    }

    fn on_completed(self: &Arc<Self>, id: u64) {
        let mut ctl = self.control.lock();
        if ctl.session != Some(id) {
            tracing::trace!(session = id, "stale completion ignored");
            return;
        }

        let index = ctl.playlist.cursor();
        tracing::debug!(index, "track completed");
        self.emit(EngineEvent::StreamCompleted { index });

        // A pause that lands after the last block was rendered still wins: the next track is
        // cued but not started.
        let handoff = match self.transport.load() {
            TransportState::Paused => Handoff::Held,
            _ => Handoff::Gapless,
        };
        if ctl.playlist.next().is_some() {
            let next = ctl.playlist.cursor();
            if let Err(e) = self.load(&mut ctl, next, handoff) {
                tracing::warn!(index = next, "auto-advance failed: {e}");
            }
        } else {
            tracing::info!("playlist finished");
            self.stop_locked(&mut ctl);
        }
    }
}
