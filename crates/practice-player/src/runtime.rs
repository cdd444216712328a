//! Wires settings, the track source and the terminal controls to the engine.

use std::io::{BufRead, Write};
use std::sync::Arc;
use std::thread;

use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use player_engine::{
    Engine, EngineEvent, FileOpener, MemorySink, PlaybackConfig, Playlist, Progress, Sink,
    TransportState,
};

use crate::cli::{Args, Command};
use crate::config::Settings;
use crate::control::{self, Input};
use crate::library;

enum Msg {
    Line(String),
    Interrupt,
    Eof,
}

pub fn list_devices() -> Result<()> {
    let host = cpal::default_host();
    let devices = player_engine::device::list_devices(&host)?;
    if devices.is_empty() {
        println!("no output devices");
    }
    for d in devices {
        let marker = if d.is_default { "*" } else { " " };
        println!("{marker} {} ({}-{} Hz)", d.name, d.min_rate, d.max_rate);
    }
    Ok(())
}

pub fn playback_config(args: &Args, settings: &Settings) -> PlaybackConfig {
    let volume = args
        .volume
        .unwrap_or_else(|| settings.user.effective_volume());
    PlaybackConfig {
        device_rate: args.sample_rate,
        buffer_ms: args.buffer_ms,
        initial_volume: volume,
        max_track_seconds: settings.user.max_track_seconds(),
        ..PlaybackConfig::default()
    }
}

pub fn build_playlist(args: &Args, settings: &Settings) -> Playlist {
    match &args.cmd {
        Some(Command::Play { paths }) => library::file_playlist(paths),
        Some(Command::Practice) | None => {
            library::practice_playlist(&settings.user, &mut rand::thread_rng())
        }
    }
}

pub fn run(args: Args) -> Result<()> {
    let settings = Settings::load_or_create(&args.config)?;
    let config = playback_config(&args, &settings);
    let playlist = build_playlist(&args, &settings);
    if playlist.is_empty() {
        tracing::warn!(
            music_dir = %settings.user.music_dir.display(),
            announce_dir = %settings.user.announce_dir.display(),
            "playlist is empty"
        );
    }
    tracing::info!(
        tracks = playlist.len(),
        rate_hz = config.device_rate,
        volume = config.initial_volume,
        "starting"
    );

    let engine = if args.no_output {
        let sink = MemorySink::new(config.device_rate, 2).discard_samples();
        Engine::new(
            config,
            playlist,
            Box::new(move || Ok(Box::new(sink) as Box<dyn Sink>)),
            Box::new(FileOpener),
        )
    } else {
        Engine::with_device(config, playlist, args.device.clone())
    }
    .context("start engine")?;

    let label = Arc::new(Mutex::new(String::new()));
    spawn_event_logger(engine.events(), label.clone())?;
    let status_label = label.clone();
    engine.subscribe(move |p| print_status(p, &status_label.lock()));

    let (tx, rx) = crossbeam_channel::unbounded();
    let ctrlc_tx = tx.clone();
    ctrlc::set_handler(move || {
        let _ = ctrlc_tx.send(Msg::Interrupt);
    })
    .context("install ctrl-c handler")?;
    spawn_stdin_reader(tx)?;

    println!("{}", control::HELP);
    engine.run()?;
    control_loop(&engine, &rx);

    engine.shutdown();
    eprintln!();
    Ok(())
}

fn control_loop(engine: &Engine, rx: &Receiver<Msg>) {
    for msg in rx.iter() {
        let line = match msg {
            Msg::Line(line) => line,
            Msg::Interrupt => {
                tracing::info!("interrupted");
                return;
            }
            Msg::Eof => return,
        };
        match control::parse_line(&line) {
            Ok(None) => {}
            Ok(Some(Input::Quit)) => return,
            Ok(Some(Input::Help)) => println!("{}", control::HELP),
            Ok(Some(Input::List)) => print_playlist(engine),
            Ok(Some(Input::Engine(cmd))) => {
                if let Err(e) = engine.command(cmd) {
                    tracing::warn!("command failed: {e}");
                }
            }
            Err(e) => eprintln!("{e}"),
        }
    }
}

fn print_playlist(engine: &Engine) {
    let playlist = engine.playlist();
    let playing = engine.current_index();
    for (i, track) in playlist.tracks().iter().enumerate() {
        let marker = if Some(i) == playing { ">" } else { " " };
        println!("{marker} {i:3} {}", track.label);
    }
}

fn print_status(progress: &Progress, label: &str) {
    let mut err = std::io::stderr().lock();
    let _ = write!(
        err,
        "\r{} / {} {}\x1b[K",
        progress.elapsed(),
        progress.total(),
        label
    );
    let _ = err.flush();
}

fn spawn_event_logger(events: Receiver<EngineEvent>, label: Arc<Mutex<String>>) -> Result<()> {
    thread::Builder::new()
        .name("events".to_string())
        .spawn(move || {
            for event in events.iter() {
                match event {
                    EngineEvent::TrackStarted { index, label: l } => {
                        tracing::info!(index, label = %l, "now playing");
                        *label.lock() = l;
                    }
                    EngineEvent::StreamCompleted { index } => {
                        tracing::debug!(index, "track finished");
                    }
                    EngineEvent::TransportChanged(state) => {
                        tracing::info!(%state, button = state.button_label(), "transport");
                        if state == TransportState::Stopped {
                            label.lock().clear();
                        }
                    }
                    EngineEvent::VolumeChanged(v) => {
                        tracing::info!(volume = v, "volume");
                    }
                    EngineEvent::Error(e) => tracing::warn!("playback error: {e}"),
                }
            }
        })
        .context("spawn event logger")?;
    Ok(())
}

fn spawn_stdin_reader(tx: Sender<Msg>) -> Result<()> {
    thread::Builder::new()
        .name("stdin".to_string())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                match line {
                    Ok(line) => {
                        if tx.send(Msg::Line(line)).is_err() {
                            return;
                        }
                    }
                    Err(e) => {
                        tracing::warn!("stdin: {e}");
                        break;
                    }
                }
            }
            let _ = tx.send(Msg::Eof);
        })
        .context("spawn stdin reader")?;
    Ok(())
}
