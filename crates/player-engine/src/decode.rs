//! Decoder dispatch.
//!
//! Picks a [`Codec`] adapter from the file extension and uses Symphonia to:
//! - detect the container/codec
//! - decode packets into interleaved `f32` samples on demand
//!
//! Decoding is pull-based: nothing is read past the container header until the render
//! thread asks for samples.

use std::fs::File;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CodecParameters, CodecType, Decoder, DecoderOptions};
use symphonia::core::codecs::{
    CODEC_TYPE_AAC, CODEC_TYPE_ALAC, CODEC_TYPE_FLAC, CODEC_TYPE_MP3, CODEC_TYPE_PCM_ALAW,
    CODEC_TYPE_PCM_F32BE, CODEC_TYPE_PCM_F32LE, CODEC_TYPE_PCM_F64BE, CODEC_TYPE_PCM_F64LE,
    CODEC_TYPE_PCM_MULAW, CODEC_TYPE_PCM_S8, CODEC_TYPE_PCM_S16BE, CODEC_TYPE_PCM_S16LE,
    CODEC_TYPE_PCM_S24BE, CODEC_TYPE_PCM_S24LE, CODEC_TYPE_PCM_S32BE, CODEC_TYPE_PCM_S32LE,
    CODEC_TYPE_PCM_U8, CODEC_TYPE_VORBIS,
};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::{MediaSource, MediaSourceStream};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::units::Time;

use crate::error::{PlayerError, Result};
use crate::stream::{Format, SampleStream};

/// One supported container/codec family.
pub trait Codec: Sync {
    /// Short label used in logs.
    fn name(&self) -> &'static str;

    /// Lower-case extensions (without the dot) this adapter claims.
    fn extensions(&self) -> &'static [&'static str];

    /// Whether a detected codec is what this adapter expects to find.
    fn accepts(&self, codec: CodecType) -> bool;

    /// Decode an opened file. The returned stream owns the file handle.
    fn decode(&self, path: &Path, file: File, ext: &str) -> Result<SymphoniaStream> {
        open_source(self, path, Box::new(file), ext)
    }
}

struct Mp3;
struct Flac;
struct OggVorbis;
struct Mp4Aac;
struct Wav;
struct Aiff;

const PCM_CODECS: &[CodecType] = &[
    CODEC_TYPE_PCM_S8,
    CODEC_TYPE_PCM_U8,
    CODEC_TYPE_PCM_S16LE,
    CODEC_TYPE_PCM_S16BE,
    CODEC_TYPE_PCM_S24LE,
    CODEC_TYPE_PCM_S24BE,
    CODEC_TYPE_PCM_S32LE,
    CODEC_TYPE_PCM_S32BE,
    CODEC_TYPE_PCM_F32LE,
    CODEC_TYPE_PCM_F32BE,
    CODEC_TYPE_PCM_F64LE,
    CODEC_TYPE_PCM_F64BE,
    CODEC_TYPE_PCM_ALAW,
    CODEC_TYPE_PCM_MULAW,
];

impl Codec for Mp3 {
    fn name(&self) -> &'static str {
        "MP3"
    }
    fn extensions(&self) -> &'static [&'static str] {
        &["mp3"]
    }
    fn accepts(&self, codec: CodecType) -> bool {
        codec == CODEC_TYPE_MP3
    }
}

impl Codec for Flac {
    fn name(&self) -> &'static str {
        "FLAC"
    }
    fn extensions(&self) -> &'static [&'static str] {
        &["flac"]
    }
    fn accepts(&self, codec: CodecType) -> bool {
        codec == CODEC_TYPE_FLAC
    }
}

impl Codec for OggVorbis {
    fn name(&self) -> &'static str {
        "OGG/VORBIS"
    }
    fn extensions(&self) -> &'static [&'static str] {
        &["ogg", "oga"]
    }
    fn accepts(&self, codec: CodecType) -> bool {
        codec == CODEC_TYPE_VORBIS
    }
}

impl Codec for Mp4Aac {
    fn name(&self) -> &'static str {
        "MP4/AAC"
    }
    fn extensions(&self) -> &'static [&'static str] {
        &["m4a", "mp4", "aac"]
    }
    fn accepts(&self, codec: CodecType) -> bool {
        codec == CODEC_TYPE_AAC || codec == CODEC_TYPE_ALAC
    }
}

impl Codec for Wav {
    fn name(&self) -> &'static str {
        "WAV"
    }
    fn extensions(&self) -> &'static [&'static str] {
        &["wav", "wave"]
    }
    fn accepts(&self, codec: CodecType) -> bool {
        PCM_CODECS.contains(&codec)
    }
}

impl Codec for Aiff {
    fn name(&self) -> &'static str {
        "AIFF"
    }
    fn extensions(&self) -> &'static [&'static str] {
        &["aif", "aiff"]
    }
    fn accepts(&self, codec: CodecType) -> bool {
        PCM_CODECS.contains(&codec)
    }
}

static CODECS: [&dyn Codec; 6] = [&Mp3, &Flac, &OggVorbis, &Mp4Aac, &Wav, &Aiff];

fn normalize_extension(ext: &str) -> String {
    ext.trim().trim_start_matches('.').to_ascii_lowercase()
}

/// Look up the adapter for an extension (case-insensitive, leading dot optional).
pub fn codec_for_extension(ext: &str) -> Option<&'static dyn Codec> {
    let ext = normalize_extension(ext);
    CODECS
        .iter()
        .copied()
        .find(|c| c.extensions().contains(&ext.as_str()))
}

/// Whether a file with this extension can be opened.
pub fn is_supported_extension(ext: &str) -> bool {
    codec_for_extension(ext).is_some()
}

/// Open `path` and detect its format; the stream stays in the file's native format.
///
/// File I/O and codec initialization happen here, never on the render path.
pub fn open(path: &Path) -> Result<SymphoniaStream> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(normalize_extension)
        .unwrap_or_default();
    let codec = codec_for_extension(&ext).ok_or_else(|| PlayerError::UnsupportedFormat {
        path: path.to_path_buf(),
        extension: ext.clone(),
    })?;
    let file = File::open(path).map_err(|e| PlayerError::decode(path, e))?;
    let stream = codec.decode(path, file, &ext)?;
    tracing::debug!(
        path = %path.display(),
        adapter = codec.name(),
        codec = stream.codec_name().unwrap_or("?"),
        rate_hz = stream.format.sample_rate,
        channels = stream.format.channels,
        frames = stream.len,
        "source opened"
    );
    Ok(stream)
}

/// Detect the format of a [`MediaSource`] and build the decoder for its default track.
fn open_source<C: Codec + ?Sized>(
    codec: &C,
    path: &Path,
    source: Box<dyn MediaSource>,
    ext: &str,
) -> Result<SymphoniaStream> {
    let mss = MediaSourceStream::new(source, Default::default());

    let mut hint = Hint::new();
    hint.with_extension(ext);

    let detected = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| PlayerError::decode(path, e))?;

    let reader = detected.format;
    let track = reader
        .default_track()
        .ok_or_else(|| PlayerError::decode(path, "no default audio track"))?;
    let track_id = track.id;
    let params: CodecParameters = track.codec_params.clone();

    let channels = params
        .channels
        .ok_or_else(|| PlayerError::decode(path, "unknown channel layout"))?
        .count();
    let rate = params
        .sample_rate
        .ok_or_else(|| PlayerError::decode(path, "unknown sample rate"))?;
    if channels == 0 || rate == 0 {
        return Err(PlayerError::decode(path, "stream reports no audio"));
    }

    if !codec.accepts(params.codec) {
        tracing::warn!(
            path = %path.display(),
            adapter = codec.name(),
            codec = codec_name_from_params(&params).unwrap_or("unknown"),
            "codec does not match extension; decoding what the container holds"
        );
    }

    let decoder = symphonia::default::get_codecs()
        .make(&params, &DecoderOptions::default())
        .map_err(|e| PlayerError::decode(path, e))?;

    Ok(SymphoniaStream {
        path: path.to_path_buf(),
        reader: Some(reader),
        decoder: Some(decoder),
        track_id,
        format: Format::new(rate, channels),
        len: params.n_frames.unwrap_or(0),
        position: 0,
        pending: Vec::new(),
        pending_pos: 0,
        exhausted: false,
        codec: codec_name_from_params(&params),
    })
}

/// A decoded file, read packet by packet as samples are pulled.
pub struct SymphoniaStream {
    path: PathBuf,
    reader: Option<Box<dyn FormatReader>>,
    decoder: Option<Box<dyn Decoder>>,
    track_id: u32,
    format: Format,
    len: u64,
    position: u64,
    pending: Vec<f32>,
    pending_pos: usize,
    exhausted: bool,
    codec: Option<&'static str>,
}

impl SymphoniaStream {
    /// Best-effort codec label.
    pub fn codec_name(&self) -> Option<&'static str> {
        self.codec
    }

    /// Decode the next packet of our track into `pending`.
    ///
    /// Returns `false` once the stream is exhausted. Undecodable packets are skipped;
    /// reader errors end the stream.
    fn decode_next_packet(&mut self) -> bool {
        if self.exhausted {
            return false;
        }
        let (Some(reader), Some(decoder)) = (self.reader.as_mut(), self.decoder.as_mut()) else {
            return false;
        };

        loop {
            let packet = match reader.next_packet() {
                Ok(p) => p,
                Err(SymphoniaError::IoError(e)) if e.kind() == ErrorKind::UnexpectedEof => {
                    self.exhausted = true;
                    return false;
                }
                Err(e) => {
                    tracing::warn!(path = %self.path.display(), "read error, ending stream: {e}");
                    self.exhausted = true;
                    return false;
                }
            };
            if packet.track_id() != self.track_id {
                continue;
            }

            match decoder.decode(&packet) {
                Ok(decoded) => {
                    if decoded.frames() == 0 {
                        continue;
                    }
                    if decoded.spec().channels.count() != self.format.channels {
                        tracing::warn!(
                            path = %self.path.display(),
                            "channel count changed mid-stream; packet skipped"
                        );
                        continue;
                    }
                    let mut sample_buf =
                        SampleBuffer::<f32>::new(decoded.frames() as u64, *decoded.spec());
                    sample_buf.copy_interleaved_ref(decoded);
                    self.pending.clear();
                    self.pending.extend_from_slice(sample_buf.samples());
                    self.pending_pos = 0;
                    return true;
                }
                Err(SymphoniaError::DecodeError(e)) => {
                    tracing::debug!(path = %self.path.display(), "skipping corrupt packet: {e}");
                    continue;
                }
                Err(e) => {
                    tracing::warn!(path = %self.path.display(), "decode error, ending stream: {e}");
                    self.exhausted = true;
                    return false;
                }
            }
        }
    }
}

impl SampleStream for SymphoniaStream {
    fn format(&self) -> Format {
        self.format
    }

    fn read(&mut self, out: &mut [f32]) -> usize {
        let channels = self.format.channels;
        let want = out.len() / channels * channels;
        let mut written = 0;

        while written < want {
            if self.pending_pos >= self.pending.len() {
                if !self.decode_next_packet() {
                    break;
                }
                continue;
            }
            let n = (want - written).min(self.pending.len() - self.pending_pos);
            out[written..written + n]
                .copy_from_slice(&self.pending[self.pending_pos..self.pending_pos + n]);
            self.pending_pos += n;
            written += n;
        }

        let frames = written / channels;
        self.position += frames as u64;
        frames
    }

    fn seek(&mut self, frame: u64) -> Result<()> {
        if self.len > 0 && frame > self.len {
            return Err(PlayerError::Seek(format!(
                "frame {frame} beyond end of stream ({} frames)",
                self.len
            )));
        }
        let (Some(reader), Some(decoder)) = (self.reader.as_mut(), self.decoder.as_mut()) else {
            return Err(PlayerError::Seek("stream closed".to_string()));
        };

        let rate = self.format.sample_rate as u64;
        let time = Time::new(frame / rate, (frame % rate) as f64 / rate as f64);
        reader
            .seek(
                SeekMode::Accurate,
                SeekTo::Time {
                    time,
                    track_id: Some(self.track_id),
                },
            )
            .map_err(|e| PlayerError::Seek(format!("{}: {e}", self.path.display())))?;
        decoder.reset();

        self.pending.clear();
        self.pending_pos = 0;
        self.exhausted = false;
        self.position = frame;
        Ok(())
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn len(&self) -> u64 {
        self.len
    }

    fn close(&mut self) {
        self.reader = None;
        self.decoder = None;
        self.pending = Vec::new();
        self.pending_pos = 0;
        self.exhausted = true;
    }

    fn is_closed(&self) -> bool {
        self.reader.is_none()
    }
}

/// Best-effort codec label used in logs.
fn codec_name_from_params(params: &CodecParameters) -> Option<&'static str> {
    use symphonia::core::codecs::*;
    let name = match params.codec {
        CODEC_TYPE_FLAC => "FLAC",
        CODEC_TYPE_MP3 => "MP3",
        CODEC_TYPE_AAC => "AAC",
        CODEC_TYPE_ALAC => "ALAC",
        CODEC_TYPE_VORBIS => "VORBIS",
        CODEC_TYPE_OPUS => "OPUS",
        CODEC_TYPE_PCM_S16LE | CODEC_TYPE_PCM_S16BE => "PCM_S16",
        CODEC_TYPE_PCM_S24LE | CODEC_TYPE_PCM_S24BE => "PCM_S24",
        CODEC_TYPE_PCM_S32LE | CODEC_TYPE_PCM_S32BE => "PCM_S32",
        CODEC_TYPE_PCM_F32LE | CODEC_TYPE_PCM_F32BE => "PCM_F32",
        _ => return None,
    };
    Some(name)
}
