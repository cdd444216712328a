//! Rate adaptation stage.
//!
//! Uses Rubato to convert a stream from its native rate to the device rate. Conversion is
//! pull-based: input chunks are read from the wrapped stream only when the render thread
//! has consumed the previous chunk's output.

use anyhow::{Context, Result};
use audioadapter_buffers::direct::InterleavedSlice;
use rubato::{
    Async, FixedAsync, Indexing, Resampler, SincInterpolationParameters, SincInterpolationType,
    WindowFunction, calculate_cutoff,
};

use crate::stream::{Format, SampleStream};

/// Wrap `stream` so that it yields samples at `device_rate`.
///
/// Streams already at `device_rate` are returned unchanged.
pub fn adapt(
    stream: Box<dyn SampleStream>,
    device_rate: u32,
    chunk_frames: usize,
) -> Result<Box<dyn SampleStream>> {
    let src = stream.format();
    if src.sample_rate == device_rate {
        return Ok(stream);
    }
    tracing::debug!(
        src_hz = src.sample_rate,
        dst_hz = device_rate,
        channels = src.channels,
        "resampling"
    );
    Ok(Box::new(Resampled::new(stream, device_rate, chunk_frames)?))
}

/// A stream converted to another sample rate.
pub struct Resampled {
    inner: Box<dyn SampleStream>,
    resampler: Async<f32>,
    src: Format,
    dst: Format,
    chunk_frames: usize,
    indexing: Indexing,
    in_buf: Vec<f32>,
    out_buf: Vec<f32>,
    out_pos: usize,
    out_len: usize,
    position: u64,
    input_done: bool,
    drained: bool,
}

impl Resampled {
    pub fn new(inner: Box<dyn SampleStream>, dst_rate: u32, chunk_frames: usize) -> Result<Self> {
        let src = inner.format();
        let channels = src.channels;
        let chunk_frames = chunk_frames.max(1);
        let f_ratio = dst_rate as f64 / src.sample_rate as f64;

        let sinc_len = 128;
        let window = WindowFunction::BlackmanHarris2;
        let params = SincInterpolationParameters {
            sinc_len,
            f_cutoff: calculate_cutoff(sinc_len, window),
            interpolation: SincInterpolationType::Cubic,
            oversampling_factor: 256,
            window,
        };

        let resampler = Async::<f32>::new_sinc(
            f_ratio,
            1.1,
            &params,
            chunk_frames,
            channels,
            FixedAsync::Input,
        )
        .with_context(|| {
            format!(
                "resampler init {} Hz -> {} Hz ({} ch)",
                src.sample_rate, dst_rate, channels
            )
        })?;
        let out_frames = resampler.output_frames_max();

        Ok(Self {
            inner,
            resampler,
            src,
            dst: Format::new(dst_rate, channels),
            chunk_frames,
            indexing: Indexing {
                input_offset: 0,
                output_offset: 0,
                active_channels_mask: None,
                partial_len: None,
            },
            in_buf: vec![0.0; chunk_frames * channels],
            out_buf: vec![0.0; out_frames * channels],
            out_pos: 0,
            out_len: 0,
            position: 0,
            input_done: false,
            drained: false,
        })
    }

    /// Pull one input chunk and convert it into `out_buf`.
    fn refill(&mut self) {
        self.out_pos = 0;
        self.out_len = 0;
        if self.input_done {
            self.drained = true;
            return;
        }

        let channels = self.src.channels;
        let frames = self.inner.read(&mut self.in_buf);
        if frames == 0 {
            self.drained = true;
            return;
        }
        if frames < self.chunk_frames {
            self.input_done = true;
        }

        let input = match InterleavedSlice::new(&self.in_buf[..frames * channels], channels, frames)
        {
            Ok(a) => a,
            Err(e) => {
                tracing::error!("interleaved slice (input) error: {e:#}");
                self.drained = true;
                return;
            }
        };
        let out_capacity_frames = self.out_buf.len() / channels;
        let mut output =
            match InterleavedSlice::new_mut(&mut self.out_buf, channels, out_capacity_frames) {
                Ok(a) => a,
                Err(e) => {
                    tracing::error!("interleaved slice (output) error: {e:#}");
                    self.drained = true;
                    return;
                }
            };

        self.indexing.input_offset = 0;
        self.indexing.output_offset = 0;
        self.indexing.partial_len = (frames < self.chunk_frames).then_some(frames);

        match self
            .resampler
            .process_into_buffer(&input, &mut output, Some(&self.indexing))
        {
            Ok((_nbr_in, nbr_out)) => self.out_len = nbr_out * channels,
            Err(e) => {
                tracing::error!("resampler process error: {e:#}");
                self.drained = true;
            }
        }
    }
}

impl SampleStream for Resampled {
    fn format(&self) -> Format {
        self.dst
    }

    fn read(&mut self, out: &mut [f32]) -> usize {
        let channels = self.dst.channels;
        let want = out.len() / channels * channels;
        let mut written = 0;

        while written < want {
            if self.out_pos < self.out_len {
                let n = (want - written).min(self.out_len - self.out_pos);
                out[written..written + n]
                    .copy_from_slice(&self.out_buf[self.out_pos..self.out_pos + n]);
                self.out_pos += n;
                written += n;
            } else if self.drained || self.inner.is_closed() {
                break;
            } else {
                self.refill();
            }
        }

        let frames = written / channels;
        self.position += frames as u64;
        frames
    }

    fn seek(&mut self, frame: u64) -> crate::Result<()> {
        let src_frame = (frame as u128 * self.src.sample_rate as u128
            / self.dst.sample_rate as u128) as u64;
        self.inner.seek(src_frame)?;
        self.resampler.reset();
        self.out_pos = 0;
        self.out_len = 0;
        self.input_done = false;
        self.drained = false;
        self.position = frame;
        Ok(())
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn len(&self) -> u64 {
        (self.inner.len() as u128 * self.dst.sample_rate as u128 / self.src.sample_rate as u128)
            as u64
    }

    fn close(&mut self) {
        self.inner.close();
        self.out_pos = 0;
        self.out_len = 0;
        self.drained = true;
    }

    fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}
