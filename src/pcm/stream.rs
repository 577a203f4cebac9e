//! Fixed-size reads over a decoded, rate-converted PCM source
//!
//! The decoder hands out chunks of whatever size it likes at the file's
//! own rate. [`ResampledStream`] converts them to the output rate and lets
//! the player pull exactly the frame size it needs.

use super::gain::{scale, upsample};
use super::resample::{rate_convert, ResamplerState};
use super::PcmError;

/// Step for [`ResampledStream::play_faster`] / [`ResampledStream::play_slower`]
pub const SPEED_STEP_HZ: u32 = 441;

/// A decoded song: interleaved 16-bit PCM in native byte order
pub trait PcmSource: Send {
    /// Next chunk of samples, `None` at end of stream
    fn next_chunk(&mut self) -> Option<Vec<u8>>;

    fn sample_rate(&self) -> u32;

    /// 1 (mono) or 2 (stereo)
    fn channels(&self) -> u16;
}

pub struct ResampledStream<S: PcmSource> {
    source: S,
    out_rate: u32,
    default_rate: u32,
    gain: f32,

    /// Converted, not yet read stereo data starts at `buf[pos]`
    buf: Vec<u8>,
    pos: usize,
    state: ResamplerState,
}

impl<S: PcmSource> ResampledStream<S> {
    pub fn new(source: S, out_rate: u32) -> Result<Self, PcmError> {
        if out_rate == 0 {
            return Err(PcmError::InvalidRate(out_rate));
        }
        if source.sample_rate() == 0 {
            return Err(PcmError::InvalidRate(source.sample_rate()));
        }
        if !matches!(source.channels(), 1 | 2) {
            return Err(PcmError::UnsupportedChannels(source.channels()));
        }
        Ok(Self {
            source,
            out_rate,
            default_rate: out_rate,
            gain: 1.0,
            buf: Vec::new(),
            pos: 0,
            state: ResamplerState::new(),
        })
    }

    /// Scale all converted samples by `factor` (e.g. a Replay Gain factor)
    pub fn with_gain(mut self, factor: f32) -> Self {
        self.gain = factor;
        self
    }

    /// Read up to `size` bytes of stereo PCM at the output rate.
    ///
    /// Returns exactly `size` bytes until the source runs dry; then the
    /// remainder, then empty buffers.
    pub fn read(&mut self, size: usize) -> Result<Vec<u8>, PcmError> {
        while self.available() < size {
            let Some(chunk) = self.source.next_chunk() else {
                break;
            };
            self.refill(&chunk)?;
        }

        let n = size.min(self.available());
        let out = self.buf[self.pos..self.pos + n].to_vec();
        self.pos += n;
        Ok(out)
    }

    fn refill(&mut self, chunk: &[u8]) -> Result<(), PcmError> {
        let stereo;
        let chunk = if self.source.channels() == 1 {
            stereo = upsample(chunk);
            &stereo[..]
        } else {
            chunk
        };

        let tail = self.buf.len() - self.pos;
        let mut converted = rate_convert(
            chunk,
            self.source.sample_rate(),
            &self.buf[self.pos..],
            self.out_rate,
            &mut self.state,
        )?;
        if self.gain != 1.0 {
            scale(&mut converted[tail..], self.gain);
        }

        self.buf = converted;
        self.pos = 0;
        Ok(())
    }

    /// Bytes converted but not yet read
    pub fn available(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Lower the output rate by one step (never below 1 Hz)
    pub fn play_faster(&mut self) {
        self.out_rate = self.out_rate.saturating_sub(SPEED_STEP_HZ).max(1);
    }

    /// Raise the output rate by one step
    pub fn play_slower(&mut self) {
        self.out_rate = self.out_rate.saturating_add(SPEED_STEP_HZ);
    }

    pub fn reset_speed(&mut self) {
        self.out_rate = self.default_rate;
    }

    pub fn output_rate(&self) -> u32 {
        self.out_rate
    }

    /// Drop buffered data and resampler memory, e.g. after seeking the source
    pub fn restart(&mut self) {
        self.buf.clear();
        self.pos = 0;
        self.state.reset();
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    pub fn into_inner(self) -> S {
        self.source
    }
}
