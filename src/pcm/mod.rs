//! PCM processing - crossfade, rate conversion and gain
//!
//! Everything here works on interleaved 16-bit PCM in native byte order,
//! stereo unless noted otherwise. One stereo sample pair is 4 bytes.

mod gain;
mod mix;
mod resample;
mod stream;

pub use gain::{replaygain_factor, scale, upsample, volume_factor};
pub use mix::{mix, Crossfade};
pub use resample::{rate_convert, ResamplerState};
pub use stream::{PcmSource, ResampledStream};

use thiserror::Error;

/// Bytes per interleaved stereo sample pair
pub const PAIR_BYTES: usize = 4;

/// Errors from PCM processing
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PcmError {
    #[error("Invalid sample rate: {0} Hz")]
    InvalidRate(u32),

    /// Emitted more sample pairs than the output buffer was sized for
    #[error("Resampler output overrun: {emitted} sample pairs (capacity: {capacity})")]
    OutputOverrun { emitted: usize, capacity: usize },

    #[error("Unsupported channel count: {0}")]
    UnsupportedChannels(u16),

    #[error("Resource error: {0}")]
    Resource(String),
}

#[inline]
pub(crate) fn sample_at(bytes: &[u8], index: usize) -> i16 {
    i16::from_ne_bytes([bytes[2 * index], bytes[2 * index + 1]])
}

pub(crate) fn samples(bytes: &[u8]) -> impl Iterator<Item = i16> + '_ {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_ne_bytes([pair[0], pair[1]]))
}

#[cfg(test)]
pub(crate) fn to_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_ne_bytes()).collect()
}
