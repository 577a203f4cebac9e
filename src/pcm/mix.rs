//! Linear crossfade between two PCM streams
//!
//! The mixing ratio ramps by `rate` per stereo pair. A crossfade spanning
//! many buffers is driven by feeding each call the ratio returned by the
//! previous one; [`Crossfade`] does that bookkeeping.

use super::samples;

/// Blend `b1` into `b2`, starting at `ratio` and ramping by `rate` per pair.
///
/// The shorter buffer is padded with silence. Each 16-bit sample becomes
/// `s1 * (1 - f) + s2 * f`; `f` then advances by `rate / 2` and is clamped
/// at 1 for a rising ramp or 0 for a falling one. Returns the mixed bytes
/// and the ratio to pass to the next call.
pub fn mix(b1: &[u8], b2: &[u8], ratio: f32, rate: f32) -> (Vec<u8>, f32) {
    let len = b1.len().max(b2.len());
    let mut out = Vec::with_capacity(len);

    let mut f = if ratio.is_nan() { 0.0 } else { ratio.clamp(0.0, 1.0) };
    let df = rate / 2.0;

    let silence = std::iter::repeat(0i16);
    let pairs = samples(b1)
        .chain(silence.clone())
        .zip(samples(b2).chain(silence))
        .take(len / 2);
    for (s1, s2) in pairs {
        let mixed = f32::from(s1) * (1.0 - f) + f32::from(s2) * f;
        out.extend_from_slice(&(mixed as i16).to_ne_bytes());

        f += df;
        if df >= 0.0 {
            f = f.min(1.0);
        } else {
            f = f.max(0.0);
        }
    }
    // Odd trailing byte
    out.resize(len, 0);

    (out, f)
}

/// Ramp state for one song-to-song transition
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Crossfade {
    ratio: f32,
    rate: f32,
}

impl Crossfade {
    /// A fade from the old stream to the new one over `duration_secs`
    pub fn new(duration_secs: f32, sample_rate: u32) -> Self {
        let rate = if duration_secs > 0.0 && sample_rate > 0 {
            1.0 / sample_rate as f32 / duration_secs
        } else {
            // Degenerate fade: cut straight over
            1.0
        };
        Self { ratio: 0.0, rate }
    }

    /// Mix the next chunk of the outgoing stream `from` with the incoming `to`
    pub fn mix(&mut self, from: &[u8], to: &[u8]) -> Vec<u8> {
        let (out, ratio) = mix(from, to, self.ratio, self.rate);
        self.ratio = ratio;
        out
    }

    pub fn ratio(&self) -> f32 {
        self.ratio
    }

    pub fn rate(&self) -> f32 {
        self.rate
    }

    /// True once the incoming stream plays at full level
    pub fn is_complete(&self) -> bool {
        self.ratio >= 1.0
    }

    pub fn reset(&mut self) {
        self.ratio = 0.0;
    }
}
