//! Streaming sample-rate conversion for 16-bit stereo PCM
//!
//! Least-common-multiple linear interpolation: both rates are scaled to
//! `lcm(in, out)` so input and output positions are exact integers, and
//! each output pair is interpolated between the last consumed input pair
//! and the next one. The last consumed pair is carried in
//! [`ResamplerState`] so consecutive chunks join without a click.

use super::{sample_at, PcmError, PAIR_BYTES};

/// Resampler memory carried between calls to [`rate_convert`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResamplerState {
    /// Last consumed (left, right) pair; `None` before the first chunk
    pub last: Option<(i16, i16)>,
}

impl ResamplerState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget the carried pair, e.g. after a seek
    pub fn reset(&mut self) {
        self.last = None;
    }
}

fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

fn lcm(a: u64, b: u64) -> u64 {
    a / gcd(a, b) * b
}

#[inline]
fn interpolate(last: i16, next: i16, offset: u64, skip: u64) -> i16 {
    let last = f64::from(last);
    (last + (f64::from(next) - last) * offset as f64 / skip as f64) as i16
}

/// Convert `input` from `in_rate` to `out_rate`.
///
/// Returns `prefix` followed by the converted samples. `prefix` is the
/// caller's unread tail from the previous chunk. Equal rates copy the input
/// unchanged. Input shorter than one sample pair yields only the prefix.
pub fn rate_convert(
    input: &[u8],
    in_rate: u32,
    prefix: &[u8],
    out_rate: u32,
    state: &mut ResamplerState,
) -> Result<Vec<u8>, PcmError> {
    if in_rate == 0 {
        return Err(PcmError::InvalidRate(in_rate));
    }
    if out_rate == 0 {
        return Err(PcmError::InvalidRate(out_rate));
    }

    let pairs = input.len() / PAIR_BYTES;
    if in_rate == out_rate || pairs == 0 {
        let copied = if pairs == 0 { 0 } else { input.len() };
        let mut out = allocate(prefix.len() + copied)?;
        out.extend_from_slice(prefix);
        out.extend_from_slice(&input[..copied]);
        if pairs > 0 {
            let last = pairs - 1;
            state.last = Some((sample_at(input, 2 * last), sample_at(input, 2 * last + 1)));
        }
        return Ok(out);
    }

    let (in_rate, out_rate) = (u64::from(in_rate), u64::from(out_rate));
    let lcm_rate = lcm(in_rate, out_rate);
    let in_skip = lcm_rate / in_rate;
    let out_skip = lcm_rate / out_rate;

    let capacity = usize::try_from(pairs as u64 * out_rate / in_rate)
        .map_err(|_| PcmError::Resource("resampler output too large".to_string()))?
        .saturating_add(4);
    let mut out = allocate(prefix.len().saturating_add(capacity.saturating_mul(PAIR_BYTES)))?;
    out.extend_from_slice(prefix);

    let (mut last_l, mut last_r) = state
        .last
        .unwrap_or_else(|| (sample_at(input, 0), sample_at(input, 1)));

    let mut next = 0;
    let mut in_ofs: u64 = 0;
    let mut out_ofs: u64 = 0;
    let mut emitted = 0;

    loop {
        while in_ofs + in_skip <= out_ofs {
            last_l = sample_at(input, 2 * next);
            last_r = sample_at(input, 2 * next + 1);
            next += 1;
            in_ofs += in_skip;

            if next == pairs {
                state.last = Some((last_l, last_r));
                return Ok(out);
            }
        }

        if emitted == capacity {
            return Err(PcmError::OutputOverrun {
                emitted: emitted + 1,
                capacity,
            });
        }

        let offset = out_ofs - in_ofs;
        let left = interpolate(last_l, sample_at(input, 2 * next), offset, in_skip);
        let right = interpolate(last_r, sample_at(input, 2 * next + 1), offset, in_skip);
        out.extend_from_slice(&left.to_ne_bytes());
        out.extend_from_slice(&right.to_ne_bytes());
        emitted += 1;

        out_ofs += out_skip;
        // Keep the counters small on long streams
        if out_ofs == in_ofs {
            out_ofs = 0;
            in_ofs = 0;
        }
    }
}

fn allocate(len: usize) -> Result<Vec<u8>, PcmError> {
    let mut out = Vec::new();
    out.try_reserve_exact(len)
        .map_err(|e| PcmError::Resource(format!("cannot allocate {} bytes: {}", len, e)))?;
    Ok(out)
}
