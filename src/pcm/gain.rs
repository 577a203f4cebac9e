//! Channel upmixing and gain

use super::samples;

/// Duplicate each mono 16-bit sample into a stereo pair.
///
/// A trailing odd byte is not a whole sample and is dropped.
pub fn upsample(mono: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(2 * mono.len());
    for sample in samples(mono) {
        let bytes = sample.to_ne_bytes();
        out.extend_from_slice(&bytes);
        out.extend_from_slice(&bytes);
    }
    out
}

/// Multiply every 16-bit sample by `factor` in place, clamping to the i16 range
pub fn scale(buf: &mut [u8], factor: f32) {
    for chunk in buf.chunks_exact_mut(2) {
        let sample = i16::from_ne_bytes([chunk[0], chunk[1]]);
        let scaled = (f64::from(sample) * f64::from(factor))
            .clamp(f64::from(i16::MIN), f64::from(i16::MAX)) as i16;
        chunk.copy_from_slice(&scaled.to_ne_bytes());
    }
}

/// Scale factor for a Replay Gain adjustment of `gain_db` with the given peak.
///
/// Lowered to `1 / peak` if the gain would clip, and never above 15.
pub fn replaygain_factor(gain_db: f32, peak: f32) -> f32 {
    let mut factor = 10f32.powf(gain_db / 20.0);
    if peak > 0.0 && factor * peak > 1.0 {
        factor = 1.0 / peak;
    }
    factor.min(15.0)
}

/// Logarithmic volume curve; `volume` in `[0, 1]`
pub fn volume_factor(volume: f32) -> f32 {
    const VOLUME_SCALE: f32 = 0.005;
    VOLUME_SCALE.powf(1.0 - volume.clamp(0.0, 1.0))
}
