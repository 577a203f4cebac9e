//! crossfade-rs demo player
//!
//! Plays two generated tones through the configured sink, crossfading from
//! the first into the second.
//!
//! Usage: `crossfade-rs [SINK] [OPTIONS]`, e.g. `crossfade-rs raw file=out.raw`.
//! Without arguments the sink from the settings file is used.

use std::f32::consts::TAU;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossfade_rs::audio::{BufferedOutput, SinkOption};
use crossfade_rs::pcm::{self, Crossfade, PcmSource, ResampledStream};
use crossfade_rs::OutputSettings;

/// Seconds of audio per generated chunk
const CHUNK_SECS: f32 = 0.05;

/// Sine tone standing in for a decoded song
struct Tone {
    frequency: f32,
    rate: u32,
    channels: u16,
    remaining: usize,
    phase: f32,
}

impl Tone {
    fn new(frequency: f32, rate: u32, channels: u16, secs: f32) -> Self {
        Self {
            frequency,
            rate,
            channels,
            remaining: (rate as f32 * secs) as usize,
            phase: 0.0,
        }
    }
}

impl PcmSource for Tone {
    fn next_chunk(&mut self) -> Option<Vec<u8>> {
        if self.remaining == 0 {
            return None;
        }
        let frames = ((self.rate as f32 * CHUNK_SECS) as usize).clamp(1, self.remaining);
        self.remaining -= frames;

        let step = TAU * self.frequency / self.rate as f32;
        let mut out = Vec::with_capacity(frames * 2 * usize::from(self.channels));
        for _ in 0..frames {
            let sample = (self.phase.sin() * 12000.0) as i16;
            for _ in 0..self.channels {
                out.extend_from_slice(&sample.to_ne_bytes());
            }
            self.phase = (self.phase + step) % TAU;
        }
        Some(out)
    }

    fn sample_rate(&self) -> u32 {
        self.rate
    }

    fn channels(&self) -> u16 {
        self.channels
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    log::info!("Starting crossfade-rs");

    let mut settings = OutputSettings::load();
    let mut args = std::env::args().skip(1);
    if let Some(sink) = args.next() {
        settings.sink_name = sink;
    }
    if let Some(options) = args.next() {
        settings.sink_options = SinkOption::parse_list(&options)?;
    }
    if settings.bit_depth != 16 || settings.channels != 2 {
        return Err("the demo renders 16-bit stereo only".into());
    }

    let output = Arc::new(BufferedOutput::new(&settings)?);
    let runner = {
        let output = Arc::clone(&output);
        thread::Builder::new()
            .name("output".to_string())
            .spawn(move || output.run())?
    };

    let rate = settings.sample_rate;
    let frame_size = settings.frame_capacity_bytes - settings.frame_capacity_bytes % 4;
    let volume = pcm::volume_factor(0.8);

    let song_secs = 2.0 * settings.crossfade_start_secs.max(1.0);
    let mut first = ResampledStream::new(Tone::new(440.0, 44100, 2, song_secs), rate)?
        .with_gain(volume);
    let mut second = ResampledStream::new(Tone::new(660.0, 22050, 1, song_secs), rate)?
        .with_gain(volume);

    let fade_after = if settings.crossfade {
        (song_secs - settings.crossfade_start_secs).max(0.0)
    } else {
        song_secs
    };
    let fade_after_bytes = (fade_after * rate as f32) as usize * 4;
    let mut fade = Crossfade::new(settings.crossfade_duration_secs, rate);

    let mut played = 0;
    loop {
        let frame = first.read(frame_size)?;
        if frame.is_empty() {
            break;
        }
        played += frame.len();
        if played <= fade_after_bytes {
            output.play(&frame, frame.len())?;
            continue;
        }
        let incoming = second.read(frame.len())?;
        let mixed = fade.mix(&frame, &incoming);
        output.play(&mixed, mixed.len())?;
    }
    log::info!("First song done (fade ratio {:.2})", fade.ratio());

    loop {
        let frame = second.read(frame_size)?;
        if frame.is_empty() {
            break;
        }
        output.play(&frame, frame.len())?;
    }

    while output.queue_len() > 0.0 {
        thread::sleep(Duration::from_millis(50));
    }
    output.quit();
    match runner.join() {
        Ok(result) => result?,
        Err(_) => log::error!("Output thread panicked"),
    }
    log::info!("Done");
    Ok(())
}
