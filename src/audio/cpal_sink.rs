//! System audio device sink, built on cpal
//!
//! A cpal stream cannot leave the thread that built it, so each open device
//! gets its own thread that owns the stream until `close`. Samples travel to
//! the stream callback through a ringbuf ring; `write` blocks while that
//! ring is full, which paces the output loop at the device's real-time rate.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use ringbuf::{
    traits::{Consumer, Producer, Split},
    HeapCons, HeapProd, HeapRb,
};

use super::sink::{option_value, SampleFormat, Sink, SinkDevice, SinkError, SinkOption};

/// Sink that plays through the default (or a named) cpal output device.
///
/// Options: `dev=<name>` selects the first output device whose name contains
/// `<name>`.
#[derive(Debug, Default)]
pub struct CpalSink;

impl CpalSink {
    pub const NAME: &'static str = "cpal";
}

impl Sink for CpalSink {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn check_option(&self, option: &SinkOption) -> Result<(), String> {
        match option.key.as_str() {
            "dev" => Ok(()),
            key => Err(format!("unknown option '{}'", key)),
        }
    }

    fn open(
        &mut self,
        format: &SampleFormat,
        options: &[SinkOption],
    ) -> Result<Box<dyn SinkDevice>, SinkError> {
        if format.bits != 16 {
            return Err(SinkError::BadOption(format!(
                "{}-bit output is not supported",
                format.bits
            )));
        }

        // About 250 ms of audio between the output loop and the callback
        let capacity = (format.rate as usize / 4).max(1024) * usize::from(format.channels);
        let rb = HeapRb::<i16>::new(capacity);
        let (producer, consumer) = rb.split();

        let failed = Arc::new(AtomicBool::new(false));
        let (ready_tx, ready_rx) = mpsc::channel();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let config = cpal::StreamConfig {
            channels: format.channels,
            sample_rate: cpal::SampleRate(format.rate),
            buffer_size: cpal::BufferSize::Default,
        };
        let wanted = option_value(options, "dev").map(str::to_string);
        let stream_failed = Arc::clone(&failed);

        let thread = thread::Builder::new()
            .name("cpal-output".to_string())
            .spawn(move || {
                let stream = match build_stream(wanted.as_deref(), &config, consumer, stream_failed)
                {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));
                // Keep the stream alive until the device is closed
                let _ = stop_rx.recv();
                drop(stream);
            })
            .map_err(|e| SinkError::Unknown(format!("cannot spawn output thread: {}", e)))?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Box::new(CpalDevice {
                producer,
                failed,
                stop: stop_tx,
                thread: Some(thread),
            })),
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                Err(SinkError::Unknown("output thread exited".to_string()))
            }
        }
    }
}

fn build_stream(
    wanted: Option<&str>,
    config: &cpal::StreamConfig,
    mut consumer: HeapCons<i16>,
    failed: Arc<AtomicBool>,
) -> Result<cpal::Stream, SinkError> {
    let host = cpal::default_host();
    let device = match wanted {
        Some(name) => host
            .output_devices()
            .map_err(|e| SinkError::NoDriver(e.to_string()))?
            .find(|d| d.name().map(|n| n.contains(name)).unwrap_or(false))
            .ok_or_else(|| SinkError::OpenFailed(format!("no output device matching '{}'", name)))?,
        None => host
            .default_output_device()
            .ok_or_else(|| SinkError::NoDriver("no default output device".to_string()))?,
    };

    let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());
    log::info!("Using output device: {}", device_name);

    let stream = device
        .build_output_stream(
            config,
            move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                for sample in data.iter_mut() {
                    *sample = consumer.try_pop().unwrap_or(0);
                }
            },
            move |err| {
                log::error!("Audio output error: {}", err);
                failed.store(true, Ordering::Relaxed);
            },
            None,
        )
        .map_err(|e| SinkError::OpenFailed(e.to_string()))?;

    stream
        .play()
        .map_err(|e| SinkError::OpenFailed(e.to_string()))?;
    Ok(stream)
}

struct CpalDevice {
    producer: HeapProd<i16>,
    failed: Arc<AtomicBool>,
    stop: mpsc::Sender<()>,
    thread: Option<JoinHandle<()>>,
}

impl SinkDevice for CpalDevice {
    fn write(&mut self, bytes: &[u8]) -> Result<(), SinkError> {
        let samples: Vec<i16> = bytes
            .chunks_exact(2)
            .map(|pair| i16::from_ne_bytes([pair[0], pair[1]]))
            .collect();

        let mut pending = samples.as_slice();
        while !pending.is_empty() {
            if self.failed.load(Ordering::Relaxed) {
                return Err(SinkError::Unknown("output stream failed".to_string()));
            }
            let pushed = self.producer.push_slice(pending);
            pending = &pending[pushed..];
            if !pending.is_empty() {
                // Ring full: let the callback drain at real-time rate
                thread::sleep(Duration::from_millis(5));
            }
        }
        Ok(())
    }

    fn close(mut self: Box<Self>) {
        let _ = self.stop.send(());
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}
