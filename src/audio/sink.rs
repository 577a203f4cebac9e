//! Audio sink boundary
//!
//! A [`Sink`] is the opaque output capability the output loop writes to:
//! it opens a [`SinkDevice`] for a sample format, the device accepts raw
//! PCM bytes and is closed when the loop no longer needs it. Drivers are
//! looked up by name through [`driver`].

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a sink could not be opened
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SinkError {
    #[error("No matching driver: {0}")]
    NoDriver(String),

    #[error("Driver is not a live output device: {0}")]
    NotLive(String),

    #[error("Invalid option value: {0}")]
    BadOption(String),

    #[error("Cannot open device: {0}")]
    OpenFailed(String),

    #[error("Unknown sink error: {0}")]
    Unknown(String),
}

/// Byte order of the samples handed to the sink
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ByteOrder {
    Little,
    Big,
    #[default]
    Native,
}

impl ByteOrder {
    /// Whether samples in this order differ from the machine's own layout
    pub fn is_foreign(self) -> bool {
        match self {
            ByteOrder::Native => false,
            ByteOrder::Little => cfg!(target_endian = "big"),
            ByteOrder::Big => cfg!(target_endian = "little"),
        }
    }
}

/// PCM layout the sink is opened with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleFormat {
    pub bits: u16,
    pub rate: u32,
    pub channels: u16,
    pub byte_order: ByteOrder,
}

impl SampleFormat {
    pub fn bytes_per_sample(&self) -> usize {
        usize::from(self.bits).div_ceil(8)
    }

    /// Playing time of `bytes` bytes of PCM in this format
    pub fn duration_of(&self, bytes: usize) -> Duration {
        let frame_bytes = self.bytes_per_sample() * usize::from(self.channels);
        if frame_bytes == 0 || self.rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(bytes as f64 / frame_bytes as f64 / f64::from(self.rate))
    }
}

impl Default for SampleFormat {
    fn default() -> Self {
        Self {
            bits: 16,
            rate: 44100,
            channels: 2,
            byte_order: ByteOrder::Native,
        }
    }
}

/// One `key=value` driver option
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SinkOption {
    pub key: String,
    pub value: String,
}

impl SinkOption {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Parse a whitespace separated list like `"file=out.raw realtime=yes"`.
    ///
    /// Every item must contain exactly one `=`.
    pub fn parse_list(text: &str) -> Result<Vec<Self>, String> {
        text.split_whitespace()
            .map(|item| match item.split_once('=') {
                Some((key, value)) if !key.is_empty() && !value.contains('=') => {
                    Ok(Self::new(key, value))
                }
                _ => Err(format!("invalid format for sink option '{}'", item)),
            })
            .collect()
    }
}

/// Value of option `key`, last occurrence wins
pub fn option_value<'a>(options: &'a [SinkOption], key: &str) -> Option<&'a str> {
    options
        .iter()
        .rev()
        .find(|o| o.key == key)
        .map(|o| o.value.as_str())
}

/// An open output device
pub trait SinkDevice: Send {
    /// Write PCM bytes, blocking until the device accepted them
    fn write(&mut self, bytes: &[u8]) -> Result<(), SinkError>;

    /// Release the device
    fn close(self: Box<Self>);
}

/// An output driver able to open devices
pub trait Sink: Send {
    fn name(&self) -> &str;

    /// Validate one option once, before any device is opened.
    ///
    /// Returns a description of the problem for unknown keys or values the
    /// driver can never accept.
    fn check_option(&self, option: &SinkOption) -> Result<(), String>;

    fn open(
        &mut self,
        format: &SampleFormat,
        options: &[SinkOption],
    ) -> Result<Box<dyn SinkDevice>, SinkError>;
}

/// Names accepted by [`driver`]
pub fn driver_names() -> Vec<&'static str> {
    let mut names = vec![NullSink::NAME, RawSink::NAME];
    #[cfg(feature = "cpal")]
    names.push(super::cpal_sink::CpalSink::NAME);
    names
}

/// Look up a driver by name
pub fn driver(name: &str) -> Option<Box<dyn Sink>> {
    match name {
        NullSink::NAME => Some(Box::new(NullSink)),
        RawSink::NAME => Some(Box::new(RawSink)),
        #[cfg(feature = "cpal")]
        super::cpal_sink::CpalSink::NAME => Some(Box::new(super::cpal_sink::CpalSink)),
        _ => None,
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value {
        "yes" | "true" | "1" => Some(true),
        "no" | "false" | "0" => Some(false),
        _ => None,
    }
}

/// Discards everything written to it.
///
/// With `realtime=yes` each write sleeps for the playing time of the
/// written bytes, so the output loop is paced like a hardware device.
pub struct NullSink;

impl NullSink {
    pub const NAME: &'static str = "null";
}

impl Sink for NullSink {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn check_option(&self, option: &SinkOption) -> Result<(), String> {
        match option.key.as_str() {
            "realtime" => parse_flag(&option.value)
                .map(|_| ())
                .ok_or_else(|| format!("realtime expects yes/no, got '{}'", option.value)),
            key => Err(format!("unknown option '{}' for null sink", key)),
        }
    }

    fn open(
        &mut self,
        format: &SampleFormat,
        options: &[SinkOption],
    ) -> Result<Box<dyn SinkDevice>, SinkError> {
        let realtime = match option_value(options, "realtime") {
            Some(value) => parse_flag(value)
                .ok_or_else(|| SinkError::BadOption(format!("realtime={}", value)))?,
            None => false,
        };
        log::debug!("Null sink opened (realtime: {})", realtime);
        Ok(Box::new(NullDevice {
            format: *format,
            realtime,
        }))
    }
}

struct NullDevice {
    format: SampleFormat,
    realtime: bool,
}

impl SinkDevice for NullDevice {
    fn write(&mut self, bytes: &[u8]) -> Result<(), SinkError> {
        if self.realtime {
            thread::sleep(self.format.duration_of(bytes.len()));
        }
        Ok(())
    }

    fn close(self: Box<Self>) {
        log::debug!("Null sink closed");
    }
}

/// Streams headerless PCM into a file (`file=<path>`, default `output.raw`).
///
/// 16-bit samples are byte-swapped when the configured byte order is not
/// the machine's own.
pub struct RawSink;

impl RawSink {
    pub const NAME: &'static str = "raw";
    const DEFAULT_FILE: &'static str = "output.raw";
}

impl Sink for RawSink {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn check_option(&self, option: &SinkOption) -> Result<(), String> {
        match option.key.as_str() {
            "file" if option.value.is_empty() => Err("file must not be empty".to_string()),
            "file" => Ok(()),
            key => Err(format!("unknown option '{}' for raw sink", key)),
        }
    }

    fn open(
        &mut self,
        format: &SampleFormat,
        options: &[SinkOption],
    ) -> Result<Box<dyn SinkDevice>, SinkError> {
        let path = PathBuf::from(option_value(options, "file").unwrap_or(Self::DEFAULT_FILE));
        let file = File::options()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| SinkError::OpenFailed(format!("{}: {}", path.display(), e)))?;
        log::debug!("Raw sink writing to {}", path.display());
        Ok(Box::new(RawDevice {
            writer: BufWriter::new(file),
            swap: format.bits == 16 && format.byte_order.is_foreign(),
            scratch: Vec::new(),
        }))
    }
}

struct RawDevice {
    writer: BufWriter<File>,
    swap: bool,
    scratch: Vec<u8>,
}

impl SinkDevice for RawDevice {
    fn write(&mut self, bytes: &[u8]) -> Result<(), SinkError> {
        let out = if self.swap {
            self.scratch.clear();
            self.scratch.extend_from_slice(bytes);
            for pair in self.scratch.chunks_exact_mut(2) {
                pair.swap(0, 1);
            }
            &self.scratch[..]
        } else {
            bytes
        };
        self.writer
            .write_all(out)
            .map_err(|e| SinkError::Unknown(e.to_string()))
    }

    fn close(mut self: Box<Self>) {
        if let Err(e) = self.writer.flush() {
            log::warn!("Failed to flush raw sink: {}", e);
        }
    }
}
