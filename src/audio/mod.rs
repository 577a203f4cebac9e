//! Audio module - buffered, device-independent PCM output
//!
//! This module provides:
//! - Bounded frame buffer between the PCM producer and the output loop
//! - Sink drivers (null, raw file and, with the `cpal` feature, the system device)
//! - Lazy device open with retry and once-per-streak error reporting
//! - The output loop with pause, flush and quit

mod buffer;
#[cfg(feature = "cpal")]
mod cpal_sink;
mod device;
mod error;
mod frame;
mod output;
mod sink;

#[cfg(test)]
pub(crate) mod testing;

pub use buffer::{FrameConsumer, FrameLease, FrameProducer, FrameRing};
#[cfg(feature = "cpal")]
pub use cpal_sink::CpalSink;
pub use device::{DeviceLifecycle, DeviceState, ErrorReporter, LogReporter, WriteOutcome};
pub use error::OutputError;
pub use frame::Frame;
pub use output::BufferedOutput;
pub use sink::{
    driver, driver_names, option_value, ByteOrder, NullSink, RawSink, SampleFormat, Sink,
    SinkDevice, SinkError, SinkOption,
};
