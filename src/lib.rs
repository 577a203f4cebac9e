//! crossfade-rs - buffered audio output with crossfading
//!
//! The player core: a bounded frame buffer between PCM rendering and a
//! blocking output device, the device open/retry lifecycle, and the PCM
//! operations used to prepare frames (crossfade mixing, sample-rate
//! conversion, mono upmixing and gain).
//!
//! ## Threads
//! - A rendering thread prepares frames with [`pcm`] and queues them with
//!   [`audio::BufferedOutput::play`]
//! - An output thread sits in [`audio::BufferedOutput::run`]
//! - Control calls (`pause`, `unpause`, `flush`, `quit`) come from anywhere else

pub mod audio;
pub mod pcm;
pub mod settings;

pub use audio::{BufferedOutput, OutputError};
pub use settings::OutputSettings;
