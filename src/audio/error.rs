//! Error types for the buffered output

use thiserror::Error;

/// Errors surfaced by [`BufferedOutput`](super::BufferedOutput) and its buffer
#[derive(Error, Debug)]
pub enum OutputError {
    /// Unknown sink name, invalid options or unusable buffer geometry
    #[error("Configuration error: {0}")]
    Config(String),

    /// A frame larger than the configured frame capacity
    #[error("Frame too long: {length} bytes (capacity: {capacity})")]
    Capacity { length: usize, capacity: usize },

    /// Allocation of buffer memory failed
    #[error("Resource error: {0}")]
    Resource(String),

    /// The output was shut down by `quit`
    #[error("Output closed")]
    Closed,

    /// Another thread is currently producing frames
    #[error("Another producer is active")]
    ProducerBusy,

    /// The output loop is already running on another thread
    #[error("Output loop already running")]
    AlreadyRunning,
}
