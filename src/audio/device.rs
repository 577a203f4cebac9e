//! Lazy open / retry / close state machine around a [`Sink`]
//!
//! The device is opened only when the output loop has audible data to
//! write. Failed opens are retried forever with a fixed backoff; the first
//! failure of a streak goes to the [`ErrorReporter`], the rest only to the
//! debug log. `close` may come from any thread: it bumps a generation
//! counter, which makes a pending write (and its retry loop) give up.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use super::sink::{SampleFormat, Sink, SinkDevice, SinkError, SinkOption};

/// Receives user-facing error messages
pub trait ErrorReporter: Send + Sync {
    fn error(&self, message: &str);
}

/// Forwards reports to `log::error!`
#[derive(Debug, Default, Clone, Copy)]
pub struct LogReporter;

impl ErrorReporter for LogReporter {
    fn error(&self, message: &str) {
        log::error!("{}", message);
    }
}

/// Observable state of the output device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    Closed,
    /// Open attempts failed `attempts` times in a row and are being retried
    Opening { attempts: u32 },
    Open,
}

/// Result of [`DeviceLifecycle::write`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Written,
    /// A `close` arrived before the bytes reached the device
    Cancelled,
    /// The open device rejected the bytes; it has been closed
    Failed,
}

enum Connection {
    Closed,
    Opening { attempts: u32 },
    Open(Box<dyn SinkDevice>),
}

struct Inner {
    sink: Box<dyn Sink>,
    connection: Connection,
    /// Error of the current failure streak, `None` outside a streak
    last_error: Option<SinkError>,
    generation: u64,
}

impl Inner {
    fn shut(&mut self) -> bool {
        match std::mem::replace(&mut self.connection, Connection::Closed) {
            Connection::Open(device) => {
                device.close();
                true
            }
            _ => false,
        }
    }
}

pub struct DeviceLifecycle {
    inner: Mutex<Inner>,
    format: SampleFormat,
    options: Vec<SinkOption>,
    backoff: Duration,
    reporter: Arc<dyn ErrorReporter>,
}

impl DeviceLifecycle {
    pub fn new(
        sink: Box<dyn Sink>,
        format: SampleFormat,
        options: Vec<SinkOption>,
        backoff: Duration,
        reporter: Arc<dyn ErrorReporter>,
    ) -> Self {
        Self {
            inner: Mutex::new(Inner {
                sink,
                connection: Connection::Closed,
                last_error: None,
                generation: 0,
            }),
            format,
            options,
            backoff,
            reporter,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Token to pass to [`write`](Self::write); invalidated by every `close`
    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    pub fn state(&self) -> DeviceState {
        match self.lock().connection {
            Connection::Closed => DeviceState::Closed,
            Connection::Opening { attempts } => DeviceState::Opening { attempts },
            Connection::Open(_) => DeviceState::Open,
        }
    }

    pub fn last_error(&self) -> Option<SinkError> {
        self.lock().last_error.clone()
    }

    /// Close the device if it is open and cancel any pending open retries.
    ///
    /// Idempotent. The next write reopens the device.
    pub fn close(&self) {
        let mut inner = self.lock();
        inner.generation = inner.generation.wrapping_add(1);
        inner.last_error = None;
        if inner.shut() {
            log::debug!("Audio device closed");
        }
    }

    /// Write `bytes`, opening the device first if needed.
    ///
    /// Blocks through open retries until the device accepts the data or a
    /// `close` invalidates `generation`.
    pub fn write(&self, bytes: &[u8], generation: u64) -> WriteOutcome {
        loop {
            let mut inner = self.lock();
            if inner.generation != generation {
                return WriteOutcome::Cancelled;
            }

            if !matches!(inner.connection, Connection::Open(_)) {
                if let Err(e) = self.open_locked(&mut inner) {
                    drop(inner);
                    log::debug!("Retrying audio device open in {:?} ({})", self.backoff, e);
                    thread::sleep(self.backoff);
                    continue;
                }
            }

            let Connection::Open(device) = &mut inner.connection else {
                continue;
            };
            return match device.write(bytes) {
                Ok(()) => WriteOutcome::Written,
                Err(e) => {
                    log::warn!("Audio device write failed, closing it: {}", e);
                    inner.shut();
                    WriteOutcome::Failed
                }
            };
        }
    }

    fn open_locked(&self, inner: &mut Inner) -> Result<(), SinkError> {
        match inner.sink.open(&self.format, &self.options) {
            Ok(device) => {
                log::info!("Audio device opened ({})", inner.sink.name());
                inner.connection = Connection::Open(device);
                inner.last_error = None;
                Ok(())
            }
            Err(e) => {
                let attempts = match inner.connection {
                    Connection::Opening { attempts } => attempts.saturating_add(1),
                    _ => 1,
                };
                inner.connection = Connection::Opening { attempts };
                if inner.last_error.is_none() {
                    self.reporter
                        .error(&format!("cannot open audio device: error \"{}\"", e));
                }
                inner.last_error = Some(e.clone());
                Err(e)
            }
        }
    }
}

impl Drop for DeviceLifecycle {
    fn drop(&mut self) {
        self.lock().shut();
    }
}
