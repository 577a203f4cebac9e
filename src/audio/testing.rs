//! Scripted sink and reporter used by the output tests

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::device::ErrorReporter;
use super::sink::{SampleFormat, Sink, SinkDevice, SinkError, SinkOption};

#[derive(Debug, Default)]
pub struct SinkLog {
    pub opens: usize,
    pub closes: usize,
    pub writes: Vec<Vec<u8>>,
    /// Errors returned by the next open attempts, front first
    pub failures: VecDeque<SinkError>,
    /// Returned by every open attempt once `failures` is drained
    pub always_fail: Option<SinkError>,
    pub fail_writes: bool,
    pub write_delay: Duration,
}

pub struct ScriptedSink {
    log: Arc<Mutex<SinkLog>>,
}

impl ScriptedSink {
    pub fn new() -> (Self, Arc<Mutex<SinkLog>>) {
        let log = Arc::new(Mutex::new(SinkLog::default()));
        (
            Self {
                log: Arc::clone(&log),
            },
            log,
        )
    }

    pub fn failing(errors: Vec<SinkError>) -> (Self, Arc<Mutex<SinkLog>>) {
        let (sink, log) = Self::new();
        log.lock().unwrap().failures = errors.into();
        (sink, log)
    }

    pub fn always_failing(error: SinkError) -> (Self, Arc<Mutex<SinkLog>>) {
        let (sink, log) = Self::new();
        log.lock().unwrap().always_fail = Some(error);
        (sink, log)
    }
}

impl Sink for ScriptedSink {
    fn name(&self) -> &str {
        "scripted"
    }

    fn check_option(&self, option: &SinkOption) -> Result<(), String> {
        match option.key.as_str() {
            "dev" => Ok(()),
            key => Err(format!("unknown option '{}'", key)),
        }
    }

    fn open(
        &mut self,
        _format: &SampleFormat,
        _options: &[SinkOption],
    ) -> Result<Box<dyn SinkDevice>, SinkError> {
        let mut log = self.log.lock().unwrap();
        if let Some(e) = log.failures.pop_front() {
            return Err(e);
        }
        if let Some(e) = log.always_fail.clone() {
            return Err(e);
        }
        log.opens += 1;
        Ok(Box::new(ScriptedDevice {
            log: Arc::clone(&self.log),
        }))
    }
}

struct ScriptedDevice {
    log: Arc<Mutex<SinkLog>>,
}

impl SinkDevice for ScriptedDevice {
    fn write(&mut self, bytes: &[u8]) -> Result<(), SinkError> {
        let delay = self.log.lock().unwrap().write_delay;
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        let mut log = self.log.lock().unwrap();
        if log.fail_writes {
            return Err(SinkError::Unknown("write rejected".into()));
        }
        log.writes.push(bytes.to_vec());
        Ok(())
    }

    fn close(self: Box<Self>) {
        self.log.lock().unwrap().closes += 1;
    }
}

#[derive(Debug, Default)]
pub struct RecordingReporter {
    messages: Mutex<Vec<String>>,
}

impl RecordingReporter {
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }
}

impl ErrorReporter for RecordingReporter {
    fn error(&self, message: &str) {
        self.messages.lock().unwrap().push(message.to_string());
    }
}
