//! Buffered audio output
//!
//! [`BufferedOutput`] owns the frame ring and the device lifecycle. One
//! thread renders PCM and calls `play`, a dedicated thread sits in `run`
//! and drains the ring into the sink, and any other thread may pause,
//! resume, flush or quit.
//!
//! Pausing closes the device right away so the sink sits idle; frames that
//! were queued stay queued and play after `unpause`. `quit` drops pending
//! audio and wakes the loop wherever it is blocked.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use super::buffer::{FrameProducer, FrameRing};
use super::device::{DeviceLifecycle, DeviceState, ErrorReporter, LogReporter, WriteOutcome};
use super::error::OutputError;
use super::sink::{self, SampleFormat, Sink};
use crate::settings::OutputSettings;

pub struct BufferedOutput {
    ring: FrameRing,
    device: DeviceLifecycle,
    format: SampleFormat,

    /// Pause flag, with its own condition variable for the restart signal
    paused: Mutex<bool>,
    restart: Condvar,

    done: AtomicBool,
    running: AtomicBool,
}

impl BufferedOutput {
    /// Create an output for the sink driver named in `settings`.
    ///
    /// Open failures are reported through `log::error!`.
    pub fn new(settings: &OutputSettings) -> Result<Self, OutputError> {
        let sink = sink::driver(&settings.sink_name).ok_or_else(|| {
            OutputError::Config(format!(
                "unknown sink '{}' (available: {})",
                settings.sink_name,
                sink::driver_names().join(", ")
            ))
        })?;
        Self::with_sink(settings, sink, Arc::new(LogReporter))
    }

    /// Create an output writing to `sink`, reporting open failures to `reporter`
    pub fn with_sink(
        settings: &OutputSettings,
        sink: Box<dyn Sink>,
        reporter: Arc<dyn ErrorReporter>,
    ) -> Result<Self, OutputError> {
        settings.validate()?;
        for option in &settings.sink_options {
            sink.check_option(option).map_err(|e| {
                OutputError::Config(format!("sink '{}': {}", sink.name(), e))
            })?;
        }

        let ring = FrameRing::new(settings.slot_count(), settings.frame_capacity_bytes)?;
        let format = settings.sample_format();
        log::info!(
            "Buffered output: {} slots of {} bytes, sink '{}'",
            settings.slot_count(),
            settings.frame_capacity_bytes,
            sink.name()
        );

        let device = DeviceLifecycle::new(
            sink,
            format,
            settings.sink_options.clone(),
            settings.retry_backoff(),
            reporter,
        );

        Ok(Self {
            ring,
            device,
            format,
            paused: Mutex::new(false),
            restart: Condvar::new(),
            done: AtomicBool::new(false),
            running: AtomicBool::new(false),
        })
    }

    /// Take the dedicated producer handle (the rendering thread should call this once)
    pub fn take_producer(&self) -> Option<FrameProducer> {
        self.ring.take_producer()
    }

    /// Queue a frame, blocking while the buffer is full.
    ///
    /// Fails with `ProducerBusy` if another thread is producing at the same
    /// time or the producer handle was taken.
    pub fn play(&self, data: &[u8], length: usize) -> Result<(), OutputError> {
        self.ring.play_shared(data, length)
    }

    /// Drain the buffer into the sink until [`quit`](Self::quit) is called.
    ///
    /// Blocks; run it on its own thread.
    pub fn run(&self) -> Result<(), OutputError> {
        let mut consumer = self
            .ring
            .take_consumer()
            .ok_or(OutputError::AlreadyRunning)?;
        self.running.store(true, Ordering::Release);
        log::debug!("Output loop started");

        while !self.done.load(Ordering::Acquire) {
            if !self.wait_while_paused() {
                break;
            }

            let Some(frame) = consumer.next_frame() else {
                break;
            };
            if frame.is_silent() {
                frame.commit();
                continue;
            }

            let generation = self.device.generation();
            if self.is_paused() {
                // Leave the frame queued; it plays after unpause
                continue;
            }
            match self.device.write(frame.bytes(), generation) {
                WriteOutcome::Written | WriteOutcome::Failed => frame.commit(),
                WriteOutcome::Cancelled => {}
            }
        }

        self.running.store(false, Ordering::Release);
        self.ring.return_consumer(consumer);
        log::debug!("Output loop stopped");
        Ok(())
    }

    fn lock_paused(&self) -> MutexGuard<'_, bool> {
        self.paused.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Block while paused. Returns false once the output is done.
    fn wait_while_paused(&self) -> bool {
        let mut paused = self.lock_paused();
        while *paused && !self.done.load(Ordering::Acquire) {
            paused = self
                .restart
                .wait(paused)
                .unwrap_or_else(PoisonError::into_inner);
        }
        !self.done.load(Ordering::Acquire)
    }

    /// Close the device until it is needed again
    pub fn close(&self) {
        self.device.close();
    }

    /// Drop all buffered, not yet played audio
    pub fn flush(&self) {
        self.ring.flush();
    }

    /// Stop output and close the device; queued frames are kept
    pub fn pause(&self) {
        *self.lock_paused() = true;
        self.device.close();
        log::debug!("Output paused");
    }

    /// Resume output after [`pause`](Self::pause); no-op if not paused
    pub fn unpause(&self) {
        let mut paused = self.lock_paused();
        if !*paused {
            return;
        }
        *paused = false;
        self.restart.notify_all();
        log::debug!("Output resumed");
    }

    /// Stop the output loop, discarding pending audio
    pub fn quit(&self) {
        self.done.store(true, Ordering::Release);
        // Producers woken by the flush must already see the ring closed
        self.ring.shutdown();
        self.ring.flush();
        self.device.close();

        let mut paused = self.lock_paused();
        *paused = false;
        self.restart.notify_all();
        log::debug!("Output quit");
    }

    /// Seconds of buffered audio that has not been played yet
    pub fn queue_len(&self) -> f64 {
        let frame_bytes = self.format.bytes_per_sample() * usize::from(self.format.channels);
        let frame_secs = self.ring.frame_capacity() as f64
            / frame_bytes as f64
            / f64::from(self.format.rate);
        self.ring.occupied() as f64 * frame_secs
    }

    pub fn is_paused(&self) -> bool {
        *self.lock_paused()
    }

    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    /// Whether a thread is currently inside [`run`](Self::run)
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn device_state(&self) -> DeviceState {
        self.device.state()
    }

    pub fn format(&self) -> SampleFormat {
        self.format
    }

    /// Maximum number of frames the buffer holds
    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::sink::{SinkError, SinkOption};
    use crate::audio::testing::{RecordingReporter, ScriptedSink, SinkLog};
    use std::thread;
    use std::time::{Duration, Instant};

    /// 256-byte frames in a 1 kB buffer: 5 slots, 4 usable
    fn test_settings() -> OutputSettings {
        OutputSettings {
            buffer_size_kb: 1,
            frame_capacity_bytes: 256,
            retry_backoff_ms: 5,
            ..OutputSettings::default()
        }
    }

    fn scripted_output(sink: ScriptedSink) -> (Arc<BufferedOutput>, Arc<RecordingReporter>) {
        let reporter = Arc::new(RecordingReporter::default());
        let output =
            BufferedOutput::with_sink(&test_settings(), Box::new(sink), reporter.clone()).unwrap();
        (Arc::new(output), reporter)
    }

    fn spawn_run(output: &Arc<BufferedOutput>) -> thread::JoinHandle<Result<(), OutputError>> {
        let output = Arc::clone(output);
        thread::spawn(move || output.run())
    }

    fn wait_until(cond: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        cond()
    }

    fn writes(log: &Arc<std::sync::Mutex<SinkLog>>) -> Vec<Vec<u8>> {
        log.lock().unwrap().writes.clone()
    }

    #[test]
    fn test_frames_delivered_in_order() {
        let (sink, log) = ScriptedSink::new();
        let (output, _) = scripted_output(sink);
        let runner = spawn_run(&output);

        output.play(b"AAAAAAAA", 8).unwrap();
        output.play(b"BBBBBBBB", 8).unwrap();
        output.play(b"CCCCCCCC", 8).unwrap();

        assert!(wait_until(|| writes(&log).len() == 3));
        assert_eq!(
            writes(&log),
            vec![b"AAAAAAAA".to_vec(), b"BBBBBBBB".to_vec(), b"CCCCCCCC".to_vec()]
        );
        assert_eq!(output.device_state(), DeviceState::Open);

        output.quit();
        runner.join().unwrap().unwrap();
        assert_eq!(output.device_state(), DeviceState::Closed);
        assert_eq!(log.lock().unwrap().closes, 1);
    }

    #[test]
    fn test_silent_frames_do_not_open_device() {
        let (sink, log) = ScriptedSink::new();
        let (output, _) = scripted_output(sink);
        let runner = spawn_run(&output);

        output.play(&[], 0).unwrap();
        output.play(&[], 0).unwrap();
        assert!(wait_until(|| output.queue_len() == 0.0));
        thread::sleep(Duration::from_millis(20));

        assert_eq!(output.device_state(), DeviceState::Closed);
        assert_eq!(log.lock().unwrap().opens, 0);

        output.quit();
        runner.join().unwrap().unwrap();
    }

    #[test]
    fn test_pause_keeps_buffered_frames() {
        let (sink, log) = ScriptedSink::new();
        let (output, _) = scripted_output(sink);
        let runner = spawn_run(&output);

        output.pause();
        for i in 0..4u8 {
            output.play(&[i; 4], 4).unwrap();
        }
        thread::sleep(Duration::from_millis(50));
        assert!(writes(&log).is_empty());
        assert_eq!(output.device_state(), DeviceState::Closed);

        output.unpause();
        assert!(wait_until(|| writes(&log).len() == 4));
        assert_eq!(
            writes(&log),
            vec![vec![0; 4], vec![1; 4], vec![2; 4], vec![3; 4]]
        );

        output.quit();
        runner.join().unwrap().unwrap();
    }

    #[test]
    fn test_pause_mid_stream_keeps_remaining_frames() {
        let (sink, log) = ScriptedSink::new();
        log.lock().unwrap().write_delay = Duration::from_millis(30);
        let (output, _) = scripted_output(sink);
        let runner = spawn_run(&output);

        for i in 0..4u8 {
            output.play(&[i; 4], 4).unwrap();
        }
        assert!(wait_until(|| writes(&log).len() == 1));
        output.pause();

        let written_at_pause = writes(&log).len();
        thread::sleep(Duration::from_millis(100));
        assert_eq!(writes(&log).len(), written_at_pause);
        assert!(output.queue_len() > 0.0);

        output.unpause();
        assert!(wait_until(|| writes(&log).len() == 4));
        thread::sleep(Duration::from_millis(50));
        assert_eq!(
            writes(&log),
            vec![vec![0; 4], vec![1; 4], vec![2; 4], vec![3; 4]]
        );

        output.quit();
        runner.join().unwrap().unwrap();
    }

    #[test]
    fn test_quit_rejects_producer_blocked_on_full_buffer() {
        let (sink, _) = ScriptedSink::new();
        let (output, _) = scripted_output(sink);

        // No output loop: the fifth frame blocks
        for i in 0..4u8 {
            output.play(&[i], 1).unwrap();
        }
        let mut producer = output.take_producer().unwrap();
        let (tx, rx) = std::sync::mpsc::channel();
        let writer = thread::spawn(move || {
            tx.send(()).unwrap();
            producer.play(&[9], 1)
        });
        rx.recv().unwrap();
        thread::sleep(Duration::from_millis(30));

        output.quit();
        assert!(matches!(writer.join().unwrap(), Err(OutputError::Closed)));
        assert_eq!(output.queue_len(), 0.0);
    }

    #[test]
    fn test_pause_closes_open_device() {
        let (sink, log) = ScriptedSink::new();
        let (output, _) = scripted_output(sink);
        let runner = spawn_run(&output);

        output.play(&[1, 2], 2).unwrap();
        assert!(wait_until(|| output.device_state() == DeviceState::Open));
        output.pause();
        assert!(output.is_paused());
        assert_eq!(output.device_state(), DeviceState::Closed);
        assert_eq!(log.lock().unwrap().closes, 1);

        // Unpausing a running output is a no-op besides waking the loop
        output.unpause();
        output.unpause();
        assert!(!output.is_paused());

        output.quit();
        runner.join().unwrap().unwrap();
    }

    #[test]
    fn test_quit_while_paused_with_pending_frames() {
        let (sink, log) = ScriptedSink::new();
        let (output, _) = scripted_output(sink);
        let runner = spawn_run(&output);

        output.pause();
        output.play(&[1; 8], 8).unwrap();
        output.play(&[2; 8], 8).unwrap();
        assert!(output.queue_len() > 0.0);

        output.quit();
        runner.join().unwrap().unwrap();

        assert!(output.is_done());
        assert!(!output.is_paused());
        assert_eq!(output.queue_len(), 0.0);
        assert!(writes(&log).is_empty());
        assert_eq!(output.device_state(), DeviceState::Closed);
    }

    #[test]
    fn test_quit_wakes_idle_consumer() {
        let (sink, _) = ScriptedSink::new();
        let (output, _) = scripted_output(sink);
        let runner = spawn_run(&output);
        assert!(wait_until(|| output.is_running()));

        output.quit();
        runner.join().unwrap().unwrap();
        assert!(!output.is_running());
    }

    #[test]
    fn test_quit_during_open_retry() {
        let (sink, _) = ScriptedSink::always_failing(SinkError::OpenFailed("busy".into()));
        let (output, reporter) = scripted_output(sink);
        let runner = spawn_run(&output);

        output.play(&[1; 4], 4).unwrap();
        assert!(wait_until(|| matches!(
            output.device_state(),
            DeviceState::Opening { attempts } if attempts >= 3
        )));
        assert_eq!(reporter.messages().len(), 1);

        let started = Instant::now();
        output.quit();
        runner.join().unwrap().unwrap();
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_open_retried_until_success() {
        let (sink, log) = ScriptedSink::failing(vec![
            SinkError::NoDriver("no driver".into()),
            SinkError::OpenFailed("busy".into()),
        ]);
        let (output, reporter) = scripted_output(sink);
        let runner = spawn_run(&output);

        output.play(&[7; 4], 4).unwrap();
        assert!(wait_until(|| writes(&log).len() == 1));
        assert_eq!(reporter.messages().len(), 1);
        assert!(reporter.messages()[0].contains("no driver"));

        output.quit();
        runner.join().unwrap().unwrap();
    }

    #[test]
    fn test_close_reopens_transparently() {
        let (sink, log) = ScriptedSink::new();
        let (output, _) = scripted_output(sink);
        let runner = spawn_run(&output);

        output.play(&[1], 1).unwrap();
        assert!(wait_until(|| writes(&log).len() == 1));
        output.close();
        assert_eq!(output.device_state(), DeviceState::Closed);

        output.play(&[2], 1).unwrap();
        assert!(wait_until(|| writes(&log).len() == 2));
        assert_eq!(log.lock().unwrap().opens, 2);

        output.quit();
        runner.join().unwrap().unwrap();
    }

    #[test]
    fn test_flush_discards_pending_frames() {
        let (sink, log) = ScriptedSink::new();
        let (output, _) = scripted_output(sink);
        let runner = spawn_run(&output);

        output.pause();
        output.play(&[1], 1).unwrap();
        output.play(&[2], 1).unwrap();
        output.flush();
        assert_eq!(output.queue_len(), 0.0);

        output.unpause();
        output.play(&[3], 1).unwrap();
        assert!(wait_until(|| !writes(&log).is_empty()));
        thread::sleep(Duration::from_millis(20));
        assert_eq!(writes(&log), vec![vec![3]]);

        output.quit();
        runner.join().unwrap().unwrap();
    }

    #[test]
    fn test_queue_len_counts_buffered_seconds() {
        let settings = OutputSettings {
            buffer_size_kb: 4,
            frame_capacity_bytes: 1764,
            ..OutputSettings::default()
        };
        let (sink, _) = ScriptedSink::new();
        let output = BufferedOutput::with_sink(
            &settings,
            Box::new(sink),
            Arc::new(RecordingReporter::default()),
        )
        .unwrap();
        assert_eq!(output.capacity(), 2);

        output.play(&[0; 1764], 1764).unwrap();
        output.play(&[0; 100], 100).unwrap();
        // 1764 bytes = 441 stereo samples = 10 ms per slot
        assert!((output.queue_len() - 0.02).abs() < 1e-9);
    }

    #[test]
    fn test_capacity_error_from_play() {
        let (sink, _) = ScriptedSink::new();
        let (output, _) = scripted_output(sink);
        assert!(matches!(
            output.play(&[0; 257], 257),
            Err(OutputError::Capacity { length: 257, capacity: 256 })
        ));
    }

    #[test]
    fn test_second_run_rejected() {
        let (sink, _) = ScriptedSink::new();
        let (output, _) = scripted_output(sink);
        let runner = spawn_run(&output);
        assert!(wait_until(|| output.is_running()));

        assert!(matches!(output.run(), Err(OutputError::AlreadyRunning)));

        output.quit();
        runner.join().unwrap().unwrap();
    }

    #[test]
    fn test_play_after_quit_fails() {
        let (sink, _) = ScriptedSink::new();
        let (output, _) = scripted_output(sink);
        output.quit();
        assert!(matches!(output.play(&[0], 1), Err(OutputError::Closed)));
    }

    #[test]
    fn test_dedicated_producer() {
        let (sink, log) = ScriptedSink::new();
        let (output, _) = scripted_output(sink);
        let runner = spawn_run(&output);

        let mut producer = output.take_producer().unwrap();
        assert!(matches!(output.play(&[0], 1), Err(OutputError::ProducerBusy)));
        let writer = thread::spawn(move || {
            for i in 0..20u8 {
                producer.play(&[i], 1).unwrap();
            }
        });
        writer.join().unwrap();

        assert!(wait_until(|| writes(&log).len() == 20));
        let expected: Vec<Vec<u8>> = (0..20u8).map(|i| vec![i]).collect();
        assert_eq!(writes(&log), expected);

        output.quit();
        runner.join().unwrap().unwrap();
    }

    #[test]
    fn test_unknown_sink_rejected() {
        let settings = OutputSettings {
            sink_name: "oss".to_string(),
            ..test_settings()
        };
        assert!(matches!(
            BufferedOutput::new(&settings),
            Err(OutputError::Config(_))
        ));
    }

    #[test]
    fn test_invalid_option_rejected() {
        let settings = OutputSettings {
            sink_options: vec![SinkOption::new("buffer_time", "20")],
            ..test_settings()
        };
        let (sink, _) = ScriptedSink::new();
        let result = BufferedOutput::with_sink(
            &settings,
            Box::new(sink),
            Arc::new(RecordingReporter::default()),
        );
        assert!(matches!(result, Err(OutputError::Config(_))));
    }

    #[test]
    fn test_null_driver_output() {
        let settings = OutputSettings {
            sink_name: "null".to_string(),
            sink_options: vec![SinkOption::new("realtime", "no")],
            ..test_settings()
        };
        let output = Arc::new(BufferedOutput::new(&settings).unwrap());
        let runner = spawn_run(&output);

        output.play(&[1; 16], 16).unwrap();
        assert!(wait_until(|| output.device_state() == DeviceState::Open));

        output.quit();
        runner.join().unwrap().unwrap();
    }
}
