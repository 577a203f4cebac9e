//! Bounded frame buffer between the PCM producer and the output loop
//!
//! The buffer is a fixed ring of preallocated [`Frame`] slots guarded by one
//! mutex over the cursors and two condition variables (`not_empty`,
//! `not_full`). Producer and consumer block on those instead of dropping
//! data: a full ring stalls the producer, an empty ring parks the consumer.
//!
//! ## Single producer, single consumer
//!
//! The cursor lock is released while frame bytes are copied in or out.
//! That is sound only because there is exactly one producer and exactly
//! one consumer, each touching its own cursor and the slot it currently
//! owns. The ring enforces this by handing out one [`FrameProducer`] and
//! one [`FrameConsumer`]; neither is `Clone` and `take_*` returns `None`
//! the second time. Each slot additionally sits behind its own mutex,
//! which is uncontended in steady state.
//!
//! ## Flush epochs
//!
//! `flush` resets both cursors and bumps an epoch counter. A frame that was
//! being copied in or played while the flush happened carries the old
//! epoch and is not published/committed afterwards.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use super::error::OutputError;
use super::frame::Frame;

#[derive(Debug)]
struct Cursors {
    write_pos: usize,
    read_pos: usize,
    epoch: u64,
    closed: bool,
}

impl Cursors {
    fn occupied(&self, slots: usize) -> usize {
        (self.write_pos + slots - self.read_pos) % slots
    }
}

struct Shared {
    slots: Box<[Mutex<Frame>]>,
    frame_capacity: usize,
    cursors: Mutex<Cursors>,
    not_empty: Condvar,
    not_full: Condvar,
}

impl Shared {
    fn lock_cursors(&self) -> MutexGuard<'_, Cursors> {
        self.cursors.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_slot(&self, index: usize) -> MutexGuard<'_, Frame> {
        self.slots[index]
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn slot_count(&self) -> usize {
        self.slots.len()
    }
}

/// Producer half of the ring (owned by the thread that renders PCM)
pub struct FrameProducer {
    shared: Arc<Shared>,
}

impl FrameProducer {
    /// Queue one frame, blocking while the ring is full.
    ///
    /// `data` is copied into the next slot and `length` bytes are declared
    /// meaningful; bytes past `data.len()` up to `length` are silence.
    pub fn play(&mut self, data: &[u8], length: usize) -> Result<(), OutputError> {
        let capacity = self.shared.frame_capacity;
        if length > capacity || data.len() > capacity {
            return Err(OutputError::Capacity {
                length: length.max(data.len()),
                capacity,
            });
        }

        let slots = self.shared.slot_count();
        let (index, epoch) = {
            let mut cursors = self.shared.lock_cursors();
            while !cursors.closed && cursors.occupied(slots) == slots - 1 {
                cursors = self
                    .shared
                    .not_full
                    .wait(cursors)
                    .unwrap_or_else(PoisonError::into_inner);
            }
            if cursors.closed {
                return Err(OutputError::Closed);
            }
            (cursors.write_pos, cursors.epoch)
        };

        // Slot `index` is outside [read_pos, write_pos) so the consumer never reads it here
        self.shared.lock_slot(index).fill(data, length);

        let mut cursors = self.shared.lock_cursors();
        if cursors.closed {
            return Err(OutputError::Closed);
        }
        if cursors.epoch == epoch {
            cursors.write_pos = (index + 1) % slots;
            self.shared.not_empty.notify_one();
        }
        Ok(())
    }
}

/// Consumer half of the ring (owned by the output loop)
pub struct FrameConsumer {
    shared: Arc<Shared>,
}

impl FrameConsumer {
    /// Wait for the oldest queued frame.
    ///
    /// Returns `None` once the ring was shut down. The frame stays queued
    /// until [`FrameLease::commit`] is called; dropping the lease leaves it
    /// at the head of the queue.
    pub fn next_frame(&mut self) -> Option<FrameLease<'_>> {
        let shared: &Shared = &self.shared;
        let slots = shared.slot_count();
        loop {
            let (index, epoch) = {
                let mut cursors = shared.lock_cursors();
                while !cursors.closed && cursors.occupied(slots) == 0 {
                    cursors = shared
                        .not_empty
                        .wait(cursors)
                        .unwrap_or_else(PoisonError::into_inner);
                }
                if cursors.closed {
                    return None;
                }
                (cursors.read_pos, cursors.epoch)
            };

            let frame = shared.lock_slot(index);
            // A flush between picking the slot and locking it may have let the
            // producer refill it with newer audio
            if shared.lock_cursors().epoch != epoch {
                continue;
            }
            return Some(FrameLease {
                shared,
                frame,
                index,
                epoch,
            });
        }
    }
}

/// Exclusive access to the frame at the head of the ring
pub struct FrameLease<'a> {
    shared: &'a Shared,
    frame: MutexGuard<'a, Frame>,
    index: usize,
    epoch: u64,
}

impl FrameLease<'_> {
    pub fn bytes(&self) -> &[u8] {
        self.frame.bytes()
    }

    pub fn is_silent(&self) -> bool {
        self.frame.is_empty()
    }

    /// Mark the frame as played: advance the read cursor and wake the producer
    pub fn commit(self) {
        let slots = self.shared.slot_count();
        let mut cursors = self.shared.lock_cursors();
        if cursors.epoch == self.epoch {
            cursors.read_pos = (self.index + 1) % slots;
            self.shared.not_full.notify_one();
        }
    }
}

/// Fixed-size ring of PCM frames shared by one producer and one consumer
pub struct FrameRing {
    shared: Arc<Shared>,
    /// Producer handle (taken once by the rendering thread)
    producer: Mutex<Option<FrameProducer>>,
    /// Consumer handle (taken once by the output loop)
    consumer: Mutex<Option<FrameConsumer>>,
}

impl FrameRing {
    /// Allocate `slot_count` frames of `frame_capacity` bytes each.
    ///
    /// One slot is always kept free, so the ring holds at most
    /// `slot_count - 1` frames.
    pub fn new(slot_count: usize, frame_capacity: usize) -> Result<Self, OutputError> {
        if slot_count < 2 {
            return Err(OutputError::Config(format!(
                "ring needs at least 2 slots, got {}",
                slot_count
            )));
        }

        let mut slots = Vec::new();
        slots
            .try_reserve_exact(slot_count)
            .map_err(|e| OutputError::Resource(e.to_string()))?;
        for _ in 0..slot_count {
            let frame = Frame::try_with_capacity(frame_capacity)
                .map_err(|e| OutputError::Resource(e.to_string()))?;
            slots.push(Mutex::new(frame));
        }

        let shared = Arc::new(Shared {
            slots: slots.into_boxed_slice(),
            frame_capacity,
            cursors: Mutex::new(Cursors {
                write_pos: 0,
                read_pos: 0,
                epoch: 0,
                closed: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        });

        let producer = FrameProducer {
            shared: Arc::clone(&shared),
        };
        let consumer = FrameConsumer {
            shared: Arc::clone(&shared),
        };

        Ok(Self {
            shared,
            producer: Mutex::new(Some(producer)),
            consumer: Mutex::new(Some(consumer)),
        })
    }

    /// Take the producer handle (the rendering thread should call this once)
    pub fn take_producer(&self) -> Option<FrameProducer> {
        self.producer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Take the consumer handle (the output loop should call this once)
    pub fn take_consumer(&self) -> Option<FrameConsumer> {
        self.consumer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Hand a consumer back after the output loop stopped
    pub(crate) fn return_consumer(&self, consumer: FrameConsumer) {
        *self.consumer.lock().unwrap_or_else(PoisonError::into_inner) = Some(consumer);
    }

    /// Play through the internal producer, rejecting concurrent producers.
    ///
    /// Note: a dedicated thread should prefer `take_producer()`.
    pub(crate) fn play_shared(&self, data: &[u8], length: usize) -> Result<(), OutputError> {
        let mut guard = self.producer.try_lock().map_err(|_| OutputError::ProducerBusy)?;
        match guard.as_mut() {
            Some(producer) => producer.play(data, length),
            None => Err(OutputError::ProducerBusy),
        }
    }

    /// Discard every queued frame
    pub fn flush(&self) {
        let mut cursors = self.shared.lock_cursors();
        cursors.write_pos = 0;
        cursors.read_pos = 0;
        cursors.epoch = cursors.epoch.wrapping_add(1);
        self.shared.not_full.notify_all();
    }

    /// Close the ring for good and wake every blocked producer and consumer
    pub fn shutdown(&self) {
        let mut cursors = self.shared.lock_cursors();
        cursors.closed = true;
        self.shared.not_empty.notify_all();
        self.shared.not_full.notify_all();
    }

    /// Number of frames queued and not yet played
    pub fn occupied(&self) -> usize {
        self.shared.lock_cursors().occupied(self.shared.slot_count())
    }

    /// Maximum number of frames the ring holds at once
    pub fn capacity(&self) -> usize {
        self.shared.slot_count() - 1
    }

    pub fn frame_capacity(&self) -> usize {
        self.shared.frame_capacity
    }
}
