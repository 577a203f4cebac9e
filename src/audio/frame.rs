//! Fixed-capacity PCM frame, the unit moved through the output buffer

use std::collections::TryReserveError;

/// A preallocated byte slot plus the number of bytes that are meaningful.
///
/// Frames are allocated once when the ring is built and then overwritten
/// in place. A frame with `len() == 0` is a silent tick: the output loop
/// consumes it without touching the sink.
#[derive(Debug, Clone)]
pub struct Frame {
    data: Box<[u8]>,
    length: usize,
}

impl Frame {
    /// Create an empty frame able to hold `capacity` bytes, reporting
    /// allocation failure instead of aborting
    pub fn try_with_capacity(capacity: usize) -> Result<Self, TryReserveError> {
        let mut data = Vec::new();
        data.try_reserve_exact(capacity)?;
        data.resize(capacity, 0u8);
        Ok(Self {
            data: data.into_boxed_slice(),
            length: 0,
        })
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// The meaningful bytes of the frame
    pub fn bytes(&self) -> &[u8] {
        &self.data[..self.length]
    }

    /// Overwrite the frame with `data`, declaring `length` meaningful bytes.
    ///
    /// Bytes between `data.len()` and `length` are zeroed (silence). The
    /// caller has already checked both values against the capacity.
    pub(crate) fn fill(&mut self, data: &[u8], length: usize) {
        debug_assert!(data.len() <= self.capacity() && length <= self.capacity());
        self.data[..data.len()].copy_from_slice(data);
        if length > data.len() {
            self.data[data.len()..length].fill(0);
        }
        self.length = length;
    }
}
