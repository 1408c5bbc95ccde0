//! Owned byte window over a sequential transfer.
//!
//! The buffer keeps `[read_offset, buffered)` as unread data and
//! `[0, read_offset)` as already consumed data that can still be sought
//! back into. `file_offset` is the absolute stream position of byte 0.
//! Eviction drops the consumed prefix for good, growth doubles the
//! capacity. Both are separate steps so that callers can decide when
//! each one applies.

/// Growable byte buffer with explicit capacity and window bookkeeping.
#[derive(Debug)]
pub struct TransferBuffer {
    /// Backing storage, `data.len()` is the capacity.
    data: Vec<u8>,
    buffered: usize,
    read_offset: usize,
    file_offset: u64,
    max_capacity: Option<usize>,
}

impl TransferBuffer {
    pub fn new(initial_capacity: usize, max_capacity: Option<usize>) -> Self {
        let capacity = match max_capacity {
            Some(max) => initial_capacity.min(max),
            None => initial_capacity,
        };
        Self {
            data: vec![0; capacity.max(1)],
            buffered: 0,
            read_offset: 0,
            file_offset: 0,
            max_capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn buffered(&self) -> usize {
        self.buffered
    }

    pub fn read_offset(&self) -> usize {
        self.read_offset
    }

    /// Absolute stream position of the first retained byte.
    pub fn file_offset(&self) -> u64 {
        self.file_offset
    }

    /// Absolute stream position of the next unread byte.
    pub fn position(&self) -> u64 {
        self.file_offset + self.read_offset as u64
    }

    /// Absolute stream position one past the last buffered byte.
    pub fn window_end(&self) -> u64 {
        self.file_offset + self.buffered as u64
    }

    pub fn remaining(&self) -> usize {
        self.buffered - self.read_offset
    }

    pub fn free_space(&self) -> usize {
        self.capacity() - self.buffered
    }

    pub fn unread(&self) -> &[u8] {
        &self.data[self.read_offset..self.buffered]
    }

    /// Copy up to `dest.len()` unread bytes out and advance the cursor.
    pub fn take(&mut self, dest: &mut [u8]) -> usize {
        let count = dest.len().min(self.remaining());
        dest[..count].copy_from_slice(
            &self.data[self.read_offset..self.read_offset + count],
        );
        self.read_offset += count;
        count
    }

    /// Move the cursor forward over unread bytes without copying them.
    pub fn skip(&mut self, count: usize) -> usize {
        let count = count.min(self.remaining());
        self.read_offset += count;
        count
    }

    /// Place the cursor at an absolute position inside the retained
    /// window. Returns `false` and leaves the cursor alone otherwise.
    pub fn seek_within(&mut self, position: u64) -> bool {
        if position < self.file_offset || position > self.window_end() {
            return false;
        }
        self.read_offset = (position - self.file_offset) as usize;
        true
    }

    /// Discard already read bytes from the front of the buffer.
    ///
    /// The logical position is unchanged, the discarded range becomes
    /// unreachable for seeks. Returns the number of discarded bytes.
    pub fn evict(&mut self) -> usize {
        let culled = self.read_offset;
        if culled == 0 {
            return 0;
        }
        self.data.copy_within(culled..self.buffered, 0);
        self.buffered -= culled;
        self.read_offset = 0;
        self.file_offset += culled as u64;
        culled
    }

    /// Double the capacity until `want` more bytes fit behind the
    /// buffered data.
    ///
    /// When growing fails the buffer keeps the largest size reached and
    /// the returned want is reduced to the most unread data this buffer
    /// can hold.
    pub fn grow_for(&mut self, want: usize) -> usize {
        while self.free_space() < want {
            if !self.try_double() {
                let fits = want.min(self.capacity() - self.read_offset);
                log::warn!(
                    "buffer: growth stopped at {} bytes, want reduced from {} to {}",
                    self.capacity(),
                    want,
                    fits
                );
                return fits;
            }
        }
        want
    }

    /// Append received bytes, growing the storage when needed.
    ///
    /// Returns how many bytes were accepted. Fewer than `bytes.len()`
    /// means the buffer could not grow any further.
    pub fn append(&mut self, bytes: &[u8]) -> usize {
        while self.free_space() < bytes.len() {
            if !self.try_double() {
                break;
            }
        }
        let count = bytes.len().min(self.free_space());
        self.data[self.buffered..self.buffered + count]
            .copy_from_slice(&bytes[..count]);
        self.buffered += count;
        count
    }

    fn try_double(&mut self) -> bool {
        let capacity = self.capacity();
        let mut next = capacity.saturating_mul(2).max(1);
        if let Some(max) = self.max_capacity {
            next = next.min(max);
        }
        if next <= capacity {
            return false;
        }
        if self.data.try_reserve_exact(next - capacity).is_err() {
            return false;
        }
        self.data.resize(next, 0);
        log::trace!("buffer: grew from {} to {} bytes", capacity, next);
        true
    }

    #[cfg(test)]
    pub(crate) fn assert_invariants(&self) {
        assert!(self.read_offset <= self.buffered);
        assert!(self.buffered <= self.capacity());
    }
}
