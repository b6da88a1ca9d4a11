//! Drain side of the scan buffer: cursor arithmetic and frame extraction.

use core::ops::{Add, AddAssign};

use crate::buffer::ScanBuffer;
use crate::device::TransferStatus;
use crate::Result;

/// Position within a circular buffer of `bound` slots.
///
/// Addition wraps modulo the bound, so walking a cursor across the end of the
/// buffer lands back at the start without any call-site index math.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingCursor {
    index: usize,
    bound: usize,
}

impl RingCursor {
    pub fn new(bound: usize) -> RingCursor {
        assert!(bound > 0);
        RingCursor { index: 0, bound }
    }

    pub fn at(index: usize, bound: usize) -> RingCursor {
        assert!(bound > 0 && index < bound);
        RingCursor { index, bound }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    /// Slots from this cursor forward to `index`, wrapping if `index` is
    /// behind it.
    pub fn distance_to(&self, index: usize) -> usize {
        assert!(index < self.bound);
        (index + self.bound - self.index) % self.bound
    }
}

impl Add<usize> for RingCursor {
    type Output = RingCursor;

    fn add(self, offset: usize) -> Self::Output {
        RingCursor { index: (self.index + offset) % self.bound, bound: self.bound }
    }
}

impl AddAssign<usize> for RingCursor {
    fn add_assign(&mut self, offset: usize) {
        *self = *self + offset
    }
}

/// One synchronized sample across all active channels.
///
/// `values` borrows the drain scratch space and is only valid for the duration
/// of the emit call; `index` is the running save count, starting at 0 for the
/// run and never resetting on buffer wraparound.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleFrame<'a> {
    pub index: u64,
    pub values: &'a [f64],
}

/// Outcome of one drain pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DrainReport {
    pub samples: usize,
    pub frames: usize,
    pub overrun: bool,
}

/// Tracks the first unconsumed slot of the scan buffer across polls.
///
/// The device reports `current_index`, the channel-0 slot of the most recent
/// complete frame. The number of samples that arrived since the last drain is
/// then
///
/// ```text
/// ((current_index - last_save_index) mod buffer_len) + channel_count
/// ```
///
/// where the trailing `channel_count` covers the frame `current_index` itself
/// points into. That inclusive-end convention must hold exactly, or every
/// drain would duplicate or drop one frame.
#[derive(Debug)]
pub struct DrainCursor {
    cursor: RingCursor,
    buffer_len: usize,
    channel_count: usize,
    save_count: u64,
    last_total: u64,
}

impl DrainCursor {
    pub fn new(buffer_len: usize, channel_count: usize) -> DrainCursor {
        assert!(channel_count > 0 && buffer_len % channel_count == 0);
        DrainCursor {
            cursor: RingCursor::new(buffer_len),
            buffer_len,
            channel_count,
            save_count: 0,
            last_total: 0,
        }
    }

    /// First unconsumed slot.
    pub fn position(&self) -> usize {
        self.cursor.index()
    }

    /// Frames emitted so far.
    pub fn save_count(&self) -> u64 {
        self.save_count
    }

    /// Samples ready to drain for a reported write position, or `None` while
    /// the device has not completed its first transfer (`current_index < 0`,
    /// a normal transient at scan start).
    pub fn available(&self, current_index: i64) -> Option<usize> {
        if current_index < 0 {
            return None;
        }
        Some(self.cursor.distance_to(current_index as usize) + self.channel_count)
    }

    /// Extract every complete frame that arrived since the last drain and
    /// hand each to `emit`, in order. Advances past the drained region only
    /// after the full pass succeeds.
    ///
    /// Uses the transfer totals to reject the two conditions the write index
    /// alone cannot express: no progress since the last poll (the index
    /// arithmetic would alias that to a full buffer of duplicates), and an
    /// overrun, where the device lapped the cursor and the unread region was
    /// partially overwritten. An overrun drops the aliased data, logs a
    /// warning and resynchronizes at the device's current position.
    pub fn drain<F>(&mut self, buffer: &ScanBuffer, xfer: &TransferStatus, mut emit: F)
            -> Result<DrainReport>
            where F: FnMut(SampleFrame) -> Result<()> {
        if xfer.current_index < 0 {
            return Ok(DrainReport::default());
        }
        let current = xfer.current_index as usize;
        debug_assert!(current < self.buffer_len);
        debug_assert_eq!(current % self.channel_count, 0);

        let fresh = xfer.current_total_count.saturating_sub(self.last_total);
        if fresh == 0 {
            return Ok(DrainReport::default());
        }
        if fresh > self.buffer_len as u64 {
            log::warn!("overrun: {} samples arrived into a buffer of {}, dropping the aliased range",
                fresh, self.buffer_len);
            self.resync(current, xfer.current_total_count);
            return Ok(DrainReport { samples: 0, frames: 0, overrun: true });
        }

        let count = self.cursor.distance_to(current) + self.channel_count;
        debug_assert_eq!(count % self.channel_count, 0);
        let mut values = Vec::with_capacity(self.channel_count);
        let mut frames = 0;
        for offset in 0..count {
            values.push(buffer.get((self.cursor + offset).index()));
            if values.len() == self.channel_count {
                emit(SampleFrame { index: self.save_count, values: &values })?;
                self.save_count += 1;
                frames += 1;
                values.clear();
            }
        }
        self.resync(current, xfer.current_total_count);
        log::trace!("drained {} samples ({} frames) up to slot {}", count, frames, current);
        Ok(DrainReport { samples: count, frames, overrun: false })
    }

    fn resync(&mut self, current: usize, total: u64) {
        self.cursor = RingCursor::at((current + self.channel_count) % self.buffer_len,
            self.buffer_len);
        self.last_total = total;
    }
}
