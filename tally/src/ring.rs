//! Fixed-capacity ring buffer of completed-period counts.
//!
//! Each [`Counter`](crate::counter::Counter) keeps one ring buffer per
//! granularity that needs history: completed minutes within the hour and
//! completed hours within the day. A roll pushes the just-finished period's
//! count; windows read the most recent entries back with
//! [`RingBuffer::sum_last`].
//!
//! # Design
//!
//! - Storage is allocated once at construction and never grows
//! - `push` overwrites the oldest slot once the buffer is full, never errors
//! - `sum_last(k)` clamps `k` to what has actually been pushed, so a freshly
//!   created buffer answers with partial sums instead of failing
//! - The write cursor always points at the slot the next push lands in

use std::num::NonZeroUsize;

use crate::error::{CounterError, Result};

/// A fixed-capacity circular buffer of `i64` counts.
///
/// # Thread Safety
///
/// `RingBuffer` is not synchronized on its own. The owning counter keeps it
/// behind its lock and is the only writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RingBuffer {
    /// Backing slots, `capacity` long.
    slots: Box<[i64]>,
    /// Index of the slot the next push writes to.
    cursor: usize,
    /// Number of retained entries, saturating at capacity.
    len: usize,
}

impl RingBuffer {
    /// Creates an empty ring buffer holding at most `capacity` entries.
    ///
    /// # Errors
    ///
    /// Returns [`CounterError::InvalidCapacity`] if `capacity` is zero.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use tally::ring::RingBuffer;
    ///
    /// # fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// let ring = RingBuffer::new(60)?;
    /// assert_eq!(ring.capacity(), 60);
    /// assert!(ring.is_empty());
    /// assert!(RingBuffer::new(0).is_err());
    /// # Ok(())
    /// # }
    /// ```
    pub fn new(capacity: usize) -> Result<Self> {
        let capacity =
            NonZeroUsize::new(capacity).ok_or(CounterError::InvalidCapacity { capacity })?;
        Ok(Self::with_capacity(capacity))
    }

    /// Creates an empty ring buffer from a capacity known to be non-zero.
    pub fn with_capacity(capacity: NonZeroUsize) -> Self {
        Self {
            slots: vec![0; capacity.get()].into_boxed_slice(),
            cursor: 0,
            len: 0,
        }
    }

    /// Appends `value` as the newest entry, evicting the oldest when full.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use tally::ring::RingBuffer;
    ///
    /// # fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// let mut ring = RingBuffer::new(2)?;
    /// ring.push(1);
    /// ring.push(2);
    /// ring.push(3); // evicts 1
    /// assert_eq!(ring.sum_last(2), 5);
    /// # Ok(())
    /// # }
    /// ```
    #[inline]
    pub fn push(&mut self, value: i64) {
        self.slots[self.cursor] = value;
        self.cursor = (self.cursor + 1) % self.slots.len();
        if self.len < self.slots.len() {
            self.len += 1;
        }
    }

    /// Returns the sum of the `k` most recently pushed values.
    ///
    /// `k` is clamped to the number of retained entries, so asking for more
    /// history than exists sums only what exists. The sum saturates at
    /// `i64::MAX`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use tally::ring::RingBuffer;
    ///
    /// # fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// let mut ring = RingBuffer::new(60)?;
    /// assert_eq!(ring.sum_last(4), 0);
    ///
    /// ring.push(10);
    /// ring.push(20);
    /// assert_eq!(ring.sum_last(1), 20);
    /// assert_eq!(ring.sum_last(4), 30);
    /// # Ok(())
    /// # }
    /// ```
    pub fn sum_last(&self, k: usize) -> i64 {
        self.iter().take(k).fold(0, i64::saturating_add)
    }

    /// Returns the maximum number of entries this buffer retains.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Returns the number of entries currently retained.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if nothing has been pushed yet.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns `true` once the buffer has filled and started evicting.
    ///
    /// This also holds for a buffer that is exactly full, since the next push
    /// evicts.
    pub fn has_wrapped(&self) -> bool {
        self.len == self.slots.len()
    }

    /// Returns the most recently pushed value, or `None` if empty.
    pub fn newest(&self) -> Option<i64> {
        self.iter().next()
    }

    /// Returns the oldest retained value, or `None` if empty.
    pub fn oldest(&self) -> Option<i64> {
        self.iter().last()
    }

    /// Returns an iterator over retained values, newest first.
    pub fn iter(&self) -> Recent<'_> {
        Recent {
            ring: self,
            offset: 0,
        }
    }
}

impl<'a> IntoIterator for &'a RingBuffer {
    type Item = i64;
    type IntoIter = Recent<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator over a ring buffer's retained values, newest first.
#[derive(Debug, Clone)]
pub struct Recent<'a> {
    ring: &'a RingBuffer,
    /// How many entries have been yielded so far.
    offset: usize,
}

impl Iterator for Recent<'_> {
    type Item = i64;

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset >= self.ring.len {
            return None;
        }

        let capacity = self.ring.slots.len();
        // cursor - 1 is the newest slot; step backwards from there
        let slot = (self.ring.cursor + capacity - 1 - self.offset) % capacity;
        self.offset += 1;
        Some(self.ring.slots[slot])
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.ring.len - self.offset;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Recent<'_> {}
