//! Per-key usage counters.
//!
//! A [`Counter`] records increments against a single key and keeps enough
//! state to answer "how much in the last N seconds/minutes/hours/day/ever"
//! without storing individual events.
//!
//! # State
//!
//! All mutable state lives in a [`Usage`] behind one lock:
//!
//! - accumulators for the in-progress second, minute, hour and day
//! - an all-time total
//! - `hour_history`: completed minutes within the hour (ring buffer)
//! - `day_history`: completed hours within the day (ring buffer)
//!
//! # Rolls
//!
//! The registry's scheduler calls the roll methods once per period:
//!
//! ```text
//! roll_second:  second ──────────────> 0
//! roll_minute:  minute ──push──> hour_history, minute -> 0
//! roll_hour:    hour   ──push──> day_history,  hour   -> 0
//! roll_day:     day    ──────────────> 0
//! ```
//!
//! A roll and a concurrent increment serialize on the counter's lock, so an
//! increment lands either in the completed period or in the fresh one, never
//! both and never neither.

use std::fmt;
use std::mem;
use std::num::NonZeroUsize;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use crate::error::{CounterError, Result};
use crate::ring::RingBuffer;

/// Default number of completed minutes kept per counter.
pub const DEFAULT_HOUR_HISTORY: NonZeroUsize = NonZeroUsize::new(60).unwrap();

/// Default number of completed hours kept per counter.
pub const DEFAULT_DAY_HISTORY: NonZeroUsize = NonZeroUsize::new(24).unwrap();

/// The accumulators and history buffers of one counter.
///
/// Obtained as a snapshot from [`Counter::usage`] or borrowed for the length
/// of a closure through [`Counter::with_usage`]. Either way every accessor
/// here observes the same instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Usage {
    second: i64,
    minute: i64,
    hour: i64,
    day: i64,
    total: i64,
    hour_history: RingBuffer,
    day_history: RingBuffer,
}

impl Usage {
    /// Creates zeroed usage with the given history capacities.
    pub fn new(hour_history: NonZeroUsize, day_history: NonZeroUsize) -> Self {
        Self::with_buffers(
            RingBuffer::with_capacity(hour_history),
            RingBuffer::with_capacity(day_history),
        )
    }

    /// Creates zeroed usage around caller-built history buffers.
    pub fn with_buffers(hour_history: RingBuffer, day_history: RingBuffer) -> Self {
        Self {
            second: 0,
            minute: 0,
            hour: 0,
            day: 0,
            total: 0,
            hour_history,
            day_history,
        }
    }

    /// Usage in the in-progress second.
    pub fn second_usages(&self) -> i64 {
        self.second
    }

    /// Usage in the in-progress minute.
    pub fn minute_usages(&self) -> i64 {
        self.minute
    }

    /// Usage in the in-progress hour.
    pub fn hourly_usages(&self) -> i64 {
        self.hour
    }

    /// Usage in the in-progress day.
    pub fn daily_usages(&self) -> i64 {
        self.day
    }

    /// All-time usage.
    pub fn total_usages(&self) -> i64 {
        self.total
    }

    /// Completed minutes within the hour, newest first.
    pub fn hour_buffer(&self) -> &RingBuffer {
        &self.hour_history
    }

    /// Completed hours within the day, newest first.
    pub fn day_buffer(&self) -> &RingBuffer {
        &self.day_history
    }

    #[inline]
    fn add(&mut self, amount: i64) {
        self.second = self.second.saturating_add(amount);
        self.minute = self.minute.saturating_add(amount);
        self.hour = self.hour.saturating_add(amount);
        self.day = self.day.saturating_add(amount);
        self.total = self.total.saturating_add(amount);
    }
}

impl Default for Usage {
    fn default() -> Self {
        Self::new(DEFAULT_HOUR_HISTORY, DEFAULT_DAY_HISTORY)
    }
}

/// Usage counter for a single key.
///
/// Counters are shared as `Arc<Counter<K>>`; every method takes `&self`.
///
/// # Thread Safety
///
/// Increments and rolls take the write lock for a handful of additions.
/// Reads take the read lock just long enough to copy what they return, so no
/// guard ever escapes to the caller. Parent propagation releases this counter's lock
/// before touching the parent, so locks are only ever taken child first.
#[derive(Debug)]
pub struct Counter<K> {
    key: K,
    /// Weak so a parent removed from everywhere ends propagation.
    parent: Option<Weak<Counter<K>>>,
    recursive_increments: bool,
    usage: RwLock<Usage>,
}

impl<K> Counter<K> {
    /// Creates a counter with default history capacities.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use tally::Counter;
    ///
    /// # fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// let counter = Counter::new("api", None, false);
    /// counter.increment(3)?;
    /// assert_eq!(counter.total_usages(), 3);
    /// # Ok(())
    /// # }
    /// ```
    pub fn new(key: K, parent: Option<&Arc<Counter<K>>>, recursive_increments: bool) -> Self {
        Self::with_history(
            key,
            parent,
            recursive_increments,
            DEFAULT_HOUR_HISTORY,
            DEFAULT_DAY_HISTORY,
        )
    }

    /// Creates a counter with explicit history capacities.
    pub fn with_history(
        key: K,
        parent: Option<&Arc<Counter<K>>>,
        recursive_increments: bool,
        hour_history: NonZeroUsize,
        day_history: NonZeroUsize,
    ) -> Self {
        Self::with_buffers(
            key,
            parent,
            recursive_increments,
            RingBuffer::with_capacity(hour_history),
            RingBuffer::with_capacity(day_history),
        )
    }

    /// Creates a counter around caller-built history buffers.
    ///
    /// `hour_history` receives completed minutes and `day_history` completed
    /// hours. Both should start empty.
    pub fn with_buffers(
        key: K,
        parent: Option<&Arc<Counter<K>>>,
        recursive_increments: bool,
        hour_history: RingBuffer,
        day_history: RingBuffer,
    ) -> Self {
        Self {
            key,
            parent: parent.map(Arc::downgrade),
            recursive_increments,
            usage: RwLock::new(Usage::with_buffers(hour_history, day_history)),
        }
    }

    /// Returns the key this counter tracks.
    pub fn key(&self) -> &K {
        &self.key
    }

    /// Returns the parent counter, if one was set and is still alive.
    pub fn parent(&self) -> Option<Arc<Counter<K>>> {
        self.parent.as_ref().and_then(Weak::upgrade)
    }

    /// Returns an iterator over live ancestors, nearest first.
    pub fn ancestors(&self) -> Ancestors<K> {
        Ancestors {
            next: self.parent(),
        }
    }

    /// Returns whether increments are forwarded to the parent.
    pub fn recursive_increments(&self) -> bool {
        self.recursive_increments
    }

    /// Adds `amount` to every accumulator of this counter.
    ///
    /// With recursive increments enabled, the same amount is then added to
    /// each live ancestor in turn. A zero amount is accepted and changes
    /// nothing.
    ///
    /// # Errors
    ///
    /// Returns [`CounterError::NegativeAmount`] if `amount < 0`; no counter
    /// is modified in that case.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use std::sync::Arc;
    /// use tally::Counter;
    ///
    /// # fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// let parent = Arc::new(Counter::new("service", None, true));
    /// let child = Counter::new("service/login", Some(&parent), true);
    ///
    /// child.increment(2)?;
    /// assert_eq!(parent.total_usages(), 2);
    /// assert!(child.increment(-1).is_err());
    /// # Ok(())
    /// # }
    /// ```
    pub fn increment(&self, amount: i64) -> Result<()> {
        if amount < 0 {
            return Err(CounterError::NegativeAmount { amount }.into());
        }
        if amount == 0 {
            return Ok(());
        }

        self.usage.write().add(amount);

        if !self.recursive_increments {
            return Ok(());
        }

        let mut next = self.parent();
        while let Some(counter) = next {
            counter.usage.write().add(amount);
            next = if counter.recursive_increments {
                counter.parent()
            } else {
                None
            };
        }

        Ok(())
    }

    /// Closes the in-progress second and returns its count.
    pub fn roll_second(&self) -> i64 {
        mem::take(&mut self.usage.write().second)
    }

    /// Closes the in-progress minute, archives it in the hour history, and
    /// returns its count.
    pub fn roll_minute(&self) -> i64 {
        let mut usage = self.usage.write();
        let completed = mem::take(&mut usage.minute);
        usage.hour_history.push(completed);
        completed
    }

    /// Closes the in-progress hour, archives it in the day history, and
    /// returns its count.
    pub fn roll_hour(&self) -> i64 {
        let mut usage = self.usage.write();
        let completed = mem::take(&mut usage.hour);
        usage.day_history.push(completed);
        completed
    }

    /// Closes the in-progress day and returns its count.
    pub fn roll_day(&self) -> i64 {
        mem::take(&mut self.usage.write().day)
    }

    /// Closes the in-progress period of `granularity` and returns its count.
    pub fn roll(&self, granularity: Granularity) -> i64 {
        match granularity {
            Granularity::Second => self.roll_second(),
            Granularity::Minute => self.roll_minute(),
            Granularity::Hour => self.roll_hour(),
            Granularity::Day => self.roll_day(),
        }
    }

    /// Usage in the in-progress second.
    pub fn second_usages(&self) -> i64 {
        self.usage.read().second
    }

    /// Usage in the in-progress minute.
    pub fn minute_usages(&self) -> i64 {
        self.usage.read().minute
    }

    /// Usage in the in-progress hour.
    pub fn hourly_usages(&self) -> i64 {
        self.usage.read().hour
    }

    /// Usage in the in-progress day.
    pub fn daily_usages(&self) -> i64 {
        self.usage.read().day
    }

    /// All-time usage.
    pub fn total_usages(&self) -> i64 {
        self.usage.read().total
    }

    /// Copy of the completed minutes within the hour.
    pub fn hour_buffer(&self) -> RingBuffer {
        self.usage.read().hour_history.clone()
    }

    /// Copy of the completed hours within the day.
    pub fn day_buffer(&self) -> RingBuffer {
        self.usage.read().day_history.clone()
    }

    /// Consistent snapshot of all accumulators and history.
    pub fn usage(&self) -> Usage {
        self.usage.read().clone()
    }

    /// Runs `f` against the live usage under the counter's read lock.
    ///
    /// Avoids the copy made by [`Counter::usage`]. Increments and rolls on
    /// this counter wait until `f` returns, so keep it short and do not touch
    /// the counter from inside it.
    pub fn with_usage<R>(&self, f: impl FnOnce(&Usage) -> R) -> R {
        f(&self.usage.read())
    }
}

/// The periods a counter rolls over, finest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Granularity {
    /// One second.
    Second,
    /// One minute.
    Minute,
    /// One hour.
    Hour,
    /// One day.
    Day,
}

impl Granularity {
    /// Returns the lowercase name of this granularity.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Second => "second",
            Self::Minute => "minute",
            Self::Hour => "hour",
            Self::Day => "day",
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Iterator over a counter's live ancestors, nearest first.
///
/// Created by [`Counter::ancestors`]. Stops at the first parent that has been
/// dropped.
#[derive(Debug)]
pub struct Ancestors<K> {
    next: Option<Arc<Counter<K>>>,
}

impl<K> Iterator for Ancestors<K> {
    type Item = Arc<Counter<K>>;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next.take()?;
        self.next = current.parent();
        Some(current)
    }
}
