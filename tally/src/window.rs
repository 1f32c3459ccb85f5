//! Window selectors: named lookbacks used to rank and sum counters.
//!
//! A [`Window`] maps a counter's [`Usage`] to an amount. Built-in windows
//! ([`DefaultWindow`]) compose the in-progress accumulators with the history
//! ring buffers; callers can add their own by implementing [`Window`] or by
//! wrapping a closure in [`WindowFn`].
//!
//! # Composition
//!
//! | Window            | Amount                                         |
//! |-------------------|------------------------------------------------|
//! | `last-second`     | `second_usages()`                              |
//! | `last-minute`     | `minute_usages()`                              |
//! | `last-5-minutes`  | `hour_buffer().sum_last(4) + minute_usages()`  |
//! | `last-15-minutes` | `hour_buffer().sum_last(14) + minute_usages()` |
//! | `last-30-minutes` | `hour_buffer().sum_last(29) + minute_usages()` |
//! | `last-hour`       | `hourly_usages()`                              |
//! | `last-2-hours`    | `day_buffer().sum_last(1) + hourly_usages()`   |
//! | `last-6-hours`    | `day_buffer().sum_last(5) + hourly_usages()`   |
//! | `last-12-hours`   | `day_buffer().sum_last(11) + hourly_usages()`  |
//! | `last-day`        | `daily_usages()`                               |
//! | `total`           | `total_usages()`                               |
//!
//! Sums saturate at `i64::MAX`.
//!
//! `last-second` is the in-progress second at read time; there is no frozen
//! copy of the previous second.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use tally::{Counter, DefaultWindow, WindowExt};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let a = Arc::new(Counter::new("a", None, false));
//! let b = Arc::new(Counter::new("b", None, false));
//! a.increment(10)?;
//! b.increment(50)?;
//!
//! let top = DefaultWindow::Total.highest([Arc::clone(&a), Arc::clone(&b)], 1);
//! assert_eq!(*top[0].key(), "b");
//! assert_eq!(DefaultWindow::Total.total([&*a, &*b]), 60);
//! # Ok(())
//! # }
//! ```

use std::cmp::{Ordering, Reverse};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::counter::{Counter, Usage};
use crate::error::UnknownWindow;

/// A named lookback over a counter's usage.
///
/// `measure` must be pure: no side effects, and no blocking beyond reading
/// the view it is given.
pub trait Window {
    /// Human-readable name of this window.
    fn name(&self) -> &str;

    /// Computes this window's amount from a consistent usage view.
    fn measure(&self, usage: &Usage) -> i64;
}

/// Ranking and summing helpers available on every [`Window`].
pub trait WindowExt: Window {
    /// Evaluates this window against `counter`.
    ///
    /// The counter is read under a single lock acquisition, so composed
    /// windows never mix values from before and after a roll.
    fn amount<K>(&self, counter: &Counter<K>) -> i64 {
        counter.with_usage(|usage| self.measure(usage))
    }

    /// Orders two counters ascending by this window's amount.
    fn compare<K>(&self, a: &Counter<K>, b: &Counter<K>) -> Ordering {
        self.amount(a).cmp(&self.amount(b))
    }

    /// Returns at most `n` counters, highest amount first.
    ///
    /// Counters with equal amounts keep their input order.
    fn highest<K, I>(&self, counters: I, n: usize) -> Vec<Arc<Counter<K>>>
    where
        I: IntoIterator<Item = Arc<Counter<K>>>,
    {
        let mut ranked = measure_all(self, counters);
        ranked.sort_by_key(|&(amount, _)| Reverse(amount));
        ranked.into_iter().take(n).map(|(_, counter)| counter).collect()
    }

    /// Returns at most `n` counters, lowest amount first.
    ///
    /// Counters with equal amounts keep their input order.
    fn lowest<K, I>(&self, counters: I, n: usize) -> Vec<Arc<Counter<K>>>
    where
        I: IntoIterator<Item = Arc<Counter<K>>>,
    {
        let mut ranked = measure_all(self, counters);
        ranked.sort_by_key(|&(amount, _)| amount);
        ranked.into_iter().take(n).map(|(_, counter)| counter).collect()
    }

    /// Sums this window's amount over `counters`.
    fn total<'a, K, I>(&self, counters: I) -> i64
    where
        K: 'a,
        I: IntoIterator<Item = &'a Counter<K>>,
    {
        counters
            .into_iter()
            .fold(0i64, |sum, counter| sum.saturating_add(self.amount(counter)))
    }
}

impl<W: Window + ?Sized> WindowExt for W {}

/// Evaluates each counter once so sorting doesn't re-lock them.
fn measure_all<W, K, I>(window: &W, counters: I) -> Vec<(i64, Arc<Counter<K>>)>
where
    W: Window + ?Sized,
    I: IntoIterator<Item = Arc<Counter<K>>>,
{
    counters
        .into_iter()
        .map(|counter| (window.amount(&counter), counter))
        .collect()
}

/// The built-in windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DefaultWindow {
    /// The in-progress second.
    LastSecond,
    /// The in-progress minute.
    LastMinute,
    /// Four completed minutes plus the in-progress one.
    Last5Minutes,
    /// Fourteen completed minutes plus the in-progress one.
    Last15Minutes,
    /// Twenty-nine completed minutes plus the in-progress one.
    Last30Minutes,
    /// The in-progress hour.
    LastHour,
    /// One completed hour plus the in-progress one.
    Last2Hours,
    /// Five completed hours plus the in-progress one.
    Last6Hours,
    /// Eleven completed hours plus the in-progress one.
    Last12Hours,
    /// The in-progress day.
    LastDay,
    /// All-time usage.
    Total,
}

impl DefaultWindow {
    /// Every built-in window, shortest lookback first.
    pub const ALL: [Self; 11] = [
        Self::LastSecond,
        Self::LastMinute,
        Self::Last5Minutes,
        Self::Last15Minutes,
        Self::Last30Minutes,
        Self::LastHour,
        Self::Last2Hours,
        Self::Last6Hours,
        Self::Last12Hours,
        Self::LastDay,
        Self::Total,
    ];

    /// Longest run of completed minutes any built-in window reads.
    ///
    /// A counter's minute history must hold at least this many entries.
    pub const MAX_MINUTE_LOOKBACK: usize = 29;

    /// Longest run of completed hours any built-in window reads.
    ///
    /// A counter's hour history must hold at least this many entries.
    pub const MAX_HOUR_LOOKBACK: usize = 11;

    /// Completed minutes this window reads from the minute history.
    pub const fn minute_lookback(self) -> usize {
        match self {
            Self::Last5Minutes => 4,
            Self::Last15Minutes => 14,
            Self::Last30Minutes => Self::MAX_MINUTE_LOOKBACK,
            _ => 0,
        }
    }

    /// Completed hours this window reads from the hour history.
    pub const fn hour_lookback(self) -> usize {
        match self {
            Self::Last2Hours => 1,
            Self::Last6Hours => 5,
            Self::Last12Hours => Self::MAX_HOUR_LOOKBACK,
            _ => 0,
        }
    }

    /// Returns the kebab-case name of this window.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::LastSecond => "last-second",
            Self::LastMinute => "last-minute",
            Self::Last5Minutes => "last-5-minutes",
            Self::Last15Minutes => "last-15-minutes",
            Self::Last30Minutes => "last-30-minutes",
            Self::LastHour => "last-hour",
            Self::Last2Hours => "last-2-hours",
            Self::Last6Hours => "last-6-hours",
            Self::Last12Hours => "last-12-hours",
            Self::LastDay => "last-day",
            Self::Total => "total",
        }
    }
}

impl Window for DefaultWindow {
    fn name(&self) -> &str {
        self.as_str()
    }

    fn measure(&self, usage: &Usage) -> i64 {
        let minutes = usage.hour_buffer().sum_last(self.minute_lookback());
        let hours = usage.day_buffer().sum_last(self.hour_lookback());

        match self {
            Self::LastSecond => usage.second_usages(),
            Self::LastMinute => usage.minute_usages(),
            Self::Last5Minutes | Self::Last15Minutes | Self::Last30Minutes => {
                minutes.saturating_add(usage.minute_usages())
            }
            Self::LastHour => usage.hourly_usages(),
            Self::Last2Hours | Self::Last6Hours | Self::Last12Hours => {
                hours.saturating_add(usage.hourly_usages())
            }
            Self::LastDay => usage.daily_usages(),
            Self::Total => usage.total_usages(),
        }
    }
}

impl fmt::Display for DefaultWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DefaultWindow {
    type Err = UnknownWindow;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|window| window.as_str() == s)
            .ok_or_else(|| UnknownWindow {
                name: s.to_string(),
            })
    }
}

/// A user-defined window built from a name and a closure.
///
/// # Examples
///
/// ```rust
/// use tally::{Counter, WindowExt, WindowFn};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let last_3_minutes = WindowFn::new("last-3-minutes", |usage| {
///     usage.hour_buffer().sum_last(2) + usage.minute_usages()
/// });
///
/// let counter = Counter::new("k", None, false);
/// counter.increment(4)?;
/// counter.roll_minute();
/// counter.increment(1)?;
/// assert_eq!(last_3_minutes.amount(&counter), 5);
/// # Ok(())
/// # }
/// ```
pub struct WindowFn<F> {
    name: String,
    measure: F,
}

impl<F> WindowFn<F>
where
    F: Fn(&Usage) -> i64,
{
    /// Creates a window named `name` that evaluates `measure`.
    pub fn new(name: impl Into<String>, measure: F) -> Self {
        Self {
            name: name.into(),
            measure,
        }
    }
}

impl<F> Window for WindowFn<F>
where
    F: Fn(&Usage) -> i64,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn measure(&self, usage: &Usage) -> i64 {
        (self.measure)(usage)
    }
}

impl<F> fmt::Debug for WindowFn<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WindowFn").field("name", &self.name).finish_non_exhaustive()
    }
}
