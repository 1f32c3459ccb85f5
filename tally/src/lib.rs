//! # tally
//!
//! Multi-resolution sliding-window usage counters.
//!
//! tally tracks how much each key (an endpoint, a tenant, a job) was used in
//! the last second, minute, 5/15/30 minutes, hour, 2/6/12 hours, day, and
//! ever, without storing individual events. Counters are kept in a
//! concurrent registry and rolled forward by a background scheduler.
//!
//! **Status**: This crate is in early development. The API is not yet stable.
//!
//! ## Key Properties
//!
//! - O(1) increments: five additions under one per-counter lock
//! - Bounded memory per key: one ring buffer of minutes, one of hours
//! - Sharded key lookup: threads touching different keys rarely contend
//! - Optional parent counters that receive every increment of their children
//! - Open window trait: rank and sum counters over built-in or custom lookbacks
//!
//! ## Quick Start
//!
//! ```rust
//! use tally::{DefaultWindow, Registry, RegistryConfig, WindowExt};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = Registry::new(RegistryConfig::default())?;
//!
//! // Roll counters in the background (stopped again on drop)
//! registry.start()?;
//!
//! registry.increment("tenant-a", 10)?;
//! registry.increment("tenant-b", 50)?;
//!
//! // Who used the most in the last five minutes?
//! let top = registry.highest(&DefaultWindow::Last5Minutes, 1);
//! assert_eq!(*top[0].key(), "tenant-b");
//!
//! // Windows evaluate single counters too
//! let a = registry.counter("tenant-a");
//! assert_eq!(DefaultWindow::Total.amount(&a), 10);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`Registry`]: top-level handle; key→counter map plus the roll scheduler
//! - [`Counter`]: accumulators and history buffers for one key
//! - [`Window`] / [`DefaultWindow`]: named lookbacks used to rank and sum
//! - [`RegistryConfig`]: history sizes, recursion, and roll cadences
//!
//! ## Modules
//!
//! For lower-level access, the individual modules are also public:
//!
//! - [`registry`]: counter map, lazy creation, sweeps, ranking
//! - [`counter`]: per-key accumulators and rolls
//! - [`window`]: window trait, built-in windows, ranking helpers
//! - [`scheduler`]: background roll thread and thread factories
//! - [`ring`]: fixed-capacity history buffer
//! - [`config`]: registry and scheduler configuration
//! - [`error`]: error types

pub mod config;
pub mod counter;
pub mod error;
pub mod registry;
pub mod ring;
pub mod scheduler;
pub mod window;

// Re-export primary API types at crate root for convenience.
pub use config::{DayReset, RegistryConfig, SchedulerConfig};
pub use counter::{Counter, Granularity, Usage};
pub use error::{Result, TallyError};
pub use registry::{CounterFactory, DefaultCounterFactory, Registry};
pub use ring::RingBuffer;
pub use scheduler::{NamedThreadFactory, ThreadFactory};
pub use window::{DefaultWindow, Window, WindowExt, WindowFn};
