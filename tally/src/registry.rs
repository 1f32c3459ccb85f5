//! Registry of counters keyed by caller-defined keys.
//!
//! A [`Registry`] maps keys to shared [`Counter`]s, creates them lazily on
//! first use, and owns the [`Scheduler`] that rolls every counter on the
//! configured cadences.
//!
//! # Example
//!
//! ```rust
//! use tally::{DefaultWindow, Registry, RegistryConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = Registry::new(RegistryConfig::default())?;
//! registry.increment("GET /users", 10)?;
//! registry.increment("GET /orders", 50)?;
//! registry.increment("GET /health", 5)?;
//!
//! let top = registry.highest(&DefaultWindow::LastMinute, 2);
//! let keys: Vec<_> = top.iter().map(|c| *c.key()).collect();
//! assert_eq!(keys, ["GET /orders", "GET /users"]);
//! assert_eq!(registry.total(&DefaultWindow::LastMinute), 65);
//! # Ok(())
//! # }
//! ```
//!
//! The scheduler is not started by [`Registry::new`]; call
//! [`Registry::start`] to roll counters in the background, or drive the
//! `roll_*` sweeps by hand.

use std::borrow::Borrow;
use std::fmt;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::config::RegistryConfig;
use crate::counter::{Counter, Granularity};
use crate::error::{CounterError, Result};
use crate::ring::RingBuffer;
use crate::scheduler::{NamedThreadFactory, Scheduler, Sweeper, ThreadFactory};
use crate::window::{Window, WindowExt};

/// Builds the counters a [`Registry`] hands out.
///
/// Both hooks have defaults: override [`create_ring_buffer`] to change how
/// history is allocated, or [`create_counter`] to build counters outright.
///
/// Called at most once per key, while the registry holds the lock for that
/// key's shard. Implementations must not call back into the registry.
///
/// [`create_ring_buffer`]: CounterFactory::create_ring_buffer
/// [`create_counter`]: CounterFactory::create_counter
pub trait CounterFactory<K>: Send + Sync {
    /// Creates an empty history buffer holding `capacity` entries.
    fn create_ring_buffer(&self, capacity: NonZeroUsize) -> RingBuffer {
        RingBuffer::with_capacity(capacity)
    }

    /// Creates the counter for `key`, linked to `parent` if given.
    ///
    /// The default sizes both histories from `config` through
    /// [`create_ring_buffer`](CounterFactory::create_ring_buffer).
    fn create_counter(
        &self,
        parent: Option<&Arc<Counter<K>>>,
        key: K,
        config: &RegistryConfig,
    ) -> Counter<K> {
        Counter::with_buffers(
            key,
            parent,
            config.recursive_increments,
            self.create_ring_buffer(config.hour_history),
            self.create_ring_buffer(config.day_history),
        )
    }
}

/// Creates plain [`Counter`]s sized from the registry configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultCounterFactory;

impl<K> CounterFactory<K> for DefaultCounterFactory {}

/// State shared between the registry handle and its scheduler thread.
struct Shared<K> {
    counters: DashMap<K, Arc<Counter<K>>>,
    config: RegistryConfig,
    factory: Box<dyn CounterFactory<K>>,
}

impl<K> Shared<K>
where
    K: Eq + Hash,
{
    /// Rolls `granularity` on every live counter.
    fn sweep_all(&self, granularity: Granularity) -> usize {
        self.sweep_with(granularity, Counter::roll)
    }

    /// Applies `roll` to every live counter.
    ///
    /// A panic while rolling one counter is logged and the sweep moves on.
    fn sweep_with<F>(&self, granularity: Granularity, roll: F) -> usize
    where
        F: Fn(&Counter<K>, Granularity) -> i64,
    {
        let mut rolled = 0;

        for entry in self.counters.iter() {
            let counter = entry.value();
            match panic::catch_unwind(AssertUnwindSafe(|| roll(counter, granularity))) {
                Ok(_) => rolled += 1,
                Err(_) => tracing::warn!(%granularity, "roll panicked, skipping counter"),
            }
        }

        tracing::debug!(%granularity, rolled, "sweep complete");
        rolled
    }
}

impl<K> Sweeper for Shared<K>
where
    K: Eq + Hash + Send + Sync,
{
    fn sweep(&self, granularity: Granularity) -> usize {
        self.sweep_all(granularity)
    }
}

/// Concurrent map from keys to usage counters, with a background roller.
///
/// # Thread Safety
///
/// Every method takes `&self`; share a registry across threads with `Arc`.
/// Lookups and lazy creation go through a sharded [`DashMap`], so each key
/// gets exactly one counter even when many threads touch it first at once.
///
/// Dropping the registry stops its scheduler.
pub struct Registry<K> {
    shared: Arc<Shared<K>>,
    scheduler: Scheduler,
}

impl<K> Registry<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    /// Creates an empty registry with the default counter and thread factories.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`](crate::error::ConfigError) if `config` is
    /// invalid. Nothing is created in that case.
    pub fn new(config: RegistryConfig) -> Result<Self> {
        Self::with_factory(config, Box::new(DefaultCounterFactory))
    }

    /// Creates an empty registry that builds counters with `factory`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`](crate::error::ConfigError) if `config` is
    /// invalid.
    pub fn with_factory(
        config: RegistryConfig,
        factory: Box<dyn CounterFactory<K>>,
    ) -> Result<Self> {
        let threads = NamedThreadFactory::new(config.scheduler.thread_name.clone());
        Self::with_factories(config, factory, Box::new(threads))
    }

    /// Creates an empty registry with custom counter and thread factories.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`](crate::error::ConfigError) if `config` is
    /// invalid.
    pub fn with_factories(
        config: RegistryConfig,
        factory: Box<dyn CounterFactory<K>>,
        threads: Box<dyn ThreadFactory>,
    ) -> Result<Self> {
        config.validate()?;
        let scheduler = Scheduler::new(config.scheduler.clone(), threads)?;

        Ok(Self {
            shared: Arc::new(Shared {
                counters: DashMap::new(),
                config,
                factory,
            }),
            scheduler,
        })
    }

    /// Returns the configuration this registry was built with.
    pub fn config(&self) -> &RegistryConfig {
        &self.shared.config
    }

    /// Returns the scheduler that rolls this registry's counters.
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Starts rolling counters in the background.
    ///
    /// # Errors
    ///
    /// - [`SchedulerError::AlreadyRunning`](crate::error::SchedulerError::AlreadyRunning)
    ///   if already started
    /// - [`SchedulerError::Spawn`](crate::error::SchedulerError::Spawn) if the
    ///   thread factory fails
    pub fn start(&self) -> Result<()> {
        let sweeper: Weak<Shared<K>> = Arc::downgrade(&self.shared);
        self.scheduler.start(sweeper)
    }

    /// Stops the background roller and waits for its thread to exit.
    ///
    /// Does nothing if it is not running.
    pub fn stop(&self) {
        self.scheduler.stop();
    }

    /// Returns `true` while the background roller is running.
    pub fn is_running(&self) -> bool {
        self.scheduler.is_running()
    }

    /// Returns the counter for `key`, creating it if needed.
    ///
    /// Concurrent first calls for the same key all receive the same counter.
    pub fn counter(&self, key: K) -> Arc<Counter<K>> {
        if let Some(counter) = self.get(&key) {
            return counter;
        }

        match self.shared.counters.entry(key) {
            Entry::Occupied(entry) => Arc::clone(entry.get()),
            Entry::Vacant(entry) => {
                let counter = self.create(None, entry.key().clone());
                Arc::clone(entry.insert(counter).value())
            }
        }
    }

    /// Returns the counter for `key`, creating it as a child of `parent_key`.
    ///
    /// The parent is fetched or created first. If `key` already has a
    /// counter it is returned unchanged: parents are fixed at creation.
    ///
    /// # Errors
    ///
    /// Returns [`CounterError::ParentCycle`] if `key == parent_key` or `key`
    /// already appears among the parent's ancestors.
    pub fn counter_with_parent(&self, key: K, parent_key: K) -> Result<Arc<Counter<K>>> {
        if key == parent_key {
            return Err(CounterError::ParentCycle.into());
        }
        if let Some(counter) = self.get(&key) {
            return Ok(counter);
        }

        let parent = self.counter(parent_key);
        if parent.ancestors().any(|ancestor| *ancestor.key() == key) {
            return Err(CounterError::ParentCycle.into());
        }

        let counter = match self.shared.counters.entry(key) {
            Entry::Occupied(entry) => Arc::clone(entry.get()),
            Entry::Vacant(entry) => {
                let counter = self.create(Some(&parent), entry.key().clone());
                Arc::clone(entry.insert(counter).value())
            }
        };
        Ok(counter)
    }

    /// Returns the counter for `key` if one exists.
    pub fn get<Q>(&self, key: &Q) -> Option<Arc<Counter<K>>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.shared
            .counters
            .get(key)
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Removes and returns the counter for `key`.
    ///
    /// Holders of the returned `Arc` can keep using it, but the registry no
    /// longer rolls it. Children linked to it keep propagating to it for as
    /// long as it stays alive.
    pub fn remove<Q>(&self, key: &Q) -> Option<Arc<Counter<K>>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let (_, counter) = self.shared.counters.remove(key)?;
        tracing::debug!(remaining = self.shared.counters.len(), "counter removed");
        Some(counter)
    }

    /// Adds `amount` to the counter for `key`, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns [`CounterError::NegativeAmount`] if `amount < 0`. No counter
    /// is created in that case.
    pub fn increment(&self, key: K, amount: i64) -> Result<()> {
        if amount < 0 {
            return Err(CounterError::NegativeAmount { amount }.into());
        }
        self.counter(key).increment(amount)
    }

    /// Returns the live key→counter map.
    ///
    /// Iteration reflects concurrent inserts and removals as they happen.
    pub fn counters(&self) -> &DashMap<K, Arc<Counter<K>>> {
        &self.shared.counters
    }

    /// Returns the number of tracked counters.
    pub fn len(&self) -> usize {
        self.shared.counters.len()
    }

    /// Returns `true` if no counters are tracked.
    pub fn is_empty(&self) -> bool {
        self.shared.counters.is_empty()
    }

    /// Returns at most `n` counters, highest `window` amount first.
    pub fn highest<W: Window + ?Sized>(&self, window: &W, n: usize) -> Vec<Arc<Counter<K>>> {
        window.highest(self.snapshot(), n)
    }

    /// Returns at most `n` counters, lowest `window` amount first.
    pub fn lowest<W: Window + ?Sized>(&self, window: &W, n: usize) -> Vec<Arc<Counter<K>>> {
        window.lowest(self.snapshot(), n)
    }

    /// Sums `window` over every tracked counter.
    pub fn total<W: Window + ?Sized>(&self, window: &W) -> i64 {
        let counters = self.snapshot();
        window.total(counters.iter().map(|counter| &**counter))
    }

    /// Rolls the second on every counter. Returns how many were rolled.
    pub fn roll_seconds(&self) -> usize {
        self.roll(Granularity::Second)
    }

    /// Rolls the minute on every counter. Returns how many were rolled.
    pub fn roll_minutes(&self) -> usize {
        self.roll(Granularity::Minute)
    }

    /// Rolls the hour on every counter. Returns how many were rolled.
    pub fn roll_hours(&self) -> usize {
        self.roll(Granularity::Hour)
    }

    /// Rolls the day on every counter. Returns how many were rolled.
    pub fn roll_days(&self) -> usize {
        self.roll(Granularity::Day)
    }

    /// Rolls `granularity` on every counter. Returns how many were rolled.
    pub fn roll(&self, granularity: Granularity) -> usize {
        self.shared.sweep_all(granularity)
    }

    fn create(&self, parent: Option<&Arc<Counter<K>>>, key: K) -> Arc<Counter<K>> {
        let shared = &self.shared;
        let counter = Arc::new(shared.factory.create_counter(parent, key, &shared.config));
        tracing::debug!(
            has_parent = parent.is_some(),
            recursive = counter.recursive_increments(),
            "counter created"
        );
        counter
    }

    fn snapshot(&self) -> Vec<Arc<Counter<K>>> {
        self.shared
            .counters
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }
}

impl<K> fmt::Debug for Registry<K>
where
    K: Eq + Hash,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("counters", &self.shared.counters.len())
            .field("config", &self.shared.config)
            .field("scheduler", &self.scheduler)
            .finish()
    }
}
