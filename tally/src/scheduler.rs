//! Background roll scheduler.
//!
//! A [`Scheduler`] owns one thread that fires periodic sweeps: every
//! `second`, `minute`, `hour` and (optionally) `day` cadence it asks its
//! [`Sweeper`] to roll that granularity across all counters.
//!
//! # Design
//!
//! - One thread per scheduler, so sweeps of the same granularity never overlap
//! - Fixed-rate deadlines measured from start; a late wake-up catches up
//! - When several cadences are due at once they run finest first
//! - `stop` wakes the thread immediately; an in-flight sweep finishes first
//! - A panicking sweep is logged and the schedule keeps going
//!
//! The thread is created through a [`ThreadFactory`], so callers decide how
//! it is named, sized or instrumented.

use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Weak;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::config::{DayReset, SchedulerConfig};
use crate::counter::Granularity;
use crate::error::{Result, SchedulerError};

/// A task handed to a [`ThreadFactory`].
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Creates the thread a [`Scheduler`] runs on.
///
/// Implemented for closures of the matching shape, so a one-off factory can
/// be written inline.
pub trait ThreadFactory: Send + Sync {
    /// Spawns a thread running `task`.
    ///
    /// # Errors
    ///
    /// Returns the I/O error reported by the operating system if the thread
    /// cannot be created.
    fn spawn(&self, task: Task) -> io::Result<JoinHandle<()>>;
}

impl<F> ThreadFactory for F
where
    F: Fn(Task) -> io::Result<JoinHandle<()>> + Send + Sync,
{
    fn spawn(&self, task: Task) -> io::Result<JoinHandle<()>> {
        self(task)
    }
}

/// Spawns plain named threads. This is the default factory.
#[derive(Debug, Clone)]
pub struct NamedThreadFactory {
    name: String,
}

impl NamedThreadFactory {
    /// Creates a factory that names its threads `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl ThreadFactory for NamedThreadFactory {
    fn spawn(&self, task: Task) -> io::Result<JoinHandle<()>> {
        thread::Builder::new().name(self.name.clone()).spawn(task)
    }
}

/// The work a scheduler drives on each tick.
pub trait Sweeper: Send + Sync {
    /// Rolls `granularity` on every tracked counter, returning how many were
    /// rolled.
    fn sweep(&self, granularity: Granularity) -> usize;
}

/// Periodic driver of [`Sweeper::sweep`].
///
/// Dropping a scheduler stops it.
pub struct Scheduler {
    config: SchedulerConfig,
    factory: Box<dyn ThreadFactory>,
    running: Mutex<Option<Running>>,
}

/// Handles to a started scheduler thread.
struct Running {
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

impl Scheduler {
    /// Creates a stopped scheduler.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`](crate::error::ConfigError) if `config` is
    /// invalid.
    pub fn new(config: SchedulerConfig, factory: Box<dyn ThreadFactory>) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            config,
            factory,
            running: Mutex::new(None),
        })
    }

    /// Returns the cadences this scheduler runs with.
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Starts the scheduler thread.
    ///
    /// The sweeper is held weakly: once it is dropped the thread exits on its
    /// next tick.
    ///
    /// # Errors
    ///
    /// - [`SchedulerError::AlreadyRunning`] if the thread is already running
    /// - [`SchedulerError::Spawn`] if the thread factory fails
    pub fn start(&self, sweeper: Weak<dyn Sweeper>) -> Result<()> {
        let mut running = self.running.lock();
        if running.is_some() {
            return Err(SchedulerError::AlreadyRunning.into());
        }

        let (stop, stopped) = mpsc::channel();
        let cadences = cadences(&self.config);

        let handle = self
            .factory
            .spawn(Box::new(move || run(&cadences, &sweeper, &stopped)))
            .map_err(|e| SchedulerError::Spawn { source: e })?;

        tracing::info!(thread = %self.config.thread_name, "scheduler started");
        *running = Some(Running { stop, handle });
        Ok(())
    }

    /// Stops the scheduler thread and waits for it to exit.
    ///
    /// Does nothing if the scheduler is not running.
    pub fn stop(&self) {
        let Some(Running { stop, handle }) = self.running.lock().take() else {
            return;
        };

        // The thread may already be gone if its sweeper was dropped.
        let _ = stop.send(());
        if handle.join().is_err() {
            tracing::warn!("scheduler thread panicked");
        }

        tracing::info!(thread = %self.config.thread_name, "scheduler stopped");
    }

    /// Returns `true` while the scheduler thread is running.
    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("config", &self.config)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

/// Lists the enabled cadences, finest first.
fn cadences(config: &SchedulerConfig) -> Vec<(Granularity, Duration)> {
    let mut cadences = vec![
        (Granularity::Second, config.second),
        (Granularity::Minute, config.minute),
        (Granularity::Hour, config.hour),
    ];
    if let DayReset::Every(day) = config.day {
        cadences.push((Granularity::Day, day));
    }
    cadences
}

/// Scheduler thread body.
fn run(
    cadences: &[(Granularity, Duration)],
    sweeper: &Weak<dyn Sweeper>,
    stopped: &mpsc::Receiver<()>,
) {
    let start = Instant::now();
    let mut deadlines: Vec<_> = cadences
        .iter()
        .map(|&(granularity, every)| (granularity, every, start + every))
        .collect();

    loop {
        let Some(next) = deadlines.iter().map(|&(_, _, due)| due).min() else {
            return;
        };

        match stopped.recv_timeout(next.saturating_duration_since(Instant::now())) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
        }

        let Some(sweeper) = sweeper.upgrade() else {
            tracing::debug!("sweeper dropped, scheduler exiting");
            return;
        };

        let now = Instant::now();
        for (granularity, every, due) in &mut deadlines {
            if *due > now {
                continue;
            }
            *due += *every;

            let granularity = *granularity;
            match panic::catch_unwind(AssertUnwindSafe(|| sweeper.sweep(granularity))) {
                Ok(rolled) => tracing::trace!(%granularity, rolled, "tick"),
                Err(_) => tracing::warn!(%granularity, "sweep panicked, continuing schedule"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TallyError;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Records every sweep it is asked to run.
    #[derive(Default)]
    struct Recorder {
        sweeps: Mutex<Vec<Granularity>>,
        panic_on_first: AtomicBool,
    }

    impl Sweeper for Recorder {
        fn sweep(&self, granularity: Granularity) -> usize {
            if self.panic_on_first.swap(false, Ordering::SeqCst) {
                panic!("first sweep fails");
            }
            self.sweeps.lock().push(granularity);
            1
        }
    }

    fn fast_config() -> SchedulerConfig {
        SchedulerConfig {
            thread_name: "tally-test".to_string(),
            second: Duration::from_millis(10),
            minute: Duration::from_millis(30),
            hour: Duration::from_millis(90),
            day: DayReset::Never,
        }
    }

    fn scheduler(config: SchedulerConfig) -> Scheduler {
        Scheduler::new(config.clone(), Box::new(NamedThreadFactory::new(config.thread_name)))
            .unwrap()
    }

    fn as_sweeper(recorder: &Arc<Recorder>) -> Weak<dyn Sweeper> {
        let weak: Weak<Recorder> = Arc::downgrade(recorder);
        weak
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = SchedulerConfig {
            second: Duration::ZERO,
            ..fast_config()
        };

        let result = Scheduler::new(config, Box::new(NamedThreadFactory::new("x")));
        assert!(matches!(result, Err(TallyError::Config(_))));
    }

    #[test]
    fn test_sweeps_run_finest_first() {
        let recorder = Arc::new(Recorder::default());
        let scheduler = scheduler(fast_config());

        scheduler.start(as_sweeper(&recorder)).unwrap();
        thread::sleep(Duration::from_millis(250));
        scheduler.stop();

        let sweeps = recorder.sweeps.lock().clone();
        let seconds = sweeps.iter().filter(|&&g| g == Granularity::Second).count();
        let minutes = sweeps.iter().filter(|&&g| g == Granularity::Minute).count();
        let hours = sweeps.iter().filter(|&&g| g == Granularity::Hour).count();

        assert!(hours >= 1, "expected at least one hour sweep in {sweeps:?}");
        assert!(seconds >= minutes && minutes >= hours);
        assert!(!sweeps.contains(&Granularity::Day));

        // Seconds fall due before the first minute, and run first when they coincide
        let first_minute = sweeps.iter().position(|&g| g == Granularity::Minute).unwrap();
        assert_eq!(sweeps[0], Granularity::Second);
        assert!(first_minute >= 2, "minute swept too early in {sweeps:?}");
    }

    #[test]
    fn test_stop_halts_sweeps() {
        let recorder = Arc::new(Recorder::default());
        let scheduler = scheduler(fast_config());

        scheduler.start(as_sweeper(&recorder)).unwrap();
        assert!(scheduler.is_running());
        thread::sleep(Duration::from_millis(50));
        scheduler.stop();
        assert!(!scheduler.is_running());

        let after_stop = recorder.sweeps.lock().len();
        thread::sleep(Duration::from_millis(50));
        assert_eq!(recorder.sweeps.lock().len(), after_stop);

        // Stopping twice is harmless
        scheduler.stop();
    }

    #[test]
    fn test_restart_after_stop() {
        let recorder = Arc::new(Recorder::default());
        let scheduler = scheduler(fast_config());

        scheduler.start(as_sweeper(&recorder)).unwrap();
        scheduler.stop();
        scheduler.start(as_sweeper(&recorder)).unwrap();
        assert!(scheduler.is_running());
    }

    #[test]
    fn test_double_start_rejected() {
        let recorder = Arc::new(Recorder::default());
        let scheduler = scheduler(fast_config());

        scheduler.start(as_sweeper(&recorder)).unwrap();
        let err = scheduler.start(as_sweeper(&recorder)).unwrap_err();

        assert!(matches!(
            err,
            TallyError::Scheduler(SchedulerError::AlreadyRunning)
        ));
    }

    #[test]
    fn test_panicking_sweep_does_not_stop_schedule() {
        let recorder = Arc::new(Recorder::default());
        recorder.panic_on_first.store(true, Ordering::SeqCst);
        let scheduler = scheduler(fast_config());

        scheduler.start(as_sweeper(&recorder)).unwrap();
        thread::sleep(Duration::from_millis(100));
        scheduler.stop();

        assert!(!recorder.sweeps.lock().is_empty());
    }

    #[test]
    fn test_dropped_sweeper_ends_thread() {
        let recorder = Arc::new(Recorder::default());
        let scheduler = scheduler(fast_config());

        scheduler.start(as_sweeper(&recorder)).unwrap();
        drop(recorder);
        thread::sleep(Duration::from_millis(50));

        // Still reported running until stopped; stop joins the exited thread
        scheduler.stop();
        assert!(!scheduler.is_running());
    }

    #[test]
    fn test_closure_thread_factory() {
        let used = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&used);
        let factory = move |task: Task| {
            flag.store(true, Ordering::SeqCst);
            thread::Builder::new().name("custom".to_string()).spawn(task)
        };

        let recorder = Arc::new(Recorder::default());
        let scheduler = Scheduler::new(fast_config(), Box::new(factory)).unwrap();
        scheduler.start(as_sweeper(&recorder)).unwrap();

        assert!(used.load(Ordering::SeqCst));
    }

    #[test]
    fn test_spawn_failure_reported() {
        let factory = |_task: Task| -> io::Result<JoinHandle<()>> {
            Err(io::Error::other("no threads left"))
        };

        let recorder = Arc::new(Recorder::default());
        let scheduler = Scheduler::new(fast_config(), Box::new(factory)).unwrap();
        let err = scheduler.start(as_sweeper(&recorder)).unwrap_err();

        assert!(matches!(
            err,
            TallyError::Scheduler(SchedulerError::Spawn { .. })
        ));
        assert!(!scheduler.is_running());
    }
}
