//! Scheduler configuration and buffer-size defaults.
//!
//! There are no process-wide schedulers. An application builds each pool it
//! needs once, from a [`SchedulerConfig`], and passes the resulting
//! [`SchedulerRef`](crate::scheduler::SchedulerRef) to the operators that
//! hop onto it.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use rxflux::{config::SchedulerConfig, scheduler::Duration};
//!
//! let io = SchedulerConfig::growable("io", 64)
//!   .keep_alive(Duration::from_secs(30))
//!   .build()
//!   .map(Arc::new)?;
//! # Ok::<(), rxflux::error::SchedulerError>(())
//! ```

use std::{num::NonZeroUsize, thread, time::Duration};

use crate::{error::SchedulerError, scheduler::PoolScheduler};

/// Default prefetch of queue-backed operators (`publish_on`, `publish`) and
/// default `flat_map` concurrency.
pub const SMALL_BUFFER_SIZE: usize = 256;

/// Default prefetch of each `flat_map` inner source.
pub const XS_BUFFER_SIZE: usize = 32;

/// Growable pools may reach this many workers per available core.
pub const GROWABLE_CAP_FACTOR: usize = 10;

pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(60);

/// How many elements a prefetching operator consumes before it requests more.
#[inline]
pub fn replenish_threshold(prefetch: usize) -> usize {
  if prefetch == usize::MAX {
    prefetch
  } else {
    (prefetch - (prefetch >> 2)).max(1)
  }
}

/// Worker layout of a [`PoolScheduler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerPolicy {
  /// Exactly one worker; tasks run one after another.
  SingleWorker,
  /// A fixed number of always-alive workers.
  FixedPool { workers: usize },
  /// Workers are created on demand up to `max_workers` and retired after the
  /// keep-alive period. Suited to blocking tasks.
  GrowablePool { max_workers: usize },
}

impl SchedulerPolicy {
  /// Upper bound on concurrently running tasks.
  pub fn max_workers(&self) -> usize {
    match *self {
      SchedulerPolicy::SingleWorker => 1,
      SchedulerPolicy::FixedPool { workers } => workers,
      SchedulerPolicy::GrowablePool { max_workers } => max_workers,
    }
  }
}

/// Builder for [`PoolScheduler`].
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
  name: String,
  policy: SchedulerPolicy,
  keep_alive: Duration,
}

impl SchedulerConfig {
  pub fn new(name: impl Into<String>, policy: SchedulerPolicy) -> Self {
    Self { name: name.into(), policy, keep_alive: DEFAULT_KEEP_ALIVE }
  }

  pub fn single(name: impl Into<String>) -> Self { Self::new(name, SchedulerPolicy::SingleWorker) }

  /// A fixed pool; `workers == 0` means one worker per available core.
  pub fn fixed(name: impl Into<String>, workers: usize) -> Self {
    let workers = if workers == 0 { available_parallelism() } else { workers };
    Self::new(name, SchedulerPolicy::FixedPool { workers })
  }

  /// A growable pool; `max_workers == 0` means the default cap.
  pub fn growable(name: impl Into<String>, max_workers: usize) -> Self {
    let max_workers = if max_workers == 0 {
      available_parallelism() * GROWABLE_CAP_FACTOR
    } else {
      max_workers
    };
    Self::new(name, SchedulerPolicy::GrowablePool { max_workers })
  }

  /// How long an idle growable worker lingers before it is retired.
  pub fn keep_alive(mut self, keep_alive: Duration) -> Self {
    self.keep_alive = keep_alive;
    self
  }

  pub fn name(&self) -> &str { &self.name }

  pub fn policy(&self) -> SchedulerPolicy { self.policy }

  pub fn keep_alive_duration(&self) -> Duration { self.keep_alive }

  pub fn build(self) -> Result<PoolScheduler, SchedulerError> { PoolScheduler::new(self) }
}

pub fn available_parallelism() -> usize {
  thread::available_parallelism().map(NonZeroUsize::get).unwrap_or(1)
}
