use std::{
  sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
  },
  time::{Duration, Instant},
};

use parking_lot::Mutex;
use tokio::{
  runtime::{Builder, Handle, Runtime},
  time::MissedTickBehavior,
};

use super::{Clock, PeriodicTask, Scheduler, Task, TaskHandle};
use crate::{
  config::{SchedulerConfig, SchedulerPolicy},
  error::SchedulerError,
};

/// Worker pool backed by a dedicated tokio runtime.
///
/// - `SingleWorker` and `FixedPool` run tasks on the runtime's worker
///   threads.
/// - `GrowablePool` keeps one worker for timers and hands every task to the
///   blocking pool, which grows up to `max_workers` threads and retires idle
///   ones after the keep-alive period.
///
/// Dropping the scheduler (or calling [`dispose`](Self::dispose)) shuts the
/// runtime down without waiting; tasks scheduled afterwards are rejected
/// with a warning.
pub struct PoolScheduler {
  name: String,
  policy: SchedulerPolicy,
  handle: Handle,
  runtime: Mutex<Option<Runtime>>,
  origin: Instant,
  disposed: AtomicBool,
}

impl PoolScheduler {
  pub fn new(config: SchedulerConfig) -> Result<Self, SchedulerError> {
    let name = config.name().to_owned();
    let policy = config.policy();

    let mut builder = Builder::new_multi_thread();
    let prefix = name.clone();
    let counter = Arc::new(AtomicUsize::new(0));
    builder
      .thread_name_fn(move || format!("{}-{}", prefix, counter.fetch_add(1, Ordering::Relaxed) + 1))
      .thread_keep_alive(config.keep_alive_duration())
      .enable_time();
    match policy {
      SchedulerPolicy::SingleWorker => builder.worker_threads(1),
      SchedulerPolicy::FixedPool { workers } => builder.worker_threads(workers.max(1)),
      SchedulerPolicy::GrowablePool { max_workers } => {
        builder.worker_threads(1).max_blocking_threads(max_workers.max(1))
      }
    };

    let runtime =
      builder.build().map_err(|source| SchedulerError::Build { name: name.clone(), source })?;
    tracing::debug!(scheduler = %name, ?policy, "worker pool started");
    Ok(Self {
      name,
      policy,
      handle: runtime.handle().clone(),
      runtime: Mutex::new(Some(runtime)),
      origin: Instant::now(),
      disposed: AtomicBool::new(false),
    })
  }

  pub fn policy(&self) -> SchedulerPolicy { self.policy }

  pub fn is_disposed(&self) -> bool { self.disposed.load(Ordering::Acquire) }

  /// Stop accepting work and shut the workers down in the background.
  pub fn dispose(&self) {
    if self.disposed.swap(true, Ordering::AcqRel) {
      return;
    }
    if let Some(runtime) = self.runtime.lock().take() {
      runtime.shutdown_background();
    }
    tracing::debug!(scheduler = %self.name, "worker pool disposed");
  }

  fn rejected(&self) -> TaskHandle {
    tracing::warn!(scheduler = %self.name, "task rejected by a disposed scheduler");
    TaskHandle::finished()
  }

  fn spawn(&self, delay: Option<Duration>, task: Task) -> TaskHandle {
    if self.is_disposed() {
      return self.rejected();
    }
    let handle = TaskHandle::new();
    let guard = handle.clone();
    let blocking = matches!(self.policy, SchedulerPolicy::GrowablePool { .. });
    let join = self.handle.spawn(async move {
      if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
      }
      if guard.is_closed() {
        return;
      }
      if blocking {
        let worker = guard.clone();
        let _ = tokio::task::spawn_blocking(move || {
          if !worker.is_closed() {
            task();
            worker.mark_finished();
          }
        })
        .await;
      } else {
        task();
        guard.mark_finished();
      }
    });
    handle.set_abort(join.abort_handle());
    handle
  }
}

impl Clock for PoolScheduler {
  fn now(&self) -> Duration { self.origin.elapsed() }
}

impl Scheduler for PoolScheduler {
  fn name(&self) -> &str { &self.name }

  fn schedule(&self, task: Task) -> TaskHandle { self.spawn(None, task) }

  fn schedule_after(&self, delay: Duration, task: Task) -> TaskHandle {
    self.spawn(Some(delay), task)
  }

  fn schedule_periodic(
    &self, initial: Duration, period: Duration, mut task: PeriodicTask,
  ) -> TaskHandle {
    if self.is_disposed() {
      return self.rejected();
    }
    let handle = TaskHandle::new();
    let guard = handle.clone();
    // tokio rejects a zero period.
    let period = period.max(Duration::from_nanos(1));
    let join = self.handle.spawn(async move {
      let start = tokio::time::Instant::now() + initial;
      let mut ticker = tokio::time::interval_at(start, period);
      ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
      loop {
        ticker.tick().await;
        if guard.is_closed() {
          break;
        }
        task();
      }
    });
    handle.set_abort(join.abort_handle());
    handle
  }
}

impl Drop for PoolScheduler {
  fn drop(&mut self) { self.dispose() }
}

impl std::fmt::Debug for PoolScheduler {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("PoolScheduler")
      .field("name", &self.name)
      .field("policy", &self.policy)
      .field("disposed", &self.is_disposed())
      .finish()
  }
}
