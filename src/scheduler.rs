//! Schedulers: where work runs and how time is read.
//!
//! A [`Scheduler`] accepts units of work (immediate, delayed or periodic) and
//! returns a [`TaskHandle`] that can cancel them. Every scheduler is also a
//! [`Clock`]; the virtual-time implementation additionally exposes a
//! [`ControllableClock`] so tests can drive timers without real delay.
//!
//! Two implementations ship with the crate:
//!
//! - [`PoolScheduler`]: tokio-backed worker pool with a declared
//!   [`SchedulerPolicy`](crate::config::SchedulerPolicy), built from a
//!   [`SchedulerConfig`](crate::config::SchedulerConfig).
//! - [`VirtualTimeScheduler`]: deterministic single-queue scheduler whose
//!   clock only moves when told to.

use std::sync::{
  atomic::{AtomicBool, Ordering},
  Arc,
};

pub use std::time::Duration;

use parking_lot::Mutex;

mod pool;
mod virtual_time;

pub use pool::PoolScheduler;
pub use virtual_time::VirtualTimeScheduler;

/// One-shot unit of work.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Repeating unit of work for [`Scheduler::schedule_periodic`].
pub type PeriodicTask = Box<dyn FnMut() + Send + 'static>;

// ============================================================================
// Clock traits
// ============================================================================

/// Source of "now", measured from the clock's own origin.
pub trait Clock: Send + Sync {
  fn now(&self) -> Duration;
}

/// A clock whose time is moved by an external controller.
///
/// Advancing runs every task due at or before the new time, in deadline
/// order; tasks with equal deadlines run in registration order.
pub trait ControllableClock: Clock {
  fn advance_by(&self, duration: Duration) { self.advance_to(self.now() + duration) }

  fn advance_to(&self, instant: Duration);
}

// ============================================================================
// Scheduler trait
// ============================================================================

pub trait Scheduler: Clock {
  /// Human-readable name, used in logs and thread names.
  fn name(&self) -> &str;

  /// Run `task` as soon as a worker is free.
  fn schedule(&self, task: Task) -> TaskHandle;

  /// Run `task` once `delay` has elapsed on this scheduler's clock.
  fn schedule_after(&self, delay: Duration, task: Task) -> TaskHandle;

  /// Run `task` after `initial`, then every `period` until cancelled.
  fn schedule_periodic(&self, initial: Duration, period: Duration, task: PeriodicTask)
    -> TaskHandle;
}

/// Shared scheduler reference handed to operators.
pub type SchedulerRef = Arc<dyn Scheduler>;

// ============================================================================
// TaskHandle
// ============================================================================

/// Handle to scheduled work.
///
/// Cancelling prevents a pending task from starting; a task already running
/// finishes, and the operators check their own cancellation flags before
/// delivering anything it produced.
#[derive(Clone, Default)]
pub struct TaskHandle(Arc<TaskState>);

#[derive(Default)]
struct TaskState {
  cancelled: AtomicBool,
  finished: AtomicBool,
  abort: Mutex<Option<tokio::task::AbortHandle>>,
}

impl TaskHandle {
  pub fn new() -> Self { Self::default() }

  /// A handle for work that already completed (or was never accepted).
  pub fn finished() -> Self {
    let handle = Self::new();
    handle.mark_finished();
    handle
  }

  pub fn mark_finished(&self) { self.0.finished.store(true, Ordering::Release); }

  pub fn is_finished(&self) -> bool { self.0.finished.load(Ordering::Acquire) }

  pub fn is_cancelled(&self) -> bool { self.0.cancelled.load(Ordering::Acquire) }

  /// Finished or cancelled.
  pub fn is_closed(&self) -> bool { self.is_finished() || self.is_cancelled() }

  pub fn cancel(&self) {
    if self.0.cancelled.swap(true, Ordering::AcqRel) {
      return;
    }
    if let Some(abort) = self.0.abort.lock().take() {
      abort.abort();
    }
  }

  /// Attach the runtime task so cancellation also stops a pending sleep.
  pub(crate) fn set_abort(&self, abort: tokio::task::AbortHandle) {
    let mut slot = self.0.abort.lock();
    if self.is_cancelled() {
      abort.abort();
    } else {
      *slot = Some(abort);
    }
  }
}

impl std::fmt::Debug for TaskHandle {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("TaskHandle")
      .field("cancelled", &self.is_cancelled())
      .field("finished", &self.is_finished())
      .finish()
  }
}
