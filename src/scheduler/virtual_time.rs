use std::{
  cmp::{Ordering, Reverse},
  collections::BinaryHeap,
  time::Duration,
};

use parking_lot::Mutex;

use super::{Clock, ControllableClock, PeriodicTask, Scheduler, Task, TaskHandle};

/// Scheduler whose clock only advances when a controller says so.
///
/// Tasks are kept in one min-heap ordered by deadline, then by registration
/// order. Work due "now" runs immediately on the calling thread unless the
/// scheduler is already running tasks, in which case it is queued and the
/// running loop picks it up. Nothing ever runs on another thread, so a test
/// driving a pipeline through this scheduler is fully deterministic.
///
/// ```rust
/// use std::sync::{
///   atomic::{AtomicUsize, Ordering},
///   Arc,
/// };
///
/// use rxflux::scheduler::{ControllableClock, Duration, Scheduler, VirtualTimeScheduler};
///
/// let vts = VirtualTimeScheduler::new();
/// let fired = Arc::new(AtomicUsize::new(0));
/// let counter = fired.clone();
/// vts.schedule_after(
///   Duration::from_secs(3600),
///   Box::new(move || {
///     counter.fetch_add(1, Ordering::SeqCst);
///   }),
/// );
///
/// vts.advance_by(Duration::from_secs(3599));
/// assert_eq!(fired.load(Ordering::SeqCst), 0);
/// vts.advance_by(Duration::from_secs(1));
/// assert_eq!(fired.load(Ordering::SeqCst), 1);
/// ```
#[derive(Default)]
pub struct VirtualTimeScheduler {
  state: Mutex<VirtualState>,
}

#[derive(Default)]
struct VirtualState {
  now: Duration,
  target: Duration,
  queue: BinaryHeap<ScheduledTask>,
  next_task_id: usize,
  draining: bool,
}

enum Work {
  Once(Task),
  Periodic { period: Duration, task: PeriodicTask },
}

struct ScheduledTask {
  deadline: Duration,
  task_id: usize,
  work: Work,
  handle: TaskHandle,
}

impl PartialEq for ScheduledTask {
  fn eq(&self, other: &Self) -> bool {
    self.deadline == other.deadline && self.task_id == other.task_id
  }
}

impl Eq for ScheduledTask {}

impl PartialOrd for ScheduledTask {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> { Some(self.cmp(other)) }
}

impl Ord for ScheduledTask {
  /// `BinaryHeap` pops its greatest entry, so the soonest deadline ranks
  /// highest and equal deadlines go in registration order.
  fn cmp(&self, other: &Self) -> Ordering {
    let rank = |t: &Self| (Reverse(t.deadline), Reverse(t.task_id));
    rank(self).cmp(&rank(other))
  }
}

impl VirtualTimeScheduler {
  pub fn new() -> Self { Self::default() }

  /// Number of tasks still waiting, cancelled ones excluded.
  pub fn pending_count(&self) -> usize {
    self.state.lock().queue.iter().filter(|t| !t.handle.is_closed()).count()
  }

  pub fn is_idle(&self) -> bool { self.pending_count() == 0 }

  /// Run every task, advancing the clock to each deadline in turn.
  ///
  /// Periodic tasks would keep this from ever returning, so they are left
  /// in the queue once nothing else is due.
  pub fn flush(&self) {
    loop {
      let next = {
        let state = self.state.lock();
        state
          .queue
          .iter()
          .filter(|t| !t.handle.is_closed() && matches!(t.work, Work::Once(_)))
          .map(|t| t.deadline)
          .min()
      };
      match next {
        Some(deadline) => self.advance_to(deadline),
        None => break,
      }
    }
  }

  fn enqueue(&self, delay: Duration, work: Work) -> TaskHandle {
    let handle = TaskHandle::new();
    let now = {
      let mut state = self.state.lock();
      let task_id = state.next_task_id;
      state.next_task_id += 1;
      let deadline = state.now + delay;
      state.queue.push(ScheduledTask { deadline, task_id, work, handle: handle.clone() });
      state.now
    };
    self.advance_to(now);
    handle
  }

  fn pop_due(&self) -> Option<ScheduledTask> {
    let mut state = self.state.lock();
    loop {
      let due = state.queue.peek().is_some_and(|t| t.deadline <= state.target);
      if !due {
        state.now = state.now.max(state.target);
        state.draining = false;
        return None;
      }
      if let Some(task) = state.queue.pop() {
        if task.handle.is_closed() {
          continue;
        }
        state.now = state.now.max(task.deadline);
        return Some(task);
      }
    }
  }

  fn run(&self, task: ScheduledTask) {
    let ScheduledTask { deadline, work, handle, .. } = task;
    match work {
      Work::Once(task) => {
        task();
        handle.mark_finished();
      }
      Work::Periodic { period, mut task } => {
        task();
        if handle.is_closed() {
          return;
        }
        let mut state = self.state.lock();
        let task_id = state.next_task_id;
        state.next_task_id += 1;
        state.queue.push(ScheduledTask {
          deadline: deadline + period,
          task_id,
          work: Work::Periodic { period, task },
          handle,
        });
      }
    }
  }
}

impl Clock for VirtualTimeScheduler {
  fn now(&self) -> Duration { self.state.lock().now }
}

impl ControllableClock for VirtualTimeScheduler {
  fn advance_to(&self, instant: Duration) {
    {
      let mut state = self.state.lock();
      state.target = state.target.max(instant);
      if state.draining {
        return;
      }
      state.draining = true;
    }
    while let Some(task) = self.pop_due() {
      self.run(task);
    }
  }
}

impl Scheduler for VirtualTimeScheduler {
  fn name(&self) -> &str { "virtual-time" }

  fn schedule(&self, task: Task) -> TaskHandle { self.enqueue(Duration::ZERO, Work::Once(task)) }

  fn schedule_after(&self, delay: Duration, task: Task) -> TaskHandle {
    self.enqueue(delay, Work::Once(task))
  }

  fn schedule_periodic(
    &self, initial: Duration, period: Duration, task: PeriodicTask,
  ) -> TaskHandle {
    // A zero period would spin forever inside a single advance.
    let period = period.max(Duration::from_nanos(1));
    self.enqueue(initial, Work::Periodic { period, task })
  }
}

impl std::fmt::Debug for VirtualTimeScheduler {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let state = self.state.lock();
    f.debug_struct("VirtualTimeScheduler")
      .field("now", &state.now)
      .field("pending", &state.queue.len())
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use super::*;

  fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&str) -> Task) {
    let log = Arc::new(Mutex::new(vec![]));
    let log2 = log.clone();
    let make = move |label: &str| -> Task {
      let log = log2.clone();
      let label = label.to_owned();
      Box::new(move || log.lock().push(label))
    };
    (log, make)
  }

  #[test]
  fn immediate_tasks_run_inline() {
    let vts = VirtualTimeScheduler::new();
    let (log, task) = recorder();
    vts.schedule(task("now"));
    assert_eq!(*log.lock(), vec!["now"]);
    assert_eq!(vts.now(), Duration::ZERO);
  }

  #[test]
  fn deadline_order_with_fifo_ties() {
    let vts = VirtualTimeScheduler::new();
    let (log, task) = recorder();
    vts.schedule_after(Duration::from_millis(20), task("c"));
    vts.schedule_after(Duration::from_millis(10), task("a"));
    vts.schedule_after(Duration::from_millis(10), task("b"));

    vts.advance_by(Duration::from_millis(9));
    assert!(log.lock().is_empty());
    vts.advance_by(Duration::from_millis(1));
    assert_eq!(*log.lock(), vec!["a", "b"]);
    vts.advance_by(Duration::from_millis(10));
    assert_eq!(*log.lock(), vec!["a", "b", "c"]);
    assert_eq!(vts.now(), Duration::from_millis(20));
  }

  #[test]
  fn clock_reads_deadline_inside_task() {
    let vts = Arc::new(VirtualTimeScheduler::new());
    let seen = Arc::new(Mutex::new(None));
    let (v, s) = (vts.clone(), seen.clone());
    vts.schedule_after(Duration::from_secs(5), Box::new(move || *s.lock() = Some(v.now())));
    vts.advance_by(Duration::from_secs(60));
    assert_eq!(*seen.lock(), Some(Duration::from_secs(5)));
    assert_eq!(vts.now(), Duration::from_secs(60));
  }

  #[test]
  fn nested_schedule_runs_in_same_advance() {
    let vts = Arc::new(VirtualTimeScheduler::new());
    let (log, task) = recorder();
    let inner = task("inner");
    let outer_log = log.clone();
    let v = vts.clone();
    vts.schedule_after(
      Duration::from_secs(1),
      Box::new(move || {
        outer_log.lock().push("outer".to_owned());
        v.schedule(inner);
      }),
    );
    vts.advance_by(Duration::from_secs(1));
    assert_eq!(*log.lock(), vec!["outer", "inner"]);
  }

  #[test]
  fn periodic_and_cancel() {
    let vts = VirtualTimeScheduler::new();
    let ticks = Arc::new(Mutex::new(0));
    let t = ticks.clone();
    let handle = vts.schedule_periodic(
      Duration::from_secs(1),
      Duration::from_secs(1),
      Box::new(move || *t.lock() += 1),
    );
    vts.advance_by(Duration::from_millis(3500));
    assert_eq!(*ticks.lock(), 3);
    handle.cancel();
    vts.advance_by(Duration::from_secs(10));
    assert_eq!(*ticks.lock(), 3);
    assert!(vts.is_idle());
  }

  #[test]
  fn flush_runs_one_shot_work() {
    let vts = VirtualTimeScheduler::new();
    let (log, task) = recorder();
    vts.schedule_after(Duration::from_secs(30), task("late"));
    vts.schedule_after(Duration::from_secs(3), task("early"));
    vts.flush();
    assert_eq!(*log.lock(), vec!["early", "late"]);
    assert_eq!(vts.now(), Duration::from_secs(30));
  }
}
