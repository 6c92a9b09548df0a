use std::sync::{
  atomic::{AtomicBool, Ordering},
  Arc,
};

use parking_lot::Mutex;

use crate::{
  error::{FluxError, ProtocolError},
  publisher::Publisher,
  scheduler::{Duration, SchedulerRef, TaskHandle},
  signal::Signal,
  subscriber::Subscriber,
  subscription::{Demand, Subscription},
};

/// Emits `0, 1, 2, ...` every `period` on `scheduler`, starting one period
/// after subscription.
///
/// Ticks are never buffered: a tick that finds no outstanding demand ends
/// the stream with [`FluxError::Overflow`]. Bound the sequence with `take`
/// or cancel the subscription to stop it.
pub fn interval(period: Duration, scheduler: SchedulerRef) -> Interval {
  Interval { initial: period, period, scheduler }
}

/// [`interval`] with a custom delay before the first tick.
pub fn interval_with_delay(initial: Duration, period: Duration, scheduler: SchedulerRef) -> Interval {
  Interval { initial, period, scheduler }
}

#[derive(Clone)]
pub struct Interval {
  initial: Duration,
  period: Duration,
  scheduler: SchedulerRef,
}

impl Publisher for Interval {
  type Item = u64;
  type Err = FluxError;

  fn actual_subscribe<S>(&self, mut subscriber: S)
  where
    S: Subscriber<u64, FluxError> + 'static,
  {
    let core = Arc::new(IntervalCore {
      demand: Demand::new(),
      cancelled: AtomicBool::new(false),
      task: Mutex::new(None),
      subscriber: Mutex::new(None),
    });
    subscriber.on_subscribe(core.clone());
    if core.cancelled.load(Ordering::Acquire) {
      return;
    }
    *core.subscriber.lock() = Some(subscriber);

    let ticker = core.clone();
    let mut count = 0;
    let handle = self.scheduler.schedule_periodic(
      self.initial,
      self.period,
      Box::new(move || ticker.tick(&mut count)),
    );
    let mut task = core.task.lock();
    if core.cancelled.load(Ordering::Acquire) {
      handle.cancel();
    } else {
      *task = Some(handle);
    }
  }
}

struct IntervalCore<S> {
  demand: Demand,
  cancelled: AtomicBool,
  task: Mutex<Option<TaskHandle>>,
  subscriber: Mutex<Option<S>>,
}

impl<S> IntervalCore<S>
where
  S: Subscriber<u64, FluxError>,
{
  fn tick(&self, count: &mut u64) {
    if self.cancelled.load(Ordering::Acquire) {
      return;
    }
    let mut slot = self.subscriber.lock();
    let Some(subscriber) = slot.as_mut() else {
      return;
    };
    if self.demand.get() > 0 {
      self.demand.produced(1);
      subscriber.on_signal(Signal::Next(*count));
      *count += 1;
      if self.cancelled.load(Ordering::Acquire) {
        slot.take();
      }
    } else {
      // Also seen by `actual_subscribe` when this tick runs before the task
      // handle was stored.
      self.cancelled.store(true, Ordering::Release);
      let subscriber = slot.take();
      drop(slot);
      self.stop();
      if let Some(mut subscriber) = subscriber {
        tracing::debug!(tick = *count, "interval tick found no demand");
        subscriber.on_signal(Signal::Error(FluxError::Overflow { tick: *count }));
      }
    }
  }

  fn stop(&self) {
    if let Some(task) = self.task.lock().take() {
      task.cancel();
    }
  }
}

impl<S> Subscription for IntervalCore<S>
where
  S: Subscriber<u64, FluxError>,
{
  fn request(&self, n: u64) -> Result<(), ProtocolError> { self.demand.request(n).map(|_| ()) }

  fn cancel(&self) {
    if self.cancelled.swap(true, Ordering::AcqRel) {
      return;
    }
    self.stop();
    // A tick in progress (possibly the caller) releases the subscriber itself.
    if let Some(mut slot) = self.subscriber.try_lock() {
      slot.take();
    }
  }
}
