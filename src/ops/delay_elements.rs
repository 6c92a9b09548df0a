use std::sync::{
  atomic::{AtomicBool, Ordering},
  Arc,
};

use once_cell::sync::OnceCell;
use parking_lot::Mutex;

use crate::{
  error::ProtocolError,
  publisher::Publisher,
  scheduler::{Duration, SchedulerRef, TaskHandle},
  signal::Signal,
  subscriber::Subscriber,
  subscription::{request_upstream, validate_request, Subscription, SubscriptionRef, UNBOUNDED},
};

/// Shift every element by `delay` on the scheduler's clock.
///
/// One element is requested at a time: the next request goes upstream only
/// after the previous element was delivered, so elements are spaced by at
/// least `delay` and the timer queue never holds more than one of them.
/// Completion waits for the pending element; an error is delivered at once
/// and drops it.
pub struct DelayElements<P> {
  source: P,
  delay: Duration,
  scheduler: SchedulerRef,
}

impl<P> DelayElements<P> {
  pub fn new(source: P, delay: Duration, scheduler: SchedulerRef) -> Self {
    Self { source, delay, scheduler }
  }
}

impl<P: Publisher> Publisher for DelayElements<P> {
  type Item = P::Item;
  type Err = P::Err;

  fn actual_subscribe<S>(&self, subscriber: S)
  where
    S: Subscriber<P::Item, P::Err> + 'static,
  {
    let core = Arc::new(DelayCore {
      delay: self.delay,
      scheduler: self.scheduler.clone(),
      upstream: OnceCell::new(),
      state: Mutex::new(DelayState::default()),
      downstream: Mutex::new(Some(subscriber)),
      cancelled: AtomicBool::new(false),
    });
    self.source.actual_subscribe(DelaySubscriber { core })
  }
}

#[derive(Default)]
struct DelayState {
  outstanding: u64,
  /// One element was requested and has not arrived yet.
  requested: bool,
  /// One element arrived and waits for its timer.
  delaying: bool,
  completed: bool,
  timer: Option<TaskHandle>,
}

struct DelayCore<S> {
  delay: Duration,
  scheduler: SchedulerRef,
  upstream: OnceCell<SubscriptionRef>,
  state: Mutex<DelayState>,
  downstream: Mutex<Option<S>>,
  cancelled: AtomicBool,
}

impl<S> DelayCore<S> {
  fn request_one(&self) {
    if let Some(upstream) = self.upstream.get() {
      request_upstream(&**upstream, 1);
    }
  }

  fn emit<T, E>(&self, value: T)
  where
    S: Subscriber<T, E>,
  {
    if self.cancelled.load(Ordering::Acquire) {
      self.downstream.lock().take();
      return;
    }
    {
      let mut state = self.state.lock();
      state.delaying = false;
      state.timer = None;
      if state.outstanding != UNBOUNDED {
        state.outstanding = state.outstanding.saturating_sub(1);
      }
    }
    {
      let mut slot = self.downstream.lock();
      if let Some(actual) = slot.as_mut() {
        actual.on_signal(Signal::Next(value));
      }
      if self.cancelled.load(Ordering::Acquire) {
        slot.take();
        return;
      }
    }
    let (complete, more) = {
      let mut state = self.state.lock();
      if state.completed {
        (true, false)
      } else if state.outstanding > 0 && !state.requested && !state.delaying {
        state.requested = true;
        (false, true)
      } else {
        (false, false)
      }
    };
    if complete {
      self.finish(Signal::<T, E>::Complete);
    } else if more {
      self.request_one();
    }
  }

  fn finish<T, E>(&self, terminal: Signal<T, E>)
  where
    S: Subscriber<T, E>,
  {
    let actual = self.downstream.lock().take();
    if let Some(mut actual) = actual {
      actual.on_signal(terminal);
    }
  }
}

impl<S: Send> Subscription for DelayCore<S> {
  fn request(&self, n: u64) -> Result<(), ProtocolError> {
    validate_request(n)?;
    let more = {
      let mut state = self.state.lock();
      state.outstanding = state.outstanding.saturating_add(n);
      let idle = !state.requested && !state.delaying && !state.completed;
      if idle {
        state.requested = true;
      }
      idle
    };
    if more && !self.cancelled.load(Ordering::Acquire) {
      self.request_one();
    }
    Ok(())
  }

  fn cancel(&self) {
    if self.cancelled.swap(true, Ordering::AcqRel) {
      return;
    }
    if let Some(timer) = self.state.lock().timer.take() {
      timer.cancel();
    }
    if let Some(upstream) = self.upstream.get() {
      upstream.cancel();
    }
    // Held when cancelled from inside `on_signal`; `emit` takes it after
    // the delivery returns.
    if let Some(mut downstream) = self.downstream.try_lock() {
      downstream.take();
    }
  }
}

struct DelaySubscriber<S> {
  core: Arc<DelayCore<S>>,
}

impl<S, T, E> Subscriber<T, E> for DelaySubscriber<S>
where
  S: Subscriber<T, E> + 'static,
  T: Send + 'static,
  E: 'static,
{
  fn on_subscribe(&mut self, subscription: SubscriptionRef) {
    if self.core.upstream.set(subscription).is_err() {
      return;
    }
    let mut downstream = self.core.downstream.lock();
    if let Some(actual) = downstream.as_mut() {
      actual.on_subscribe(self.core.clone());
    }
  }

  fn on_signal(&mut self, signal: Signal<T, E>) {
    if self.core.cancelled.load(Ordering::Acquire) {
      return;
    }
    match signal {
      Signal::Next(value) => {
        {
          let mut state = self.core.state.lock();
          state.requested = false;
          state.delaying = true;
        }
        let core = self.core.clone();
        let timer =
          self.core.scheduler.schedule_after(self.core.delay, Box::new(move || core.emit::<T, E>(value)));
        let mut state = self.core.state.lock();
        if state.delaying {
          state.timer = Some(timer);
        }
      }
      Signal::Complete => {
        let now = {
          let mut state = self.core.state.lock();
          state.completed = true;
          !state.delaying
        };
        if now {
          self.core.finish(Signal::<T, E>::Complete);
        }
      }
      Signal::Error(err) => {
        if let Some(timer) = self.core.state.lock().timer.take() {
          timer.cancel();
        }
        self.core.finish(Signal::Error(err));
      }
    }
  }
}
