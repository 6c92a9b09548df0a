use std::{
  collections::VecDeque,
  sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
  },
};

use once_cell::sync::OnceCell;
use parking_lot::Mutex;

use crate::{
  config::replenish_threshold,
  error::ProtocolError,
  publisher::Publisher,
  scheduler::SchedulerRef,
  signal::Signal,
  subscriber::Subscriber,
  subscription::{request_upstream, Demand, Subscription, SubscriptionRef, Wip, UNBOUNDED},
};

/// Deliver every downstream signal from `scheduler`.
///
/// Upstream elements land in a queue bounded by `prefetch`; a drain task on
/// the scheduler empties it as far as downstream demand allows. Drains are
/// serialized, so ordering is preserved even on a multi-worker pool. An
/// upstream error waits behind the elements queued before it.
pub struct PublishOn<P> {
  source: P,
  scheduler: SchedulerRef,
  prefetch: usize,
}

impl<P> PublishOn<P> {
  pub fn new(source: P, scheduler: SchedulerRef, prefetch: usize) -> Self {
    Self { source, scheduler, prefetch: prefetch.max(1) }
  }
}

impl<P: Publisher> Publisher for PublishOn<P> {
  type Item = P::Item;
  type Err = P::Err;

  fn actual_subscribe<S>(&self, subscriber: S)
  where
    S: Subscriber<P::Item, P::Err> + 'static,
  {
    let core = Arc::new(PublishOnCore {
      scheduler: self.scheduler.clone(),
      prefetch: self.prefetch,
      limit: replenish_threshold(self.prefetch),
      upstream: OnceCell::new(),
      queue: Mutex::new(VecDeque::new()),
      terminal: Mutex::new(None),
      done: AtomicBool::new(false),
      cancelled: AtomicBool::new(false),
      demand: Demand::new(),
      wip: Wip::held(),
      consumed: AtomicUsize::new(0),
      downstream: Mutex::new(Some(subscriber)),
    });
    self.source.actual_subscribe(PublishOnSubscriber { core })
  }
}

struct PublishOnCore<S, T, E> {
  scheduler: SchedulerRef,
  prefetch: usize,
  limit: usize,
  upstream: OnceCell<SubscriptionRef>,
  queue: Mutex<VecDeque<T>>,
  terminal: Mutex<Option<Result<(), E>>>,
  done: AtomicBool,
  cancelled: AtomicBool,
  demand: Demand,
  wip: Wip,
  consumed: AtomicUsize,
  downstream: Mutex<Option<S>>,
}

enum Step<E> {
  Idle,
  Release,
  Terminal(Result<(), E>),
}

impl<S, T, E> PublishOnCore<S, T, E>
where
  S: Subscriber<T, E> + 'static,
  T: Send + 'static,
  E: Send + 'static,
{
  /// Start a drain on the scheduler unless one is already running.
  fn schedule(self: &Arc<Self>) {
    if self.wip.enter() {
      self.spawn_drain();
    }
  }

  /// Caller owns `wip`.
  fn spawn_drain(self: &Arc<Self>) {
    let core = self.clone();
    self.scheduler.schedule(Box::new(move || core.drain()));
  }

  fn drain(&self) {
    let mut missed = 1;
    loop {
      self.drain_once();
      missed = self.wip.leave(missed);
      if missed == 0 {
        break;
      }
    }
  }

  fn drain_once(&self) {
    let mut slot = self.downstream.lock();
    let step = match slot.as_mut() {
      Some(actual) => self.emit(actual),
      None => Step::Release,
    };
    match step {
      Step::Idle => {}
      Step::Release => {
        slot.take();
        self.queue.lock().clear();
      }
      Step::Terminal(result) => {
        let actual = slot.take();
        drop(slot);
        if let Some(mut actual) = actual {
          actual.on_signal(Signal::terminal(result));
        }
      }
    }
  }

  fn emit(&self, actual: &mut S) -> Step<E> {
    loop {
      if self.cancelled.load(Ordering::Acquire) {
        return Step::Release;
      }
      let done = self.done.load(Ordering::Acquire);
      let next = if self.demand.get() > 0 { self.queue.lock().pop_front() } else { None };
      if let Some(value) = next {
        self.demand.produced(1);
        actual.on_signal(Signal::Next(value));
        self.replenish();
        continue;
      }
      if done && self.queue.lock().is_empty() {
        return match self.terminal.lock().take() {
          Some(result) => Step::Terminal(result),
          None => Step::Release,
        };
      }
      return Step::Idle;
    }
  }

  fn replenish(&self) {
    if self.prefetch == usize::MAX {
      return;
    }
    let consumed = self.consumed.fetch_add(1, Ordering::AcqRel) + 1;
    if consumed >= self.limit {
      self.consumed.store(0, Ordering::Release);
      if let Some(upstream) = self.upstream.get() {
        request_upstream(&**upstream, self.limit as u64);
      }
    }
  }

  fn initial_request(&self) -> u64 {
    if self.prefetch == usize::MAX {
      UNBOUNDED
    } else {
      self.prefetch as u64
    }
  }
}

struct PublishOnGate<S, T, E>(Arc<PublishOnCore<S, T, E>>);

impl<S, T, E> Subscription for PublishOnGate<S, T, E>
where
  S: Subscriber<T, E> + 'static,
  T: Send + 'static,
  E: Send + 'static,
{
  fn request(&self, n: u64) -> Result<(), ProtocolError> {
    self.0.demand.request(n)?;
    self.0.schedule();
    Ok(())
  }

  fn cancel(&self) {
    let core = &self.0;
    if core.cancelled.swap(true, Ordering::AcqRel) {
      return;
    }
    if let Some(upstream) = core.upstream.get() {
      upstream.cancel();
    }
    // Nothing reaches the subscriber once cancelled, so the cleanup can run
    // on the caller's thread.
    if core.wip.enter() {
      core.drain();
    }
  }
}

struct PublishOnSubscriber<S, T, E> {
  core: Arc<PublishOnCore<S, T, E>>,
}

impl<S, T, E> Subscriber<T, E> for PublishOnSubscriber<S, T, E>
where
  S: Subscriber<T, E> + 'static,
  T: Send + 'static,
  E: Send + 'static,
{
  fn on_subscribe(&mut self, subscription: SubscriptionRef) {
    let core = &self.core;
    if core.upstream.set(subscription.clone()).is_err() {
      subscription.cancel();
      return;
    }
    // `wip` is still held here, so downstream requests only mark work.
    if let Some(actual) = core.downstream.lock().as_mut() {
      actual.on_subscribe(Arc::new(PublishOnGate(core.clone())));
    }
    request_upstream(&*subscription, core.initial_request());
    core.spawn_drain();
  }

  fn on_signal(&mut self, signal: Signal<T, E>) {
    let core = &self.core;
    if core.done.load(Ordering::Acquire) || core.cancelled.load(Ordering::Acquire) {
      return;
    }
    match signal {
      Signal::Next(value) => core.queue.lock().push_back(value),
      Signal::Error(err) => {
        *core.terminal.lock() = Some(Err(err));
        core.done.store(true, Ordering::Release);
      }
      Signal::Complete => {
        *core.terminal.lock() = Some(Ok(()));
        core.done.store(true, Ordering::Release);
      }
    }
    core.schedule();
  }
}
