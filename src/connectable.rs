//! Hot multicast over a cold publisher.
//!
//! A [`ConnectableFlux`] accepts subscribers without touching its source.
//! [`connect`](ConnectableFlux::connect) subscribes to the source once and
//! from then on every element goes to every subscriber attached when it
//! leaves the shared queue. The slowest subscriber paces the source: an
//! element leaves the queue only when all current subscribers have demand
//! for it. While no subscriber is attached, elements stay queued (up to the
//! prefetch) and the source is backpressured until one arrives.
//!
//! ```rust
//! use std::sync::{Arc, Mutex};
//!
//! use rxflux::prelude::*;
//!
//! let hot = flux::range(1, 3).publish();
//! let (a, b) = (Arc::new(Mutex::new(vec![])), Arc::new(Mutex::new(vec![])));
//! let (sa, sb) = (a.clone(), b.clone());
//! hot.subscribe(move |v| sa.lock().unwrap().push(v));
//! hot.subscribe(move |v| sb.lock().unwrap().push(v));
//! hot.connect();
//!
//! assert_eq!(*a.lock().unwrap(), vec![1, 2, 3]);
//! assert_eq!(*b.lock().unwrap(), vec![1, 2, 3]);
//! ```

use std::{
  collections::VecDeque,
  sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
  },
};

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use smallvec::SmallVec;

use crate::{
  config::replenish_threshold,
  error::ProtocolError,
  publisher::Publisher,
  signal::Signal,
  subscriber::{BoxedSubscriber, Subscriber},
  subscription::{
    request_upstream, Demand, Subscription, SubscriptionHandle, SubscriptionRef, Wip, UNBOUNDED,
  },
};

/// A publisher that multicasts one upstream activation.
///
/// Cloning is cheap and every clone shares the same connection.
pub struct ConnectableFlux<P: Publisher> {
  source: Arc<P>,
  core: Arc<PublishCore<P::Item, P::Err>>,
}

impl<P: Publisher> Clone for ConnectableFlux<P> {
  fn clone(&self) -> Self { Self { source: self.source.clone(), core: self.core.clone() } }
}

impl<P> ConnectableFlux<P>
where
  P: Publisher,
  P::Item: Clone,
  P::Err: Clone,
{
  pub fn new(source: P, prefetch: usize) -> Self {
    let prefetch = prefetch.max(1);
    Self {
      source: Arc::new(source),
      core: Arc::new(PublishCore {
        prefetch,
        limit: replenish_threshold(prefetch),
        state: Mutex::new(PublishState {
          queue: VecDeque::new(),
          terminal: None,
          subscribers: Vec::new(),
          consumed: 0,
        }),
        wip: Wip::default(),
        upstream: OnceCell::new(),
        connection: OnceCell::new(),
      }),
    }
  }

  /// Subscribe to the source. Later calls return the same handle; cancel it
  /// to disconnect.
  pub fn connect(&self) -> SubscriptionHandle {
    let mut fresh = false;
    let handle = self
      .core
      .connection
      .get_or_init(|| {
        fresh = true;
        SubscriptionHandle::new()
      })
      .clone();
    if fresh {
      tracing::debug!(subscribers = self.subscriber_count(), "connecting");
      self
        .source
        .actual_subscribe(ConnectSubscriber { core: self.core.clone(), handle: handle.clone() });
    }
    handle
  }

  pub fn is_connected(&self) -> bool { self.core.connection.get().is_some() }

  pub fn subscriber_count(&self) -> usize { self.core.state.lock().subscribers.len() }

  /// Connect automatically once `threshold` subscribers arrived.
  pub fn auto_connect(self, threshold: usize) -> AutoConnect<P> {
    AutoConnect { connectable: self, threshold: threshold.max(1), arrived: AtomicUsize::new(0) }
  }
}

impl<P> Publisher for ConnectableFlux<P>
where
  P: Publisher,
  P::Item: Clone,
  P::Err: Clone,
{
  type Item = P::Item;
  type Err = P::Err;

  fn actual_subscribe<S>(&self, mut subscriber: S)
  where
    S: Subscriber<P::Item, P::Err> + 'static,
  {
    let inner = Arc::new(InnerSubscription {
      core: self.core.clone(),
      demand: Demand::new(),
      cancelled: AtomicBool::new(false),
      subscriber: Mutex::new(None),
    });
    // Not attached yet, so requests made here only record demand.
    subscriber.on_subscribe(inner.clone());
    if inner.cancelled.load(Ordering::Acquire) {
      return;
    }
    *inner.subscriber.lock() = Some(Box::new(subscriber));
    self.core.attach(inner);
  }
}

// ==================== AutoConnect ====================

/// Connects its [`ConnectableFlux`] when the `threshold`-th subscriber
/// arrives.
pub struct AutoConnect<P: Publisher> {
  connectable: ConnectableFlux<P>,
  threshold: usize,
  arrived: AtomicUsize,
}

impl<P> Publisher for AutoConnect<P>
where
  P: Publisher,
  P::Item: Clone,
  P::Err: Clone,
{
  type Item = P::Item;
  type Err = P::Err;

  fn actual_subscribe<S>(&self, subscriber: S)
  where
    S: Subscriber<P::Item, P::Err> + 'static,
  {
    self.connectable.actual_subscribe(subscriber);
    if self.arrived.fetch_add(1, Ordering::AcqRel) + 1 == self.threshold {
      self.connectable.connect();
    }
  }
}

// ==================== Shared core ====================

struct PublishState<T, E> {
  queue: VecDeque<T>,
  terminal: Option<Result<(), E>>,
  subscribers: Vec<Arc<InnerSubscription<T, E>>>,
  consumed: usize,
}

struct PublishCore<T, E> {
  prefetch: usize,
  limit: usize,
  state: Mutex<PublishState<T, E>>,
  wip: Wip,
  upstream: OnceCell<SubscriptionRef>,
  connection: OnceCell<SubscriptionHandle>,
}

type Batch<T, E> = SmallVec<[Arc<InnerSubscription<T, E>>; 4]>;

enum Step<T, E> {
  Emit(T, Batch<T, E>),
  Finish(Result<(), E>, Batch<T, E>),
  Idle,
}

impl<T, E> PublishCore<T, E>
where
  T: Clone + Send + 'static,
  E: Clone + Send + 'static,
{
  fn attach(&self, inner: Arc<InnerSubscription<T, E>>) {
    {
      let mut state = self.state.lock();
      // A subscriber arriving after the end only sees the terminal.
      if state.queue.is_empty() {
        if let Some(terminal) = state.terminal.clone() {
          drop(state);
          inner.deliver(Signal::terminal(terminal));
          return;
        }
      }
      state.subscribers.push(inner);
    }
    self.drain();
  }

  fn drain(&self) {
    if !self.wip.enter() {
      return;
    }
    let mut missed = 1;
    loop {
      loop {
        match self.next_step() {
          Step::Emit(value, targets) => {
            for target in targets.iter() {
              target.demand.produced(1);
              target.deliver(Signal::Next(value.clone()));
            }
            self.replenish();
          }
          Step::Finish(result, targets) => {
            for target in targets.iter() {
              target.deliver(Signal::terminal(result.clone()));
            }
          }
          Step::Idle => break,
        }
      }
      missed = self.wip.leave(missed);
      if missed == 0 {
        break;
      }
    }
  }

  fn next_step(&self) -> Step<T, E> {
    let mut state = self.state.lock();
    state.subscribers.retain(|s| !s.cancelled.load(Ordering::Acquire));
    if state.queue.is_empty() {
      if let Some(terminal) = state.terminal.clone() {
        if !state.subscribers.is_empty() {
          let targets = state.subscribers.drain(..).collect();
          return Step::Finish(terminal, targets);
        }
      }
      return Step::Idle;
    }
    // Without subscribers elements stay queued; the source stalls once
    // the prefetch is used up.
    if state.subscribers.is_empty() || state.subscribers.iter().any(|s| s.demand.get() == 0) {
      return Step::Idle;
    }
    match state.queue.pop_front() {
      Some(value) => Step::Emit(value, state.subscribers.iter().cloned().collect()),
      None => Step::Idle,
    }
  }

  fn replenish(&self) {
    if self.prefetch == usize::MAX {
      return;
    }
    let ready = {
      let mut state = self.state.lock();
      state.consumed += 1;
      if state.consumed >= self.limit {
        state.consumed = 0;
        true
      } else {
        false
      }
    };
    if ready {
      if let Some(upstream) = self.upstream.get() {
        request_upstream(&**upstream, self.limit as u64);
      }
    }
  }
}

struct InnerSubscription<T, E> {
  core: Arc<PublishCore<T, E>>,
  demand: Demand,
  cancelled: AtomicBool,
  subscriber: Mutex<Option<BoxedSubscriber<T, E>>>,
}

impl<T, E> InnerSubscription<T, E> {
  fn deliver(&self, signal: Signal<T, E>) {
    if self.cancelled.load(Ordering::Acquire) {
      return;
    }
    let terminal = signal.is_terminal();
    let mut slot = self.subscriber.lock();
    if let Some(subscriber) = slot.as_mut() {
      subscriber.on_signal(signal);
    }
    if terminal || self.cancelled.load(Ordering::Acquire) {
      slot.take();
    }
  }
}

impl<T, E> Subscription for InnerSubscription<T, E>
where
  T: Clone + Send + 'static,
  E: Clone + Send + 'static,
{
  fn request(&self, n: u64) -> Result<(), ProtocolError> {
    self.demand.request(n)?;
    self.core.drain();
    Ok(())
  }

  fn cancel(&self) {
    if self.cancelled.swap(true, Ordering::AcqRel) {
      return;
    }
    // Held when cancelled from inside `on_signal`; `deliver` drops it then.
    if let Some(mut slot) = self.subscriber.try_lock() {
      slot.take();
    }
    self.core.drain();
  }
}

struct ConnectSubscriber<T, E> {
  core: Arc<PublishCore<T, E>>,
  handle: SubscriptionHandle,
}

impl<T, E> Subscriber<T, E> for ConnectSubscriber<T, E>
where
  T: Clone + Send + 'static,
  E: Clone + Send + 'static,
{
  fn on_subscribe(&mut self, subscription: SubscriptionRef) {
    if self.core.upstream.set(subscription.clone()).is_err() || !self.handle.attach(subscription.clone()) {
      return;
    }
    let initial = if self.core.prefetch == usize::MAX { UNBOUNDED } else { self.core.prefetch as u64 };
    request_upstream(&*subscription, initial);
  }

  fn on_signal(&mut self, signal: Signal<T, E>) {
    let terminal = signal.is_terminal();
    {
      let mut state = self.core.state.lock();
      match signal {
        Signal::Next(value) => state.queue.push_back(value),
        Signal::Error(err) => state.terminal = Some(Err(err)),
        Signal::Complete => state.terminal = Some(Ok(())),
      }
    }
    if terminal {
      self.handle.mark_terminated();
    }
    self.core.drain();
  }
}
