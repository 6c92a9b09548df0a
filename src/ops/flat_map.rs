use std::{
  collections::{HashMap, VecDeque},
  sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
  },
};

use once_cell::sync::OnceCell;
use parking_lot::Mutex;

use crate::{
  config::replenish_threshold,
  error::ProtocolError,
  publisher::Publisher,
  signal::Signal,
  subscriber::Subscriber,
  subscription::{request_upstream, Demand, Subscription, SubscriptionRef, Wip, UNBOUNDED},
};

/// Map every element to an inner publisher and merge what they emit.
///
/// At most `concurrency` inner publishers are subscribed at a time; another
/// upstream element is requested each time one of them completes. Each
/// inner is asked for `prefetch` elements up front and replenished after
/// three quarters of that were delivered. Elements interleave in arrival
/// order.
///
/// The first error, from the upstream or any inner, cancels everything
/// else, drops queued elements and is delivered right away.
pub struct FlatMap<P, F> {
  source: P,
  mapper: Arc<F>,
  concurrency: usize,
  prefetch: usize,
}

impl<P, F> FlatMap<P, F> {
  pub fn new(source: P, mapper: F, concurrency: usize, prefetch: usize) -> Self {
    Self { source, mapper: Arc::new(mapper), concurrency: concurrency.max(1), prefetch: prefetch.max(1) }
  }
}

impl<P, F, Q> Publisher for FlatMap<P, F>
where
  P: Publisher,
  F: Fn(P::Item) -> Q + Send + Sync + 'static,
  Q: Publisher<Err = P::Err>,
{
  type Item = Q::Item;
  type Err = P::Err;

  fn actual_subscribe<S>(&self, subscriber: S)
  where
    S: Subscriber<Q::Item, P::Err> + 'static,
  {
    let core = Arc::new(FlatMapCore {
      concurrency: self.concurrency,
      prefetch: self.prefetch,
      limit: replenish_threshold(self.prefetch),
      upstream: OnceCell::new(),
      state: Mutex::new(MergeState::default()),
      demand: Demand::new(),
      wip: Wip::held(),
      cancelled: AtomicBool::new(false),
      downstream: Mutex::new(Some(subscriber)),
    });
    self.source.actual_subscribe(FlatMapMain { core, mapper: self.mapper.clone() })
  }
}

struct MergeState<U, E> {
  queue: VecDeque<(usize, U)>,
  inners: HashMap<usize, InnerSlot>,
  next_id: usize,
  main_done: bool,
  error: Option<E>,
}

impl<U, E> Default for MergeState<U, E> {
  fn default() -> Self {
    Self { queue: VecDeque::new(), inners: HashMap::new(), next_id: 0, main_done: false, error: None }
  }
}

#[derive(Default)]
struct InnerSlot {
  subscription: Option<SubscriptionRef>,
  consumed: usize,
}

struct FlatMapCore<S, U, E> {
  concurrency: usize,
  prefetch: usize,
  limit: usize,
  upstream: OnceCell<SubscriptionRef>,
  state: Mutex<MergeState<U, E>>,
  demand: Demand,
  wip: Wip,
  cancelled: AtomicBool,
  downstream: Mutex<Option<S>>,
}

enum Step<E> {
  Idle,
  Release,
  Terminal(Result<(), E>),
}

fn amount(n: usize) -> u64 {
  if n == usize::MAX {
    UNBOUNDED
  } else {
    n as u64
  }
}

impl<S, U, E> FlatMapCore<S, U, E>
where
  S: Subscriber<U, E>,
{
  fn signal(&self) {
    if self.wip.enter() {
      self.drain();
    }
  }

  /// Runs only while the caller owns `wip`.
  fn drain(&self) {
    let mut missed = 1;
    loop {
      let mut slot = self.downstream.lock();
      let step = match slot.as_mut() {
        Some(actual) => self.emit(actual),
        None => Step::Release,
      };
      match step {
        Step::Idle => {}
        Step::Release => {
          slot.take();
          self.state.lock().queue.clear();
        }
        Step::Terminal(result) => {
          let actual = slot.take();
          drop(slot);
          if let Some(mut actual) = actual {
            actual.on_signal(Signal::terminal(result));
          }
        }
      }
      missed = self.wip.leave(missed);
      if missed == 0 {
        break;
      }
    }
  }

  fn emit(&self, actual: &mut S) -> Step<E> {
    loop {
      if self.cancelled.load(Ordering::Acquire) {
        return Step::Release;
      }
      let (value, replenish) = {
        let mut state = self.state.lock();
        if let Some(err) = state.error.take() {
          return Step::Terminal(Err(err));
        }
        if state.queue.is_empty() {
          if state.main_done && state.inners.is_empty() {
            return Step::Terminal(Ok(()));
          }
          return Step::Idle;
        }
        if self.demand.get() == 0 {
          return Step::Idle;
        }
        let Some((id, value)) = state.queue.pop_front() else {
          return Step::Idle;
        };
        let limit = self.limit;
        let replenish = state.inners.get_mut(&id).and_then(|slot| {
          slot.consumed += 1;
          if slot.consumed >= limit && self.prefetch != usize::MAX {
            slot.consumed = 0;
            slot.subscription.clone()
          } else {
            None
          }
        });
        (value, replenish)
      };
      self.demand.produced(1);
      actual.on_signal(Signal::Next(value));
      if let Some(inner) = replenish {
        request_upstream(&*inner, self.limit as u64);
      }
    }
  }

  /// Record the first error and cancel every live source.
  fn fail(&self, err: E) {
    let inners: Vec<_> = {
      let mut state = self.state.lock();
      if state.error.is_some() || self.cancelled.load(Ordering::Acquire) {
        tracing::debug!("flat_map dropped an error raised after the first one");
        return;
      }
      state.error = Some(err);
      state.queue.clear();
      state.inners.drain().filter_map(|(_, slot)| slot.subscription).collect()
    };
    if let Some(upstream) = self.upstream.get() {
      upstream.cancel();
    }
    inners.iter().for_each(|inner| inner.cancel());
    self.signal();
  }
}

impl<S, U, E> Subscription for FlatMapCore<S, U, E>
where
  S: Subscriber<U, E>,
  U: Send,
  E: Send,
{
  fn request(&self, n: u64) -> Result<(), ProtocolError> {
    self.demand.request(n)?;
    self.signal();
    Ok(())
  }

  fn cancel(&self) {
    if self.cancelled.swap(true, Ordering::AcqRel) {
      return;
    }
    if let Some(upstream) = self.upstream.get() {
      upstream.cancel();
    }
    let inners: Vec<_> =
      self.state.lock().inners.drain().filter_map(|(_, slot)| slot.subscription).collect();
    inners.iter().for_each(|inner| inner.cancel());
    self.signal();
  }
}

// ==================== Upstream subscriber ====================

struct FlatMapMain<S, U, E, F> {
  core: Arc<FlatMapCore<S, U, E>>,
  mapper: Arc<F>,
}

impl<S, U, E, F, T, Q> Subscriber<T, E> for FlatMapMain<S, U, E, F>
where
  S: Subscriber<U, E> + 'static,
  F: Fn(T) -> Q + Send + Sync,
  Q: Publisher<Item = U, Err = E>,
  U: Send + 'static,
  E: Send + 'static,
{
  fn on_subscribe(&mut self, subscription: SubscriptionRef) {
    let core = &self.core;
    if core.upstream.set(subscription.clone()).is_err() {
      subscription.cancel();
      return;
    }
    // `wip` starts held, so requests made here only mark work.
    if let Some(actual) = core.downstream.lock().as_mut() {
      actual.on_subscribe(core.clone());
    }
    request_upstream(&*subscription, amount(core.concurrency));
    core.drain();
  }

  fn on_signal(&mut self, signal: Signal<T, E>) {
    let core = &self.core;
    match signal {
      Signal::Next(value) => {
        if core.cancelled.load(Ordering::Acquire) {
          return;
        }
        let id = {
          let mut state = core.state.lock();
          if state.error.is_some() {
            return;
          }
          let id = state.next_id;
          state.next_id += 1;
          state.inners.insert(id, InnerSlot::default());
          id
        };
        (self.mapper)(value).actual_subscribe(FlatMapInner { core: core.clone(), id });
      }
      Signal::Error(err) => core.fail(err),
      Signal::Complete => {
        core.state.lock().main_done = true;
        core.signal();
      }
    }
  }
}

// ==================== Inner subscriber ====================

struct FlatMapInner<S, U, E> {
  core: Arc<FlatMapCore<S, U, E>>,
  id: usize,
}

impl<S, U, E> Subscriber<U, E> for FlatMapInner<S, U, E>
where
  S: Subscriber<U, E> + 'static,
  U: Send + 'static,
  E: Send + 'static,
{
  fn on_subscribe(&mut self, subscription: SubscriptionRef) {
    let core = &self.core;
    let live = match core.state.lock().inners.get_mut(&self.id) {
      Some(slot) if !core.cancelled.load(Ordering::Acquire) => {
        slot.subscription = Some(subscription.clone());
        true
      }
      _ => false,
    };
    if live {
      request_upstream(&*subscription, amount(core.prefetch));
    } else {
      subscription.cancel();
    }
  }

  fn on_signal(&mut self, signal: Signal<U, E>) {
    let core = &self.core;
    match signal {
      Signal::Next(value) => {
        {
          let mut state = core.state.lock();
          if state.error.is_some() || !state.inners.contains_key(&self.id) {
            return;
          }
          state.queue.push_back((self.id, value));
        }
        core.signal();
      }
      Signal::Error(err) => core.fail(err),
      Signal::Complete => {
        let more = {
          let mut state = core.state.lock();
          state.inners.remove(&self.id);
          !state.main_done && state.error.is_none() && core.concurrency != usize::MAX
        };
        if more {
          if let Some(upstream) = core.upstream.get() {
            request_upstream(&**upstream, 1);
          }
        }
        core.signal();
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
  };

  use parking_lot::Mutex;

  use crate::{
    flux,
    prelude::*,
    scheduler::{ControllableClock, VirtualTimeScheduler},
  };

  #[test]
  fn merges_synchronous_inners() {
    let seen = Arc::new(Mutex::new(vec![]));
    let done = Arc::new(Mutex::new(false));
    let (sink, fin) = (seen.clone(), done.clone());
    flux::range(1, 3).flat_map(|v| flux::from_iter(vec![v * 10, v * 10 + 1])).subscribe_all(
      move |v| sink.lock().push(v),
      |_| {},
      move || *fin.lock() = true,
    );
    assert_eq!(*seen.lock(), vec![10, 11, 20, 21, 30, 31]);
    assert!(*done.lock());
  }

  #[test]
  fn concurrency_limits_active_inners() {
    let subscribed = Arc::new(AtomicUsize::new(0));
    let counter = subscribed.clone();
    let handle = flux::range(1, 5)
      .flat_map_with(
        move |_| {
          let counter = counter.clone();
          flux::never::<i64>().do_on_subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
          })
        },
        2,
        4,
      )
      .subscribe(|_| {});
    assert_eq!(subscribed.load(Ordering::SeqCst), 2);
    handle.cancel();
  }

  #[test]
  fn interleaves_timed_inners() {
    let vts = Arc::new(VirtualTimeScheduler::new());
    let seen = Arc::new(Mutex::new(vec![]));
    let sink = seen.clone();
    let scheduler = vts.clone();
    flux::from_iter(vec![("a", 3u64), ("b", 2)])
      .with_err::<crate::error::FluxError>()
      .flat_map(move |(tag, n)| {
        flux::interval(Duration::from_secs(n), scheduler.clone()).take(2).map(move |i| format!("{tag}{i}"))
      })
      .subscribe(move |v| sink.lock().push(v));
    vts.advance_by(Duration::from_secs(10));
    assert_eq!(*seen.lock(), vec!["b0", "a0", "b1", "a1"]);
  }

  #[test]
  fn inner_error_cancels_the_rest() {
    let cancelled = Arc::new(AtomicUsize::new(0));
    let failed = Arc::new(Mutex::new(None));
    let (c, f) = (cancelled.clone(), failed.clone());
    flux::from_iter(vec![1, 2])
      .with_err::<&'static str>()
      .flat_map(move |v| {
        let c = c.clone();
        if v == 1 {
          flux::never::<i32>().with_err::<&'static str>().do_on_cancel(move || {
            c.fetch_add(1, Ordering::SeqCst);
          })
          .boxed()
        } else {
          flux::error::<i32, &'static str>("inner").boxed()
        }
      })
      .subscribe_all(|_| {}, move |e| *f.lock() = Some(e), || {});
    assert_eq!(*failed.lock(), Some("inner"));
    assert_eq!(cancelled.load(Ordering::SeqCst), 1);
  }
}
