//! Element and error transformation: `map`, `try_map`, `map_err`.

use std::sync::Arc;

use crate::{
  publisher::Publisher,
  signal::Signal,
  subscriber::Subscriber,
  subscription::SubscriptionRef,
};

// ==================== Map ====================

pub struct Map<P, F> {
  source: P,
  f: Arc<F>,
}

impl<P, F> Map<P, F> {
  pub fn new(source: P, f: F) -> Self { Self { source, f: Arc::new(f) } }
}

impl<P, F, U> Publisher for Map<P, F>
where
  P: Publisher,
  F: Fn(P::Item) -> U + Send + Sync + 'static,
  U: Send + 'static,
{
  type Item = U;
  type Err = P::Err;

  fn actual_subscribe<S>(&self, subscriber: S)
  where
    S: Subscriber<U, P::Err> + 'static,
  {
    self.source.actual_subscribe(MapSubscriber { actual: subscriber, f: self.f.clone() })
  }
}

pub struct MapSubscriber<S, F> {
  actual: S,
  f: Arc<F>,
}

impl<S, F, T, U, E> Subscriber<T, E> for MapSubscriber<S, F>
where
  S: Subscriber<U, E>,
  F: Fn(T) -> U + Send + Sync,
{
  fn on_subscribe(&mut self, subscription: SubscriptionRef) {
    self.actual.on_subscribe(subscription)
  }

  fn on_signal(&mut self, signal: Signal<T, E>) {
    let f = &self.f;
    self.actual.on_signal(signal.map(|v| f(v)))
  }
}

// ==================== TryMap ====================

pub struct TryMap<P, F> {
  source: P,
  f: Arc<F>,
}

impl<P, F> TryMap<P, F> {
  pub fn new(source: P, f: F) -> Self { Self { source, f: Arc::new(f) } }
}

impl<P, F, U> Publisher for TryMap<P, F>
where
  P: Publisher,
  F: Fn(P::Item) -> Result<U, P::Err> + Send + Sync + 'static,
  U: Send + 'static,
{
  type Item = U;
  type Err = P::Err;

  fn actual_subscribe<S>(&self, subscriber: S)
  where
    S: Subscriber<U, P::Err> + 'static,
  {
    self.source.actual_subscribe(TryMapSubscriber {
      actual: subscriber,
      f: self.f.clone(),
      upstream: None,
      done: false,
    })
  }
}

/// A failing mapper cancels the upstream, then emits the error. Signals the
/// upstream still had in flight are dropped.
pub struct TryMapSubscriber<S, F> {
  actual: S,
  f: Arc<F>,
  upstream: Option<SubscriptionRef>,
  done: bool,
}

impl<S, F, T, U, E> Subscriber<T, E> for TryMapSubscriber<S, F>
where
  S: Subscriber<U, E>,
  F: Fn(T) -> Result<U, E> + Send + Sync,
{
  fn on_subscribe(&mut self, subscription: SubscriptionRef) {
    self.upstream = Some(subscription.clone());
    self.actual.on_subscribe(subscription)
  }

  fn on_signal(&mut self, signal: Signal<T, E>) {
    if self.done {
      return;
    }
    match signal {
      Signal::Next(value) => match (self.f)(value) {
        Ok(mapped) => self.actual.on_signal(Signal::Next(mapped)),
        Err(err) => {
          self.done = true;
          if let Some(upstream) = self.upstream.take() {
            upstream.cancel();
          }
          self.actual.on_signal(Signal::Error(err));
        }
      },
      Signal::Error(err) => {
        self.done = true;
        self.upstream = None;
        self.actual.on_signal(Signal::Error(err));
      }
      Signal::Complete => {
        self.done = true;
        self.upstream = None;
        self.actual.on_signal(Signal::Complete);
      }
    }
  }
}

// ==================== MapErr ====================

pub struct MapErr<P, F> {
  source: P,
  f: Arc<F>,
}

impl<P, F> MapErr<P, F> {
  pub fn new(source: P, f: F) -> Self { Self { source, f: Arc::new(f) } }
}

impl<P, F, E2> Publisher for MapErr<P, F>
where
  P: Publisher,
  F: Fn(P::Err) -> E2 + Send + Sync + 'static,
  E2: Send + 'static,
{
  type Item = P::Item;
  type Err = E2;

  fn actual_subscribe<S>(&self, subscriber: S)
  where
    S: Subscriber<P::Item, E2> + 'static,
  {
    self.source.actual_subscribe(MapErrSubscriber { actual: subscriber, f: self.f.clone() })
  }
}

pub struct MapErrSubscriber<S, F> {
  actual: S,
  f: Arc<F>,
}

impl<S, F, T, E, E2> Subscriber<T, E> for MapErrSubscriber<S, F>
where
  S: Subscriber<T, E2>,
  F: Fn(E) -> E2 + Send + Sync,
{
  fn on_subscribe(&mut self, subscription: SubscriptionRef) {
    self.actual.on_subscribe(subscription)
  }

  fn on_signal(&mut self, signal: Signal<T, E>) {
    let f = &self.f;
    self.actual.on_signal(signal.map_err(|e| f(e)))
  }
}

// ==================== Tests ====================
