//! `filter` and `try_filter`.
//!
//! A rejected element was paid for with upstream demand the downstream never
//! sees, so the operator requests one more element for each rejection.
//!
//! ```rust
//! use std::sync::{Arc, Mutex};
//!
//! use rxflux::prelude::*;
//!
//! let coll = Arc::new(Mutex::new(vec![]));
//! let c = coll.clone();
//! flux::range(0, 10)
//!   .filter(|v| *v % 2 == 0)
//!   .subscribe(move |v| c.lock().unwrap().push(v));
//!
//! // only even numbers received.
//! assert_eq!(*coll.lock().unwrap(), vec![0, 2, 4, 6, 8]);
//! ```

use std::sync::Arc;

use crate::{
  publisher::Publisher,
  signal::Signal,
  subscriber::Subscriber,
  subscription::{request_upstream, SubscriptionRef},
};

// ==================== Filter ====================

pub struct Filter<P, F> {
  source: P,
  predicate: Arc<F>,
}

impl<P, F> Filter<P, F> {
  pub fn new(source: P, predicate: F) -> Self { Self { source, predicate: Arc::new(predicate) } }
}

impl<P, F> Publisher for Filter<P, F>
where
  P: Publisher,
  F: Fn(&P::Item) -> bool + Send + Sync + 'static,
{
  type Item = P::Item;
  type Err = P::Err;

  fn actual_subscribe<S>(&self, subscriber: S)
  where
    S: Subscriber<P::Item, P::Err> + 'static,
  {
    self.source.actual_subscribe(FilterSubscriber {
      actual: subscriber,
      predicate: self.predicate.clone(),
      upstream: None,
    })
  }
}

pub struct FilterSubscriber<S, F> {
  actual: S,
  predicate: Arc<F>,
  upstream: Option<SubscriptionRef>,
}

impl<S, F> FilterSubscriber<S, F> {
  fn backfill(&self) {
    if let Some(upstream) = &self.upstream {
      request_upstream(&**upstream, 1);
    }
  }
}

impl<S, F, T, E> Subscriber<T, E> for FilterSubscriber<S, F>
where
  S: Subscriber<T, E>,
  F: Fn(&T) -> bool + Send + Sync,
{
  fn on_subscribe(&mut self, subscription: SubscriptionRef) {
    self.upstream = Some(subscription.clone());
    self.actual.on_subscribe(subscription)
  }

  fn on_signal(&mut self, signal: Signal<T, E>) {
    match signal {
      Signal::Next(value) => {
        if (self.predicate)(&value) {
          self.actual.on_signal(Signal::Next(value))
        } else {
          self.backfill()
        }
      }
      terminal => {
        self.upstream = None;
        self.actual.on_signal(terminal)
      }
    }
  }
}

// ==================== TryFilter ====================

pub struct TryFilter<P, F> {
  source: P,
  predicate: Arc<F>,
}

impl<P, F> TryFilter<P, F> {
  pub fn new(source: P, predicate: F) -> Self { Self { source, predicate: Arc::new(predicate) } }
}

impl<P, F> Publisher for TryFilter<P, F>
where
  P: Publisher,
  F: Fn(&P::Item) -> Result<bool, P::Err> + Send + Sync + 'static,
{
  type Item = P::Item;
  type Err = P::Err;

  fn actual_subscribe<S>(&self, subscriber: S)
  where
    S: Subscriber<P::Item, P::Err> + 'static,
  {
    self.source.actual_subscribe(TryFilterSubscriber {
      inner: FilterSubscriber {
        actual: subscriber,
        predicate: self.predicate.clone(),
        upstream: None,
      },
      done: false,
    })
  }
}

pub struct TryFilterSubscriber<S, F> {
  inner: FilterSubscriber<S, F>,
  done: bool,
}

impl<S, F, T, E> Subscriber<T, E> for TryFilterSubscriber<S, F>
where
  S: Subscriber<T, E>,
  F: Fn(&T) -> Result<bool, E> + Send + Sync,
{
  fn on_subscribe(&mut self, subscription: SubscriptionRef) {
    self.inner.upstream = Some(subscription.clone());
    self.inner.actual.on_subscribe(subscription)
  }

  fn on_signal(&mut self, signal: Signal<T, E>) {
    if self.done {
      return;
    }
    let inner = &mut self.inner;
    match signal {
      Signal::Next(value) => match (inner.predicate)(&value) {
        Ok(true) => inner.actual.on_signal(Signal::Next(value)),
        Ok(false) => inner.backfill(),
        Err(err) => {
          self.done = true;
          if let Some(upstream) = inner.upstream.take() {
            upstream.cancel();
          }
          inner.actual.on_signal(Signal::Error(err));
        }
      },
      terminal => {
        self.done = true;
        inner.upstream = None;
        inner.actual.on_signal(terminal)
      }
    }
  }
}

// ==================== Tests ====================

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use parking_lot::Mutex;

  use crate::{prelude::*, signal::Signal};

  #[test]
  fn rejected_elements_do_not_consume_demand() {
    let out = Arc::new(Mutex::new(vec![]));
    let o = out.clone();
    flux::range(1, 20).filter(|v| v % 3 == 0).subscribe_full(
      move |v| o.lock().push(v),
      |_| {},
      || {},
      |s: &SubscriptionRef| s.request(4).unwrap(),
    );
    assert_eq!(*out.lock(), vec![3, 6, 9, 12]);
  }

  #[test]
  fn predicate_error_terminates() {
    let out = Arc::new(Mutex::new(vec![]));
    let (n, e) = (out.clone(), out.clone());
    flux::range(1, 10)
      .with_err::<&str>()
      .try_filter(|v| if *v > 2 { Err("too big") } else { Ok(true) })
      .subscribe_all(
        move |v| n.lock().push(Signal::Next(v)),
        move |err| e.lock().push(Signal::Error(err)),
        || {},
      );
    assert_eq!(*out.lock(), vec![Signal::Next(1), Signal::Next(2), Signal::Error("too big")]);
  }
}
