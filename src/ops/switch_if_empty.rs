use std::sync::Arc;

use crate::{
  publisher::Publisher,
  signal::Signal,
  subscriber::Subscriber,
  subscription::{SubscriptionArbiter, SubscriptionRef},
};

/// Continue with `alternate` when the source completes without emitting.
///
/// The downstream sees a single subscription for the whole sequence; demand
/// it granted to the empty source carries over to the alternate.
pub struct SwitchIfEmpty<P, Q> {
  source: P,
  alternate: Arc<Q>,
}

impl<P, Q> SwitchIfEmpty<P, Q> {
  pub fn new(source: P, alternate: Q) -> Self { Self { source, alternate: Arc::new(alternate) } }
}

impl<P, Q> Publisher for SwitchIfEmpty<P, Q>
where
  P: Publisher,
  Q: Publisher<Item = P::Item, Err = P::Err>,
{
  type Item = P::Item;
  type Err = P::Err;

  fn actual_subscribe<S>(&self, subscriber: S)
  where
    S: Subscriber<P::Item, P::Err> + 'static,
  {
    self.source.actual_subscribe(SwitchIfEmptySubscriber {
      actual: Some(subscriber),
      alternate: self.alternate.clone(),
      arbiter: Arc::new(SubscriptionArbiter::new()),
      has_value: false,
    })
  }
}

pub struct SwitchIfEmptySubscriber<S, Q> {
  actual: Option<S>,
  alternate: Arc<Q>,
  arbiter: Arc<SubscriptionArbiter>,
  has_value: bool,
}

impl<S, Q, T, E> Subscriber<T, E> for SwitchIfEmptySubscriber<S, Q>
where
  S: Subscriber<T, E> + 'static,
  Q: Publisher<Item = T, Err = E>,
{
  fn on_subscribe(&mut self, subscription: SubscriptionRef) {
    self.arbiter.set(subscription);
    if let Some(actual) = self.actual.as_mut() {
      actual.on_subscribe(self.arbiter.clone());
    }
  }

  fn on_signal(&mut self, signal: Signal<T, E>) {
    match signal {
      Signal::Next(value) => {
        self.has_value = true;
        self.arbiter.produced(1);
        if let Some(actual) = self.actual.as_mut() {
          actual.on_signal(Signal::Next(value));
        }
      }
      Signal::Complete if !self.has_value => {
        if let Some(actual) = self.actual.take() {
          self
            .alternate
            .actual_subscribe(ArbiterSubscriber { actual, arbiter: self.arbiter.clone() });
        }
      }
      terminal => {
        if let Some(mut actual) = self.actual.take() {
          actual.on_signal(terminal);
        }
      }
    }
  }
}

/// Forwards a follow-up source to a downstream that already holds the
/// arbiter.
pub(crate) struct ArbiterSubscriber<S> {
  pub(crate) actual: S,
  pub(crate) arbiter: Arc<SubscriptionArbiter>,
}

impl<S, T, E> Subscriber<T, E> for ArbiterSubscriber<S>
where
  S: Subscriber<T, E>,
{
  fn on_subscribe(&mut self, subscription: SubscriptionRef) { self.arbiter.set(subscription) }

  fn on_signal(&mut self, signal: Signal<T, E>) {
    if signal.is_next() {
      self.arbiter.produced(1);
    }
    self.actual.on_signal(signal)
  }
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use parking_lot::Mutex;

  use crate::{flux, prelude::*};

  #[test]
  fn empty_source_switches() {
    let seen = Arc::new(Mutex::new(vec![]));
    let sink = seen.clone();
    flux::empty::<&str>().switch_if_empty(flux::just("EMPTY")).subscribe(move |v| sink.lock().push(v));
    assert_eq!(*seen.lock(), vec!["EMPTY"]);
  }

  #[test]
  fn non_empty_source_ignores_alternate() {
    let seen = Arc::new(Mutex::new(vec![]));
    let sink = seen.clone();
    let subscribed = Arc::new(Mutex::new(0));
    let counter = subscribed.clone();
    let alternate = flux::just("EMPTY").do_on_subscribe(move |_| *counter.lock() += 1);
    flux::from_iter(vec!["a", "b"])
      .switch_if_empty(alternate)
      .subscribe(move |v| sink.lock().push(v));
    assert_eq!(*seen.lock(), vec!["a", "b"]);
    assert_eq!(*subscribed.lock(), 0);
  }

  #[test]
  fn outstanding_demand_carries_over() {
    let seen = Arc::new(Mutex::new(vec![]));
    let completed = Arc::new(Mutex::new(false));
    let (sink, done) = (seen.clone(), completed.clone());
    let handle = flux::empty::<i64>().switch_if_empty(flux::range(1, 10)).subscribe_full(
      move |v| sink.lock().push(v),
      |_| {},
      move || *done.lock() = true,
      |s: &SubscriptionRef| s.request(3).unwrap(),
    );
    assert_eq!(*seen.lock(), vec![1, 2, 3]);
    handle.request(2).unwrap();
    assert_eq!(*seen.lock(), vec![1, 2, 3, 4, 5]);
    assert!(!*completed.lock());
  }
}
