use std::sync::Arc;

use once_cell::sync::OnceCell;
use parking_lot::Mutex;

use crate::{
  config::replenish_threshold,
  error::ProtocolError,
  publisher::Publisher,
  signal::Signal,
  subscriber::Subscriber,
  subscription::{request_upstream, validate_request, Subscription, SubscriptionRef, UNBOUNDED},
};

/// Split downstream demand into upstream batches of at most `rate`.
///
/// At most `rate` elements are ever requested and not yet delivered. A new
/// batch goes out once three quarters of the previous one arrived, and never
/// beyond what the downstream itself asked for, so no element has to be
/// queued here.
pub struct LimitRate<P> {
  source: P,
  rate: u64,
}

impl<P> LimitRate<P> {
  /// `rate == 0` is treated as 1.
  pub fn new(source: P, rate: u64) -> Self { Self { source, rate: rate.max(1) } }
}

impl<P: Publisher> Publisher for LimitRate<P> {
  type Item = P::Item;
  type Err = P::Err;

  fn actual_subscribe<S>(&self, subscriber: S)
  where
    S: Subscriber<P::Item, P::Err> + 'static,
  {
    let limit = usize::try_from(self.rate).map_or(self.rate, |r| replenish_threshold(r) as u64);
    let gate = Arc::new(RateGate {
      upstream: OnceCell::new(),
      rate: self.rate,
      limit,
      state: Mutex::new(RateState::default()),
    });
    self.source.actual_subscribe(LimitRateSubscriber { actual: subscriber, gate })
  }
}

#[derive(Default)]
struct RateState {
  /// Downstream demand not yet forwarded.
  pending: u64,
  /// Requested upstream, not yet delivered.
  in_flight: u64,
  /// Delivered since the last batch went out.
  consumed: u64,
}

struct RateGate {
  upstream: OnceCell<SubscriptionRef>,
  rate: u64,
  limit: u64,
  state: Mutex<RateState>,
}

impl RateGate {
  fn next_batch(&self, state: &mut RateState) -> u64 {
    let room = self.rate - state.in_flight;
    if state.pending == 0 || (state.in_flight > 0 && room < self.limit) {
      return 0;
    }
    let batch = state.pending.min(room);
    if state.pending != UNBOUNDED {
      state.pending -= batch;
    }
    state.in_flight += batch;
    state.consumed = 0;
    batch
  }

  fn forward(&self, batch: u64) {
    if batch == 0 {
      return;
    }
    if let Some(upstream) = self.upstream.get() {
      request_upstream(&**upstream, batch);
    }
  }

  fn delivered(&self) {
    let batch = {
      let mut state = self.state.lock();
      state.in_flight = state.in_flight.saturating_sub(1);
      state.consumed += 1;
      if state.consumed >= self.limit || state.in_flight == 0 {
        self.next_batch(&mut state)
      } else {
        0
      }
    };
    self.forward(batch);
  }
}

impl Subscription for RateGate {
  fn request(&self, n: u64) -> Result<(), ProtocolError> {
    validate_request(n)?;
    let batch = {
      let mut state = self.state.lock();
      state.pending = state.pending.saturating_add(n);
      self.next_batch(&mut state)
    };
    self.forward(batch);
    Ok(())
  }

  fn cancel(&self) {
    if let Some(upstream) = self.upstream.get() {
      upstream.cancel();
    }
  }
}

pub struct LimitRateSubscriber<S> {
  actual: S,
  gate: Arc<RateGate>,
}

impl<S, T, E> Subscriber<T, E> for LimitRateSubscriber<S>
where
  S: Subscriber<T, E>,
{
  fn on_subscribe(&mut self, subscription: SubscriptionRef) {
    if self.gate.upstream.set(subscription).is_err() {
      return;
    }
    self.actual.on_subscribe(self.gate.clone())
  }

  fn on_signal(&mut self, signal: Signal<T, E>) {
    let next = signal.is_next();
    self.actual.on_signal(signal);
    if next {
      self.gate.delivered();
    }
  }
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use parking_lot::Mutex;

  use crate::{flux, prelude::*};

  fn requests_of<P: Publisher>(source: P, initial: u64) -> (Arc<Mutex<Vec<u64>>>, Arc<Mutex<usize>>) {
    let requests = Arc::new(Mutex::new(vec![]));
    let count = Arc::new(Mutex::new(0));
    let (r, c) = (requests.clone(), count.clone());
    source.do_on_request(move |n| r.lock().push(n)).limit_rate(3).subscribe_full(
      move |_| *c.lock() += 1,
      |_| {},
      || {},
      move |s: &SubscriptionRef| s.request(initial).unwrap(),
    );
    (requests, count)
  }

  #[test]
  fn unbounded_downstream_is_batched() {
    let (requests, count) = requests_of(flux::range(1, 10), UNBOUNDED);
    assert_eq!(*count.lock(), 10);
    assert_eq!(*requests.lock(), vec![3, 3, 3, 3]);
  }

  #[test]
  fn small_downstream_demand_is_not_exceeded() {
    let (requests, count) = requests_of(flux::range(1, 10), 2);
    assert_eq!(*count.lock(), 2);
    assert_eq!(*requests.lock(), vec![2]);
  }

  #[test]
  fn batches_of_larger_rates_replenish_early() {
    let requests = Arc::new(Mutex::new(vec![]));
    let r = requests.clone();
    flux::range(1, 20).do_on_request(move |n| r.lock().push(n)).limit_rate(8).subscribe(|_| {});
    // 8 up front, then 6 each time three quarters of a batch arrived
    assert_eq!(requests.lock()[0], 8);
    assert!(requests.lock()[1..].iter().all(|n| *n <= 8));
    assert!(requests.lock().iter().sum::<u64>() >= 20);
  }

  #[test]
  fn cancel_reaches_upstream() {
    let cancels = Arc::new(Mutex::new(0));
    let c = cancels.clone();
    let seen = Arc::new(Mutex::new(vec![]));
    let sink = seen.clone();
    let handle = flux::range(1, 100)
      .do_on_cancel(move || *c.lock() += 1)
      .limit_rate(5)
      .subscribe_full(
        move |v| sink.lock().push(v),
        |_| {},
        || {},
        |s: &SubscriptionRef| s.request(2).unwrap(),
      );
    handle.cancel();
    handle.request(10).unwrap();
    assert_eq!(*seen.lock(), vec![1, 2]);
    assert_eq!(*cancels.lock(), 1);
  }
}
