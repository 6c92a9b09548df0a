use std::sync::{
  atomic::{AtomicBool, Ordering},
  Arc,
};

use once_cell::sync::OnceCell;
use parking_lot::Mutex;

use crate::{
  error::ProtocolError,
  publisher::Publisher,
  signal::Signal,
  subscriber::Subscriber,
  subscription::{empty_subscription, validate_request, Subscription, SubscriptionRef},
};

/// Emits only the first `count` elements, then cancels the upstream and
/// completes.
///
/// Upstream demand is capped so the source is never asked for more than
/// `count` elements in total, even when the downstream requests unbounded.
///
/// ```rust
/// use std::sync::Arc;
///
/// use rxflux::{prelude::*, scheduler::VirtualTimeScheduler};
///
/// let vts = Arc::new(VirtualTimeScheduler::new());
/// flux::interval(Duration::from_secs(1), vts.clone()).take(5).subscribe(|v| println!("{v}"));
/// ```
pub struct Take<P> {
  source: P,
  count: u64,
}

impl<P> Take<P> {
  pub fn new(source: P, count: u64) -> Self { Self { source, count } }
}

impl<P: Publisher> Publisher for Take<P> {
  type Item = P::Item;
  type Err = P::Err;

  fn actual_subscribe<S>(&self, mut subscriber: S)
  where
    S: Subscriber<P::Item, P::Err> + 'static,
  {
    if self.count == 0 {
      subscriber.on_subscribe(empty_subscription());
      subscriber.on_signal(Signal::Complete);
      return;
    }
    let gate = Arc::new(TakeGate {
      upstream: OnceCell::new(),
      granted: Mutex::new(0),
      limit: self.count,
      done: AtomicBool::new(false),
    });
    self.source.actual_subscribe(TakeSubscriber { actual: subscriber, gate, remaining: self.count })
  }
}

/// The subscription handed downstream: clamps requests to what is left of
/// the limit.
struct TakeGate {
  upstream: OnceCell<SubscriptionRef>,
  granted: Mutex<u64>,
  limit: u64,
  done: AtomicBool,
}

impl Subscription for TakeGate {
  fn request(&self, n: u64) -> Result<(), ProtocolError> {
    validate_request(n)?;
    let forward = {
      let mut granted = self.granted.lock();
      let forward = n.min(self.limit - *granted);
      *granted += forward;
      forward
    };
    match self.upstream.get() {
      Some(upstream) if forward > 0 && !self.done.load(Ordering::Acquire) => {
        upstream.request(forward)
      }
      _ => Ok(()),
    }
  }

  fn cancel(&self) {
    if !self.done.swap(true, Ordering::AcqRel) {
      if let Some(upstream) = self.upstream.get() {
        upstream.cancel();
      }
    }
  }
}

pub struct TakeSubscriber<S> {
  actual: S,
  gate: Arc<TakeGate>,
  remaining: u64,
}

impl<S, T, E> Subscriber<T, E> for TakeSubscriber<S>
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
    if self.remaining == 0 {
      return;
    }
    match signal {
      Signal::Next(value) => {
        self.remaining -= 1;
        self.actual.on_signal(Signal::Next(value));
        if self.remaining == 0 {
          self.gate.cancel();
          self.actual.on_signal(Signal::Complete);
        }
      }
      terminal => {
        self.remaining = 0;
        self.actual.on_signal(terminal)
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
  };

  use parking_lot::Mutex;

  use crate::{prelude::*, scheduler::VirtualTimeScheduler};

  #[test]
  fn caps_upstream_demand() {
    let requested = Arc::new(AtomicU64::new(0));
    let r = requested.clone();
    let out = Arc::new(Mutex::new(vec![]));
    let o = out.clone();
    flux::range(0, 100)
      .do_on_request(move |n| {
        r.fetch_add(n, Ordering::SeqCst);
      })
      .take(3)
      .subscribe(move |v| o.lock().push(v));
    assert_eq!(*out.lock(), vec![0, 1, 2]);
    assert_eq!(requested.load(Ordering::SeqCst), 3);
  }

  #[test]
  fn zero_completes_immediately() {
    let done = Arc::new(Mutex::new(false));
    let d = done.clone();
    flux::never::<i32>().take(0).subscribe_all(|_| {}, |_| {}, move || *d.lock() = true);
    assert!(*done.lock());
  }

  #[test]
  fn bounds_an_interval() {
    let vts = Arc::new(VirtualTimeScheduler::new());
    let out = Arc::new(Mutex::new(vec![]));
    let (o, c) = (out.clone(), out.clone());
    flux::interval(Duration::from_millis(100), vts.clone()).take(10).subscribe_all(
      move |v| o.lock().push(v as i64),
      |_| {},
      move || c.lock().push(-1),
    );
    vts.advance_by(Duration::from_secs(5));
    assert_eq!(*out.lock(), vec![0, 1, 2, 3, 4, 5, 6, 7, 8, 9, -1]);
    assert!(vts.is_idle());
  }
}
