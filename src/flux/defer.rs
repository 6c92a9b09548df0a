use crate::{publisher::Publisher, subscriber::Subscriber};

/// Builds a fresh publisher with `factory` at each subscription.
///
/// Nothing the factory captures is evaluated before a subscriber arrives,
/// which is what separates `defer(|| just(now()))` from `just(now())`.
///
/// ```rust
/// use std::sync::{
///   atomic::{AtomicUsize, Ordering},
///   Arc,
/// };
///
/// use rxflux::prelude::*;
///
/// let calls = Arc::new(AtomicUsize::new(0));
/// let c = calls.clone();
/// let deferred = flux::defer(move || flux::just(c.fetch_add(1, Ordering::SeqCst)));
/// assert_eq!(calls.load(Ordering::SeqCst), 0);
/// deferred.subscribe(|_| {});
/// deferred.subscribe(|_| {});
/// assert_eq!(calls.load(Ordering::SeqCst), 2);
/// ```
pub fn defer<P, F>(factory: F) -> Defer<F>
where
  F: Fn() -> P,
{
  Defer { factory }
}

#[derive(Clone)]
pub struct Defer<F> {
  factory: F,
}

impl<P, F> Publisher for Defer<F>
where
  F: Fn() -> P + Send + Sync + 'static,
  P: Publisher,
{
  type Item = P::Item;
  type Err = P::Err;

  fn actual_subscribe<S>(&self, subscriber: S)
  where
    S: Subscriber<P::Item, P::Err> + 'static,
  {
    (self.factory)().actual_subscribe(subscriber)
  }
}

#[cfg(test)]
mod tests {
  use std::{
    sync::{
      atomic::{AtomicU64, Ordering},
      Arc,
    },
    thread,
    time::{Duration, Instant},
  };

  use parking_lot::Mutex;

  use crate::prelude::*;

  #[test]
  fn each_subscription_sees_its_own_value() {
    let clock = Arc::new(AtomicU64::new(100));
    let c = clock.clone();
    let eager = flux::just(clock.load(Ordering::SeqCst));
    let deferred = flux::defer(move || flux::just(c.load(Ordering::SeqCst)));

    let seen = Arc::new(Mutex::new(vec![]));
    for _ in 0..2 {
      let s = seen.clone();
      eager.subscribe(move |v| s.lock().push(("eager", v)));
      let s = seen.clone();
      deferred.subscribe(move |v| s.lock().push(("defer", v)));
      clock.fetch_add(1, Ordering::SeqCst);
    }
    assert_eq!(
      *seen.lock(),
      vec![("eager", 100), ("defer", 100), ("eager", 100), ("defer", 101)]
    );
  }

  #[test]
  fn captured_timestamps_differ() {
    let stamps = Arc::new(Mutex::new(vec![]));
    let deferred = flux::defer(|| flux::just(Instant::now()));
    for _ in 0..2 {
      let s = stamps.clone();
      deferred.subscribe(move |t| s.lock().push(t));
      thread::sleep(Duration::from_millis(5));
    }
    let stamps = stamps.lock();
    assert!(stamps[1] > stamps[0]);
  }
}
