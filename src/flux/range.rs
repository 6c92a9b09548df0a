use std::convert::Infallible;

use super::pull::{subscribe_generator, Generator};
use crate::{publisher::Publisher, subscriber::Subscriber};

/// Emits `count` consecutive integers starting at `start`.
///
/// `count` is clamped so the sequence never runs past `i64::MAX`.
pub fn range(start: i64, count: u64) -> Range {
  let room = (i64::MAX as i128 - start as i128 + 1) as u128;
  let count = (count as u128).min(room) as u64;
  Range { start, count }
}

#[derive(Debug, Clone, Copy)]
pub struct Range {
  start: i64,
  count: u64,
}

impl Publisher for Range {
  type Item = i64;
  type Err = Infallible;

  fn actual_subscribe<S>(&self, subscriber: S)
  where
    S: Subscriber<i64, Infallible> + 'static,
  {
    subscribe_generator(RangeGenerator { next: self.start, remaining: self.count }, subscriber)
  }
}

struct RangeGenerator {
  next: i64,
  remaining: u64,
}

impl Generator for RangeGenerator {
  type Item = i64;
  type Err = Infallible;

  fn finished(&mut self) -> Option<Result<(), Infallible>> {
    (self.remaining == 0).then_some(Ok(()))
  }

  fn produce(&mut self) -> Option<Result<i64, Infallible>> {
    let value = self.next;
    self.remaining -= 1;
    if self.remaining > 0 {
      self.next += 1;
    }
    Some(Ok(value))
  }
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use parking_lot::Mutex;

  use crate::prelude::*;

  fn collect(publisher: impl Publisher<Item = i64, Err = std::convert::Infallible>) -> Vec<i64> {
    let out = Arc::new(Mutex::new(vec![]));
    let o = out.clone();
    publisher.subscribe(move |v| o.lock().push(v));
    let v = out.lock().clone();
    v
  }

  #[test]
  fn one_to_five() {
    assert_eq!(collect(flux::range(1, 5)), vec![1, 2, 3, 4, 5]);
  }

  #[test]
  fn empty_range() {
    assert!(collect(flux::range(10, 0)).is_empty());
  }

  #[test]
  fn clamped_at_max() {
    assert_eq!(collect(flux::range(i64::MAX - 1, 10)), vec![i64::MAX - 1, i64::MAX]);
  }

  #[test]
  fn limited_request() {
    let out = Arc::new(Mutex::new(vec![]));
    let o = out.clone();
    flux::range(1, 100).subscribe_full(
      move |v| o.lock().push(v),
      |_| {},
      || {},
      |s: &SubscriptionRef| s.request(3).unwrap(),
    );
    assert_eq!(*out.lock(), vec![1, 2, 3]);
  }
}
