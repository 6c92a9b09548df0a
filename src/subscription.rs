//! Subscription protocol: demand and cancellation.
//!
//! A [`Subscription`] binds one publisher activation to one subscriber. The
//! subscriber grants demand with [`Subscription::request`] and may stop the
//! flow at any time with [`Subscription::cancel`]. Both calls may arrive from
//! any thread, so every implementation keeps its counters atomic.

use std::{
  fmt::{Debug, Formatter},
  sync::{
    atomic::{AtomicU64, AtomicUsize, Ordering},
    Arc,
  },
};

use crate::error::ProtocolError;

mod arbiter;
mod handle;

pub use arbiter::SubscriptionArbiter;
pub use handle::{SubscriptionGuard, SubscriptionHandle};

/// Demand sentinel meaning "send everything you have".
pub const UNBOUNDED: u64 = u64::MAX;

/// Handle through which a subscriber controls one publisher activation.
pub trait Subscription: Send + Sync {
  /// Add `n` to the outstanding demand. `n == 0` is a protocol violation and
  /// is reported to the caller; the subscriber is not notified.
  fn request(&self, n: u64) -> Result<(), ProtocolError>;

  /// Stop the flow. Idempotent; once it returns no further signal reaches the
  /// subscriber, apart from one already being delivered on another thread.
  fn cancel(&self);
}

pub type SubscriptionRef = Arc<dyn Subscription>;

impl Debug for dyn Subscription {
  fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result { f.write_str("dyn Subscription") }
}

/// Check a request amount without recording it.
#[inline]
pub fn validate_request(n: u64) -> Result<u64, ProtocolError> {
  if n == 0 {
    Err(ProtocolError::NonPositiveRequest { requested: n })
  } else {
    Ok(n)
  }
}

/// Render a demand amount the way the log operator prints it.
pub fn describe_demand(n: u64) -> String {
  if n == UNBOUNDED {
    "unbounded".to_owned()
  } else {
    n.to_string()
  }
}

/// Forward demand to an upstream the operator itself controls. The amount is
/// computed internally and always positive, so a failure here is a bug worth
/// surfacing in the logs rather than in the stream.
pub(crate) fn request_upstream(upstream: &dyn Subscription, n: u64) {
  if let Err(err) = upstream.request(n) {
    tracing::error!(%err, "operator issued an invalid upstream request");
  }
}

// ============================================================================
// Demand
// ============================================================================

/// Outstanding demand of one subscription.
///
/// Additions saturate at [`UNBOUNDED`]; once unbounded the counter never
/// decreases.
#[derive(Debug, Default)]
pub struct Demand(AtomicU64);

impl Demand {
  pub fn new() -> Self { Self::default() }

  #[inline]
  pub fn get(&self) -> u64 { self.0.load(Ordering::Acquire) }

  #[inline]
  pub fn is_unbounded(&self) -> bool { self.get() == UNBOUNDED }

  /// Validate `n` and add it, returning the demand held before the call.
  pub fn request(&self, n: u64) -> Result<u64, ProtocolError> {
    validate_request(n)?;
    let mut current = self.0.load(Ordering::Acquire);
    loop {
      if current == UNBOUNDED {
        return Ok(current);
      }
      let next = current.saturating_add(n);
      match self.0.compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire) {
        Ok(prev) => return Ok(prev),
        Err(actual) => current = actual,
      }
    }
  }

  /// Record `n` emitted elements, returning what remains.
  pub fn produced(&self, n: u64) -> u64 {
    let mut current = self.0.load(Ordering::Acquire);
    loop {
      if current == UNBOUNDED || n == 0 {
        return current;
      }
      let next = current.saturating_sub(n);
      match self.0.compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire) {
        Ok(_) => return next,
        Err(actual) => current = actual,
      }
    }
  }
}

// ============================================================================
// Work-in-progress counter
// ============================================================================

/// Serializes a drain loop between threads without holding a lock while
/// signalling downstream.
///
/// Whoever moves the counter from zero owns the loop; everybody else only
/// bumps it, and the owner keeps looping until it sees no missed work.
#[derive(Debug, Default)]
pub(crate) struct Wip(AtomicUsize);

impl Wip {
  /// A counter already owned by the caller, used while a subscriber's
  /// `on_subscribe` runs so that re-entrant requests only mark work.
  pub(crate) fn held() -> Self { Self(AtomicUsize::new(1)) }

  /// Returns `true` when the caller became the owner.
  #[inline]
  pub(crate) fn enter(&self) -> bool { self.0.fetch_add(1, Ordering::AcqRel) == 0 }

  /// Give back `missed` units of work. Zero means ownership was released.
  #[inline]
  pub(crate) fn leave(&self, missed: usize) -> usize {
    self.0.fetch_sub(missed, Ordering::AcqRel) - missed
  }
}

// ============================================================================
// EmptySubscription
// ============================================================================

/// Subscription with nothing behind it, handed out by sources that terminate
/// right away.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptySubscription;

impl Subscription for EmptySubscription {
  fn request(&self, n: u64) -> Result<(), ProtocolError> { validate_request(n).map(|_| ()) }

  fn cancel(&self) {}
}

pub fn empty_subscription() -> SubscriptionRef { Arc::new(EmptySubscription) }

#[cfg(test)]
mod tests {
  use std::thread;

  use super::*;

  #[test]
  fn zero_request_is_rejected() {
    let demand = Demand::new();
    assert_eq!(demand.request(0), Err(ProtocolError::NonPositiveRequest { requested: 0 }));
    assert_eq!(demand.get(), 0);
    assert!(EmptySubscription.request(0).is_err());
    assert!(EmptySubscription.request(1).is_ok());
  }

  #[test]
  fn demand_saturates_at_unbounded() {
    let demand = Demand::new();
    demand.request(5).unwrap();
    demand.request(UNBOUNDED - 1).unwrap();
    assert!(demand.is_unbounded());
    assert_eq!(demand.produced(100), UNBOUNDED);
    assert!(demand.is_unbounded());
  }

  #[test]
  fn produced_decrements() {
    let demand = Demand::new();
    demand.request(3).unwrap();
    assert_eq!(demand.produced(1), 2);
    assert_eq!(demand.produced(2), 0);
  }

  #[test]
  fn concurrent_requests_add_up() {
    let demand = Arc::new(Demand::new());
    let workers: Vec<_> = (0..8)
      .map(|_| {
        let demand = demand.clone();
        thread::spawn(move || {
          for _ in 0..1000 {
            demand.request(1).unwrap();
          }
        })
      })
      .collect();
    for w in workers {
      w.join().unwrap();
    }
    assert_eq!(demand.get(), 8000);
  }

  #[test]
  fn wip_ownership() {
    let wip = Wip::default();
    assert!(wip.enter());
    assert!(!wip.enter());
    assert_eq!(wip.leave(1), 1);
    assert_eq!(wip.leave(1), 0);
    assert!(wip.enter());
  }

  #[test]
  fn describe() {
    assert_eq!(describe_demand(UNBOUNDED), "unbounded");
    assert_eq!(describe_demand(3), "3");
  }
}
