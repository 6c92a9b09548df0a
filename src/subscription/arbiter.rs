use parking_lot::Mutex;

use super::{request_upstream, validate_request, Subscription, SubscriptionRef, UNBOUNDED};
use crate::error::ProtocolError;

/// A subscription that can swap its upstream while keeping the downstream's
/// outstanding demand.
///
/// Operators that continue with a second source after the first one ended
/// (`switch_if_empty`, `on_error_resume`) hand the arbiter to their
/// subscriber once, then [`set`](Self::set) each upstream as it arrives. Any
/// demand not yet satisfied by the previous upstream is requested from the
/// new one.
#[derive(Default)]
pub struct SubscriptionArbiter {
  state: Mutex<ArbiterState>,
}

#[derive(Default)]
struct ArbiterState {
  current: Option<SubscriptionRef>,
  requested: u64,
  cancelled: bool,
}

impl SubscriptionArbiter {
  pub fn new() -> Self { Self::default() }

  /// Install `next` as the active upstream and transfer outstanding demand.
  pub fn set(&self, next: SubscriptionRef) {
    let pending = {
      let mut state = self.state.lock();
      if state.cancelled {
        drop(state);
        next.cancel();
        return;
      }
      state.current = Some(next.clone());
      state.requested
    };
    if pending > 0 {
      request_upstream(&*next, pending);
    }
  }

  /// Record elements delivered downstream.
  pub fn produced(&self, n: u64) {
    let mut state = self.state.lock();
    if state.requested != UNBOUNDED {
      state.requested = state.requested.saturating_sub(n);
    }
  }

  pub fn is_cancelled(&self) -> bool { self.state.lock().cancelled }

  /// Demand requested downstream and not yet produced.
  pub fn outstanding(&self) -> u64 { self.state.lock().requested }
}

impl Subscription for SubscriptionArbiter {
  fn request(&self, n: u64) -> Result<(), ProtocolError> {
    validate_request(n)?;
    let current = {
      let mut state = self.state.lock();
      if state.cancelled {
        return Ok(());
      }
      state.requested = state.requested.saturating_add(n);
      state.current.clone()
    };
    match current {
      Some(upstream) => upstream.request(n),
      None => Ok(()),
    }
  }

  fn cancel(&self) {
    let current = {
      let mut state = self.state.lock();
      if state.cancelled {
        return;
      }
      state.cancelled = true;
      state.current.take()
    };
    if let Some(upstream) = current {
      upstream.cancel();
    }
  }
}

#[cfg(test)]
mod tests {
  use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
  };

  use super::*;

  #[derive(Default)]
  struct Probe {
    requested: AtomicU64,
    cancelled: AtomicBool,
  }

  impl Subscription for Probe {
    fn request(&self, n: u64) -> Result<(), ProtocolError> {
      self.requested.fetch_add(n, Ordering::SeqCst);
      Ok(())
    }

    fn cancel(&self) { self.cancelled.store(true, Ordering::SeqCst); }
  }

  #[test]
  fn demand_before_upstream_is_replayed() {
    let arbiter = SubscriptionArbiter::new();
    arbiter.request(5).unwrap();
    let first = Arc::new(Probe::default());
    arbiter.set(first.clone());
    assert_eq!(first.requested.load(Ordering::SeqCst), 5);
  }

  #[test]
  fn switch_carries_only_unsatisfied_demand() {
    let arbiter = SubscriptionArbiter::new();
    let first = Arc::new(Probe::default());
    arbiter.set(first.clone());
    arbiter.request(10).unwrap();
    arbiter.produced(4);

    let second = Arc::new(Probe::default());
    arbiter.set(second.clone());
    assert_eq!(second.requested.load(Ordering::SeqCst), 6);
  }

  #[test]
  fn cancel_propagates_to_current_and_future() {
    let arbiter = SubscriptionArbiter::new();
    let first = Arc::new(Probe::default());
    arbiter.set(first.clone());
    arbiter.cancel();
    assert!(first.cancelled.load(Ordering::SeqCst));

    let late = Arc::new(Probe::default());
    arbiter.set(late.clone());
    assert!(late.cancelled.load(Ordering::SeqCst));
    assert!(arbiter.is_cancelled());
  }

  #[test]
  fn zero_request_rejected() {
    let arbiter = SubscriptionArbiter::new();
    assert!(arbiter.request(0).is_err());
    assert_eq!(arbiter.outstanding(), 0);
  }
}
