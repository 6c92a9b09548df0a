use std::sync::{
  atomic::{AtomicBool, Ordering},
  Arc,
};

use parking_lot::Mutex;

use super::{validate_request, Subscription, SubscriptionRef};
use crate::error::ProtocolError;

/// Caller-side view of a subscription, returned by the `subscribe*` family.
///
/// The handle exists before the publisher hands out its subscription, so a
/// `cancel` issued early is remembered and applied on arrival.
#[derive(Clone, Default)]
pub struct SubscriptionHandle(Arc<HandleState>);

#[derive(Default)]
struct HandleState {
  cancelled: AtomicBool,
  terminated: AtomicBool,
  subscription: Mutex<Option<SubscriptionRef>>,
}

impl SubscriptionHandle {
  pub fn new() -> Self { Self::default() }

  /// Attach the live subscription. Returns `false` (and cancels
  /// `subscription`) if this handle was cancelled first.
  pub fn attach(&self, subscription: SubscriptionRef) -> bool {
    let mut slot = self.0.subscription.lock();
    if self.0.cancelled.load(Ordering::Acquire) {
      drop(slot);
      subscription.cancel();
      return false;
    }
    *slot = Some(subscription);
    true
  }

  /// The consumer saw a terminal signal; the upstream is released.
  pub fn mark_terminated(&self) {
    self.0.terminated.store(true, Ordering::Release);
    self.0.subscription.lock().take();
  }

  pub fn is_cancelled(&self) -> bool { self.0.cancelled.load(Ordering::Acquire) }

  /// Cancelled, or the stream reached a terminal signal.
  pub fn is_closed(&self) -> bool {
    self.is_cancelled() || self.0.terminated.load(Ordering::Acquire)
  }

  /// Activates "RAII" behavior: the returned guard cancels on drop.
  ///
  /// **Attention:** if the guard is not bound to a variable it is dropped,
  /// and the subscription cancelled, immediately.
  pub fn unsubscribe_when_dropped(self) -> SubscriptionGuard { SubscriptionGuard(self) }
}

impl Subscription for SubscriptionHandle {
  fn request(&self, n: u64) -> Result<(), ProtocolError> {
    validate_request(n)?;
    let current = self.0.subscription.lock().clone();
    match current {
      Some(subscription) => subscription.request(n),
      None if self.is_closed() => Ok(()),
      None => Err(ProtocolError::NotSubscribed),
    }
  }

  fn cancel(&self) {
    if self.0.cancelled.swap(true, Ordering::AcqRel) {
      return;
    }
    let current = self.0.subscription.lock().take();
    if let Some(subscription) = current {
      subscription.cancel();
    }
  }
}

/// An RAII guard around a [`SubscriptionHandle`]. Dropping it cancels the
/// subscription.
#[must_use]
pub struct SubscriptionGuard(SubscriptionHandle);

impl SubscriptionGuard {
  pub fn handle(&self) -> &SubscriptionHandle { &self.0 }
}

impl Drop for SubscriptionGuard {
  #[inline]
  fn drop(&mut self) { self.0.cancel() }
}

#[cfg(test)]
mod tests {
  use std::sync::atomic::AtomicU64;

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
  fn request_before_attach_fails() {
    let handle = SubscriptionHandle::new();
    assert_eq!(handle.request(1), Err(ProtocolError::NotSubscribed));
    assert_eq!(handle.request(0), Err(ProtocolError::NonPositiveRequest { requested: 0 }));
  }

  #[test]
  fn early_cancel_applies_on_attach() {
    let handle = SubscriptionHandle::new();
    handle.cancel();
    let probe = Arc::new(Probe::default());
    assert!(!handle.attach(probe.clone()));
    assert!(probe.cancelled.load(Ordering::SeqCst));
  }

  #[test]
  fn forwards_after_attach() {
    let handle = SubscriptionHandle::new();
    let probe = Arc::new(Probe::default());
    assert!(handle.attach(probe.clone()));
    handle.request(7).unwrap();
    assert_eq!(probe.requested.load(Ordering::SeqCst), 7);
    assert!(!handle.is_closed());
  }

  #[test]
  fn guard_cancels_on_drop() {
    let handle = SubscriptionHandle::new();
    let probe = Arc::new(Probe::default());
    handle.attach(probe.clone());
    {
      let _guard = handle.clone().unsubscribe_when_dropped();
    }
    assert!(probe.cancelled.load(Ordering::SeqCst));
    assert!(handle.is_closed());
  }
}
