//! Subscriber trait and the built-in subscribers.
//!
//! A [`Subscriber`] receives exactly one `on_subscribe`, then any number of
//! [`Signal::Next`] bounded by the demand it granted, then at most one
//! terminal signal. All three stream events arrive through
//! [`Subscriber::on_signal`] so implementations handle them with one
//! exhaustive `match`.

use std::{
  fmt::Debug,
  sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
  },
};

use once_cell::sync::OnceCell;

use crate::{
  error::ProtocolError,
  signal::Signal,
  subscription::{
    request_upstream, Demand, Subscription, SubscriptionHandle, SubscriptionRef, UNBOUNDED,
  },
};

// ============================================================================
// Subscriber Trait
// ============================================================================

/// Consumer side of the protocol.
///
/// Signals for one subscription are never delivered concurrently, but
/// successive calls may happen on different threads.
pub trait Subscriber<T, E>: Send {
  /// Receive the subscription. Called once, before any signal.
  fn on_subscribe(&mut self, subscription: SubscriptionRef);

  /// Receive the next event.
  fn on_signal(&mut self, signal: Signal<T, E>);
}

/// Type-erased subscriber.
pub type BoxedSubscriber<T, E> = Box<dyn Subscriber<T, E>>;

impl<T, E, S> Subscriber<T, E> for Box<S>
where
  S: Subscriber<T, E> + ?Sized,
{
  #[inline]
  fn on_subscribe(&mut self, subscription: SubscriptionRef) { (**self).on_subscribe(subscription) }

  #[inline]
  fn on_signal(&mut self, signal: Signal<T, E>) { (**self).on_signal(signal) }
}

// ============================================================================
// StrictSubscriber
// ============================================================================

/// Enforces the consumer-facing guarantees on behalf of user subscribers.
///
/// Every public `subscribe*` entry point wraps the caller's subscriber in one
/// of these. It drops signals after a terminal or after `cancel`, rejects a
/// second `on_subscribe`, and refuses elements delivered beyond the granted
/// demand.
pub struct StrictSubscriber<S> {
  actual: S,
  state: Arc<StrictState>,
  subscribed: bool,
  done: bool,
}

#[derive(Default)]
struct StrictState {
  upstream: OnceCell<SubscriptionRef>,
  cancelled: AtomicBool,
  demand: Demand,
}

impl<S> StrictSubscriber<S> {
  pub fn new(actual: S) -> Self {
    Self { actual, state: Arc::default(), subscribed: false, done: false }
  }
}

impl Subscription for StrictState {
  fn request(&self, n: u64) -> Result<(), ProtocolError> {
    self.demand.request(n)?;
    if self.cancelled.load(Ordering::Acquire) {
      return Ok(());
    }
    match self.upstream.get() {
      Some(upstream) => upstream.request(n),
      None => Ok(()),
    }
  }

  fn cancel(&self) {
    if !self.cancelled.swap(true, Ordering::AcqRel) {
      if let Some(upstream) = self.upstream.get() {
        upstream.cancel();
      }
    }
  }
}

impl<T, E, S> Subscriber<T, E> for StrictSubscriber<S>
where
  S: Subscriber<T, E>,
{
  fn on_subscribe(&mut self, subscription: SubscriptionRef) {
    if self.subscribed {
      tracing::warn!("on_subscribe called twice; cancelling the second subscription");
      subscription.cancel();
      return;
    }
    self.subscribed = true;
    if self.state.upstream.set(subscription).is_err() {
      return;
    }
    self.actual.on_subscribe(self.state.clone());
  }

  fn on_signal(&mut self, signal: Signal<T, E>) {
    if self.done || self.state.cancelled.load(Ordering::Acquire) {
      tracing::trace!(terminal = signal.is_terminal(), "dropping signal on a closed subscriber");
      return;
    }
    match signal {
      Signal::Next(value) => {
        if self.state.demand.get() == 0 {
          tracing::error!("publisher emitted beyond the granted demand; element dropped");
          return;
        }
        self.state.demand.produced(1);
        self.actual.on_signal(Signal::Next(value));
      }
      terminal => {
        self.done = true;
        self.actual.on_signal(terminal);
      }
    }
  }
}

// ============================================================================
// LambdaSubscriber
// ============================================================================

/// Closure-based subscriber behind `subscribe`, `subscribe_all` and
/// `subscribe_full`.
///
/// Without an `on_subscribe` callback it requests [`UNBOUNDED`].
pub struct LambdaSubscriber<N, Er, C, Sub> {
  next: N,
  error: Option<Er>,
  complete: Option<C>,
  on_subscribe: Option<Sub>,
  handle: SubscriptionHandle,
}

impl<N, Er, C, Sub> LambdaSubscriber<N, Er, C, Sub> {
  pub fn new(next: N, error: Er, complete: C, on_subscribe: Sub, handle: SubscriptionHandle) -> Self {
    Self {
      next,
      error: Some(error),
      complete: Some(complete),
      on_subscribe: Some(on_subscribe),
      handle,
    }
  }
}

impl<T, E, N, Er, C, Sub> Subscriber<T, E> for LambdaSubscriber<N, Er, C, Sub>
where
  N: FnMut(T) + Send,
  Er: FnOnce(E) + Send,
  C: FnOnce() + Send,
  Sub: FnOnce(&SubscriptionRef) + Send,
{
  fn on_subscribe(&mut self, subscription: SubscriptionRef) {
    if !self.handle.attach(subscription.clone()) {
      return;
    }
    if let Some(on_subscribe) = self.on_subscribe.take() {
      on_subscribe(&subscription);
    }
  }

  fn on_signal(&mut self, signal: Signal<T, E>) {
    match signal {
      Signal::Next(value) => (self.next)(value),
      Signal::Error(err) => {
        self.handle.mark_terminated();
        if let Some(on_error) = self.error.take() {
          on_error(err);
        }
      }
      Signal::Complete => {
        self.handle.mark_terminated();
        if let Some(on_complete) = self.complete.take() {
          on_complete();
        }
      }
    }
  }
}

/// Default `on_subscribe` for lambda subscribers.
pub fn request_unbounded(subscription: &SubscriptionRef) {
  request_upstream(&**subscription, UNBOUNDED)
}

/// Default error callback: an error nobody handles is logged, never lost.
pub fn log_unhandled<E: Debug>(err: E) {
  tracing::error!(error = ?err, "error signal reached a subscriber without an error handler");
}

pub fn noop() {}
