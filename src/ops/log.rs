use std::{fmt::Debug, sync::Arc};

use crate::{
  error::ProtocolError,
  publisher::Publisher,
  signal::Signal,
  subscriber::Subscriber,
  subscription::{describe_demand, Subscription, SubscriptionRef},
};

/// Category used when the caller names none.
pub const DEFAULT_CATEGORY: &str = "rxflux.Flux";

/// Report every protocol event passing this point through `tracing`.
///
/// Events are emitted at `INFO` under the `rxflux::log` target with a
/// `category` field, one line each:
///
/// ```text
/// onSubscribe
/// request(unbounded)
/// onNext(1)
/// onComplete()
/// ```
///
/// Requests and cancellation travel upstream, so they are logged from the
/// subscription handed to the downstream.
pub struct Log<P> {
  source: P,
  category: Arc<str>,
}

impl<P> Log<P> {
  pub fn new(source: P, category: Option<String>) -> Self {
    let category = category.map_or_else(|| Arc::from(DEFAULT_CATEGORY), Arc::from);
    Self { source, category }
  }
}

impl<P> Publisher for Log<P>
where
  P: Publisher,
  P::Item: Debug,
  P::Err: Debug,
{
  type Item = P::Item;
  type Err = P::Err;

  fn actual_subscribe<S>(&self, subscriber: S)
  where
    S: Subscriber<P::Item, P::Err> + 'static,
  {
    self
      .source
      .actual_subscribe(LogSubscriber { actual: subscriber, category: self.category.clone() })
  }
}

pub struct LogSubscriber<S> {
  actual: S,
  category: Arc<str>,
}

impl<S, T, E> Subscriber<T, E> for LogSubscriber<S>
where
  S: Subscriber<T, E>,
  T: Debug,
  E: Debug,
{
  fn on_subscribe(&mut self, subscription: SubscriptionRef) {
    tracing::info!(target: "rxflux::log", category = %self.category, "onSubscribe");
    self
      .actual
      .on_subscribe(Arc::new(LoggedSubscription { upstream: subscription, category: self.category.clone() }))
  }

  fn on_signal(&mut self, signal: Signal<T, E>) {
    match &signal {
      Signal::Next(value) => {
        tracing::info!(target: "rxflux::log", category = %self.category, "onNext({:?})", value)
      }
      Signal::Error(err) => {
        tracing::error!(target: "rxflux::log", category = %self.category, "onError({:?})", err)
      }
      Signal::Complete => {
        tracing::info!(target: "rxflux::log", category = %self.category, "onComplete()")
      }
    }
    self.actual.on_signal(signal)
  }
}

struct LoggedSubscription {
  upstream: SubscriptionRef,
  category: Arc<str>,
}

impl Subscription for LoggedSubscription {
  fn request(&self, n: u64) -> Result<(), ProtocolError> {
    tracing::info!(target: "rxflux::log", category = %self.category, "request({})", describe_demand(n));
    self.upstream.request(n)
  }

  fn cancel(&self) {
    tracing::info!(target: "rxflux::log", category = %self.category, "cancel()");
    self.upstream.cancel()
  }
}
