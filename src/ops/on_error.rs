use std::sync::Arc;

use super::switch_if_empty::ArbiterSubscriber;
use crate::{
  flux,
  publisher::{Publisher, PublisherExt},
  signal::Signal,
  subscriber::Subscriber,
  subscription::{SubscriptionArbiter, SubscriptionRef},
};

// ==================== OnErrorResume ====================

/// Replace an upstream error with the publisher built from it.
///
/// Elements already delivered stay delivered; the fallback picks up the
/// demand the failed source left unsatisfied.
pub struct OnErrorResume<P, F> {
  source: P,
  fallback: Arc<F>,
}

impl<P, F> OnErrorResume<P, F> {
  pub fn new(source: P, fallback: F) -> Self { Self { source, fallback: Arc::new(fallback) } }
}

impl<P, F, Q> Publisher for OnErrorResume<P, F>
where
  P: Publisher,
  F: Fn(P::Err) -> Q + Send + Sync + 'static,
  Q: Publisher<Item = P::Item>,
{
  type Item = P::Item;
  type Err = Q::Err;

  fn actual_subscribe<S>(&self, subscriber: S)
  where
    S: Subscriber<P::Item, Q::Err> + 'static,
  {
    self.source.actual_subscribe(OnErrorResumeSubscriber {
      actual: Some(subscriber),
      fallback: self.fallback.clone(),
      arbiter: Arc::new(SubscriptionArbiter::new()),
    })
  }
}

pub struct OnErrorResumeSubscriber<S, F> {
  actual: Option<S>,
  fallback: Arc<F>,
  arbiter: Arc<SubscriptionArbiter>,
}

impl<S, F, Q, T, E> Subscriber<T, E> for OnErrorResumeSubscriber<S, F>
where
  S: Subscriber<T, Q::Err> + 'static,
  F: Fn(E) -> Q + Send + Sync,
  Q: Publisher<Item = T>,
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
        self.arbiter.produced(1);
        if let Some(actual) = self.actual.as_mut() {
          actual.on_signal(Signal::Next(value));
        }
      }
      Signal::Error(err) => {
        if let Some(actual) = self.actual.take() {
          tracing::debug!("resuming after upstream error");
          (self.fallback)(err)
            .actual_subscribe(ArbiterSubscriber { actual, arbiter: self.arbiter.clone() });
        }
      }
      Signal::Complete => {
        if let Some(mut actual) = self.actual.take() {
          actual.on_signal(Signal::Complete);
        }
      }
    }
  }
}

// ==================== OnErrorReturn ====================

/// Replace an upstream error with one fallback element and completion.
///
/// The fallback element still waits for downstream demand.
pub struct OnErrorReturn<P: Publisher> {
  source: P,
  value: P::Item,
}

impl<P: Publisher> OnErrorReturn<P> {
  pub fn new(source: P, value: P::Item) -> Self { Self { source, value } }
}

impl<P> Publisher for OnErrorReturn<P>
where
  P: Publisher,
  P::Item: Clone + Sync,
{
  type Item = P::Item;
  type Err = P::Err;

  fn actual_subscribe<S>(&self, subscriber: S)
  where
    S: Subscriber<P::Item, P::Err> + 'static,
  {
    self.source.actual_subscribe(OnErrorReturnSubscriber {
      actual: Some(subscriber),
      value: self.value.clone(),
      arbiter: Arc::new(SubscriptionArbiter::new()),
    })
  }
}

pub struct OnErrorReturnSubscriber<S, T> {
  actual: Option<S>,
  value: T,
  arbiter: Arc<SubscriptionArbiter>,
}

impl<S, T, E> Subscriber<T, E> for OnErrorReturnSubscriber<S, T>
where
  S: Subscriber<T, E> + 'static,
  T: Clone + Send + Sync + 'static,
  E: Send + 'static,
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
        self.arbiter.produced(1);
        if let Some(actual) = self.actual.as_mut() {
          actual.on_signal(Signal::Next(value));
        }
      }
      Signal::Error(_) => {
        if let Some(actual) = self.actual.take() {
          flux::just(self.value.clone())
            .with_err::<E>()
            .actual_subscribe(ArbiterSubscriber { actual, arbiter: self.arbiter.clone() });
        }
      }
      Signal::Complete => {
        if let Some(mut actual) = self.actual.take() {
          actual.on_signal(Signal::Complete);
        }
      }
    }
  }
}
