//! The `Publisher` trait and its fluent extension.
//!
//! A publisher chain is an immutable value: every operator method consumes
//! the upstream and returns a new struct wrapping it, so the whole chain is
//! one statically composed type. Subscribing takes `&self` and walks the
//! chain to build fresh per-subscription state, which makes every chain cold
//! and reusable. The only shared, hot publisher is
//! [`ConnectableFlux`](crate::connectable::ConnectableFlux).
//!
//! ```rust
//! use std::sync::{Arc, Mutex};
//!
//! use rxflux::prelude::*;
//!
//! let seen = Arc::new(Mutex::new(vec![]));
//! let sink = seen.clone();
//! let chain = flux::range(1, 5).filter(|v| v % 2 == 1).map(|v| v * 10);
//!
//! chain.subscribe(move |v| sink.lock().unwrap().push(v));
//! assert_eq!(*seen.lock().unwrap(), vec![10, 30, 50]);
//! ```

use std::{convert::Infallible, fmt::Debug, sync::Arc};

use crate::{
  config::{SMALL_BUFFER_SIZE, XS_BUFFER_SIZE},
  connectable::ConnectableFlux,
  ops::{
    delay_elements::DelayElements,
    filter::{Filter, TryFilter},
    flat_map::FlatMap,
    into_stream::PublisherStream,
    lifecycle::{
      DoOnCancel, DoOnComplete, DoOnError, DoOnNext, DoOnRequest, DoOnSubscribe, DoOnSuccess,
      TryDoOnComplete, TryDoOnNext,
    },
    limit_rate::LimitRate,
    log::Log,
    map::{Map, MapErr, TryMap},
    on_error::{OnErrorResume, OnErrorReturn},
    publish_on::PublishOn,
    subscribe_on::SubscribeOn,
    switch_if_empty::SwitchIfEmpty,
    take::Take,
  },
  scheduler::{Duration, SchedulerRef},
  subscriber::{
    log_unhandled, noop, request_unbounded, BoxedSubscriber, LambdaSubscriber, StrictSubscriber,
    Subscriber,
  },
  subscription::{SubscriptionHandle, SubscriptionRef},
};

// ============================================================================
// Publisher Trait
// ============================================================================

/// Producer of a possibly infinite sequence, inert until subscribed.
pub trait Publisher: Send + Sync + 'static {
  type Item: Send + 'static;
  type Err: Send + 'static;

  /// Materialize one activation for `subscriber`.
  ///
  /// This is the raw entry point used by operators. It does not guard the
  /// subscriber against protocol violations; user code goes through
  /// [`PublisherExt::subscribe_with`] or the closure-based `subscribe*`
  /// methods instead.
  fn actual_subscribe<S>(&self, subscriber: S)
  where
    S: Subscriber<Self::Item, Self::Err> + 'static;
}

// ============================================================================
// Type erasure
// ============================================================================

/// Object-safe mirror of [`Publisher`].
pub trait DynPublisher<T, E>: Send + Sync {
  fn dyn_subscribe(&self, subscriber: BoxedSubscriber<T, E>);
}

impl<P: Publisher> DynPublisher<P::Item, P::Err> for P {
  #[inline]
  fn dyn_subscribe(&self, subscriber: BoxedSubscriber<P::Item, P::Err>) {
    self.actual_subscribe(subscriber)
  }
}

/// A type-erased, cheaply cloneable publisher.
///
/// Useful when branches of a program build differently shaped chains that
/// must share one type, e.g. `if cond { a.boxed() } else { b.boxed() }`.
pub struct BoxedPublisher<T, E>(Arc<dyn DynPublisher<T, E>>);

impl<T, E> Clone for BoxedPublisher<T, E> {
  fn clone(&self) -> Self { Self(self.0.clone()) }
}

impl<T, E> Publisher for BoxedPublisher<T, E>
where
  T: Send + 'static,
  E: Send + 'static,
{
  type Item = T;
  type Err = E;

  fn actual_subscribe<S>(&self, subscriber: S)
  where
    S: Subscriber<T, E> + 'static,
  {
    self.0.dyn_subscribe(Box::new(subscriber))
  }
}

impl<P: Publisher> Publisher for Arc<P> {
  type Item = P::Item;
  type Err = P::Err;

  #[inline]
  fn actual_subscribe<S>(&self, subscriber: S)
  where
    S: Subscriber<Self::Item, Self::Err> + 'static,
  {
    (**self).actual_subscribe(subscriber)
  }
}

fn absurd<E>(never: Infallible) -> E { match never {} }

// ============================================================================
// PublisherExt
// ============================================================================

/// Operators and subscribe methods, available on every [`Publisher`].
pub trait PublisherExt: Publisher + Sized {
  // --------------------------------------------------------------------------
  // Transformation
  // --------------------------------------------------------------------------

  /// Transform each element with `f`.
  fn map<U, F>(self, f: F) -> Map<Self, F>
  where
    F: Fn(Self::Item) -> U + Send + Sync + 'static,
    U: Send + 'static,
  {
    Map::new(self, f)
  }

  /// Transform each element with a fallible `f`. The first `Err` cancels the
  /// upstream and becomes the stream's only terminal signal.
  fn try_map<U, F>(self, f: F) -> TryMap<Self, F>
  where
    F: Fn(Self::Item) -> Result<U, Self::Err> + Send + Sync + 'static,
    U: Send + 'static,
  {
    TryMap::new(self, f)
  }

  /// Transform the error value.
  fn map_err<E2, F>(self, f: F) -> MapErr<Self, F>
  where
    F: Fn(Self::Err) -> E2 + Send + Sync + 'static,
    E2: Send + 'static,
  {
    MapErr::new(self, f)
  }

  /// Give an infallible publisher the error type the rest of a chain uses.
  fn with_err<E2>(self) -> MapErr<Self, fn(Infallible) -> E2>
  where
    Self: Publisher<Err = Infallible>,
    E2: Send + 'static,
  {
    MapErr::new(self, absurd::<E2> as fn(Infallible) -> E2)
  }

  /// Keep the elements matching `predicate`. Dropped elements do not use up
  /// downstream demand: one more is requested upstream for each.
  fn filter<F>(self, predicate: F) -> Filter<Self, F>
  where
    F: Fn(&Self::Item) -> bool + Send + Sync + 'static,
  {
    Filter::new(self, predicate)
  }

  /// Fallible [`filter`](Self::filter).
  fn try_filter<F>(self, predicate: F) -> TryFilter<Self, F>
  where
    F: Fn(&Self::Item) -> Result<bool, Self::Err> + Send + Sync + 'static,
  {
    TryFilter::new(self, predicate)
  }

  /// Map each element to a publisher and merge their outputs.
  ///
  /// Completes once the upstream and every inner publisher completed. The
  /// first error from any of them cancels all others.
  fn flat_map<Q, F>(self, f: F) -> FlatMap<Self, F>
  where
    F: Fn(Self::Item) -> Q + Send + Sync + 'static,
    Q: Publisher<Err = Self::Err>,
  {
    FlatMap::new(self, f, SMALL_BUFFER_SIZE, XS_BUFFER_SIZE)
  }

  /// [`flat_map`](Self::flat_map) with explicit concurrency (inner publishers
  /// subscribed at once) and per-inner prefetch.
  fn flat_map_with<Q, F>(self, f: F, concurrency: usize, prefetch: usize) -> FlatMap<Self, F>
  where
    F: Fn(Self::Item) -> Q + Send + Sync + 'static,
    Q: Publisher<Err = Self::Err>,
  {
    FlatMap::new(self, f, concurrency, prefetch)
  }

  /// Forward at most `n` elements, then cancel the upstream and complete.
  fn take(self, n: u64) -> Take<Self> { Take::new(self, n) }

  // --------------------------------------------------------------------------
  // Fallback and recovery
  // --------------------------------------------------------------------------

  /// Subscribe to `alternate` if the upstream completes without elements.
  fn switch_if_empty<Q>(self, alternate: Q) -> SwitchIfEmpty<Self, Q>
  where
    Q: Publisher<Item = Self::Item, Err = Self::Err>,
  {
    SwitchIfEmpty::new(self, alternate)
  }

  /// Replace an upstream error with the publisher `f` builds from it.
  fn on_error_resume<Q, F>(self, f: F) -> OnErrorResume<Self, F>
  where
    F: Fn(Self::Err) -> Q + Send + Sync + 'static,
    Q: Publisher<Item = Self::Item>,
  {
    OnErrorResume::new(self, f)
  }

  /// Replace an upstream error with `value` followed by completion.
  fn on_error_return(self, value: Self::Item) -> OnErrorReturn<Self>
  where
    Self::Item: Clone + Sync,
  {
    OnErrorReturn::new(self, value)
  }

  // --------------------------------------------------------------------------
  // Side effects
  // --------------------------------------------------------------------------

  fn do_on_next<F>(self, f: F) -> DoOnNext<Self, F>
  where
    F: Fn(&Self::Item) + Send + Sync + 'static,
  {
    DoOnNext::new(self, f)
  }

  /// Like [`do_on_next`](Self::do_on_next); an `Err` from the hook cancels
  /// the upstream and is emitted in place of the element.
  fn try_do_on_next<F>(self, f: F) -> TryDoOnNext<Self, F>
  where
    F: Fn(&Self::Item) -> Result<(), Self::Err> + Send + Sync + 'static,
  {
    TryDoOnNext::new(self, f)
  }

  fn do_on_error<F>(self, f: F) -> DoOnError<Self, F>
  where
    F: Fn(&Self::Err) + Send + Sync + 'static,
  {
    DoOnError::new(self, f)
  }

  fn do_on_complete<F>(self, f: F) -> DoOnComplete<Self, F>
  where
    F: Fn() + Send + Sync + 'static,
  {
    DoOnComplete::new(self, f)
  }

  /// Like [`do_on_complete`](Self::do_on_complete); an `Err` from the hook
  /// replaces the completion.
  fn try_do_on_complete<F>(self, f: F) -> TryDoOnComplete<Self, F>
  where
    F: Fn() -> Result<(), Self::Err> + Send + Sync + 'static,
  {
    TryDoOnComplete::new(self, f)
  }

  fn do_on_subscribe<F>(self, f: F) -> DoOnSubscribe<Self, F>
  where
    F: Fn(&SubscriptionRef) + Send + Sync + 'static,
  {
    DoOnSubscribe::new(self, f)
  }

  /// Observe every downstream `request(n)`.
  fn do_on_request<F>(self, f: F) -> DoOnRequest<Self, F>
  where
    F: Fn(u64) + Send + Sync + 'static,
  {
    DoOnRequest::new(self, f)
  }

  fn do_on_cancel<F>(self, f: F) -> DoOnCancel<Self, F>
  where
    F: Fn() + Send + Sync + 'static,
  {
    DoOnCancel::new(self, f)
  }

  /// Called once per subscription: with the first element, or with `None`
  /// when the upstream completes empty.
  fn do_on_success<F>(self, f: F) -> DoOnSuccess<Self, F>
  where
    F: Fn(Option<&Self::Item>) + Send + Sync + 'static,
  {
    DoOnSuccess::new(self, f)
  }

  /// Report every protocol event through `tracing` without changing it.
  fn log(self) -> Log<Self>
  where
    Self::Item: Debug,
    Self::Err: Debug,
  {
    Log::new(self, None)
  }

  /// [`log`](Self::log) with a category recorded on each event.
  fn log_named(self, category: impl Into<String>) -> Log<Self>
  where
    Self::Item: Debug,
    Self::Err: Debug,
  {
    Log::new(self, Some(category.into()))
  }

  // --------------------------------------------------------------------------
  // Flow control and time
  // --------------------------------------------------------------------------

  /// Never have more than `n` elements requested upstream and unconsumed;
  /// request again once three quarters of a batch were consumed.
  fn limit_rate(self, n: u64) -> LimitRate<Self> { LimitRate::new(self, n) }

  /// Delay every element by `delay`, measured on `scheduler`'s clock.
  fn delay_elements(self, delay: Duration, scheduler: SchedulerRef) -> DelayElements<Self> {
    DelayElements::new(self, delay, scheduler)
  }

  // --------------------------------------------------------------------------
  // Scheduler hops
  // --------------------------------------------------------------------------

  /// Perform the subscription, and therefore the source's production, on
  /// `scheduler`. The hop closest to the source wins.
  fn subscribe_on(self, scheduler: SchedulerRef) -> SubscribeOn<Self> {
    SubscribeOn::new(self, scheduler)
  }

  /// Deliver every signal below this point on `scheduler`, in order.
  fn publish_on(self, scheduler: SchedulerRef) -> PublishOn<Self> {
    PublishOn::new(self, scheduler, SMALL_BUFFER_SIZE)
  }

  /// [`publish_on`](Self::publish_on) with an explicit queue size.
  fn publish_on_with(self, scheduler: SchedulerRef, prefetch: usize) -> PublishOn<Self> {
    PublishOn::new(self, scheduler, prefetch)
  }

  // --------------------------------------------------------------------------
  // Multicast and bridges
  // --------------------------------------------------------------------------

  /// Turn this cold publisher into a hot one that starts on
  /// [`connect`](ConnectableFlux::connect).
  fn publish(self) -> ConnectableFlux<Self>
  where
    Self::Item: Clone,
    Self::Err: Clone,
  {
    ConnectableFlux::new(self, SMALL_BUFFER_SIZE)
  }

  fn publish_with(self, prefetch: usize) -> ConnectableFlux<Self>
  where
    Self::Item: Clone,
    Self::Err: Clone,
  {
    ConnectableFlux::new(self, prefetch)
  }

  /// Consume this publisher as a `futures::Stream`.
  fn into_stream(self) -> PublisherStream<Self::Item, Self::Err> {
    PublisherStream::new(&self, SMALL_BUFFER_SIZE)
  }

  fn into_stream_with(self, prefetch: usize) -> PublisherStream<Self::Item, Self::Err> {
    PublisherStream::new(&self, prefetch)
  }

  fn boxed(self) -> BoxedPublisher<Self::Item, Self::Err> { BoxedPublisher(Arc::new(self)) }

  // --------------------------------------------------------------------------
  // Subscribing
  // --------------------------------------------------------------------------

  /// Subscribe with a custom subscriber, guarded against protocol
  /// violations.
  fn subscribe_with<S>(&self, subscriber: S)
  where
    S: Subscriber<Self::Item, Self::Err> + 'static,
  {
    self.actual_subscribe(StrictSubscriber::new(subscriber))
  }

  /// Request everything and handle elements only. Errors are logged.
  fn subscribe<N>(&self, next: N) -> SubscriptionHandle
  where
    N: FnMut(Self::Item) + Send + 'static,
    Self::Err: Debug,
  {
    self.subscribe_full(next, log_unhandled::<Self::Err>, noop, request_unbounded)
  }

  /// Request everything and handle all three kinds of signal.
  fn subscribe_all<N, Er, C>(&self, next: N, error: Er, complete: C) -> SubscriptionHandle
  where
    N: FnMut(Self::Item) + Send + 'static,
    Er: FnOnce(Self::Err) + Send + 'static,
    C: FnOnce() + Send + 'static,
  {
    self.subscribe_full(next, error, complete, request_unbounded)
  }

  /// Handle all three kinds of signal and choose the initial demand in
  /// `on_subscribe`.
  fn subscribe_full<N, Er, C, Sub>(
    &self, next: N, error: Er, complete: C, on_subscribe: Sub,
  ) -> SubscriptionHandle
  where
    N: FnMut(Self::Item) + Send + 'static,
    Er: FnOnce(Self::Err) + Send + 'static,
    C: FnOnce() + Send + 'static,
    Sub: FnOnce(&SubscriptionRef) + Send + 'static,
  {
    let handle = SubscriptionHandle::new();
    self.subscribe_with(LambdaSubscriber::new(next, error, complete, on_subscribe, handle.clone()));
    handle
  }
}

impl<P: Publisher> PublisherExt for P {}

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use parking_lot::Mutex;

  use crate::{flux, prelude::*};

  #[test]
  fn cold_chain_is_reusable() {
    let chain = flux::range(1, 4).map(|v| v * 2);
    let first = Arc::new(Mutex::new(vec![]));
    let second = Arc::new(Mutex::new(vec![]));
    let (a, b) = (first.clone(), second.clone());
    chain.subscribe(move |v| a.lock().push(v));
    chain.subscribe(move |v| b.lock().push(v));
    assert_eq!(*first.lock(), vec![2, 4, 6, 8]);
    assert_eq!(*first.lock(), *second.lock());
  }

  #[test]
  fn boxed_branches_share_a_type() {
    let pick = |even: bool| {
      if even {
        flux::from_iter(vec![0, 2, 4]).boxed()
      } else {
        flux::from_iter(vec![1, 3]).map(|v| v).boxed()
      }
    };
    let seen = Arc::new(Mutex::new(vec![]));
    let s = seen.clone();
    pick(false).subscribe(move |v| s.lock().push(v));
    let s = seen.clone();
    pick(true).subscribe(move |v| s.lock().push(v));
    assert_eq!(*seen.lock(), vec![1, 3, 0, 2, 4]);
  }

  #[test]
  fn with_err_widens_error_type() {
    let got = Arc::new(Mutex::new(None));
    let g = got.clone();
    flux::just(1)
      .with_err::<String>()
      .try_map(|_| Err::<i32, _>("bad".to_owned()))
      .subscribe_all(|_| {}, move |e| *g.lock() = Some(e), || {});
    assert_eq!(got.lock().as_deref(), Some("bad"));
  }

  #[test]
  fn handle_reports_completion() {
    let handle = flux::empty::<i32>().subscribe(|_| {});
    assert!(handle.is_closed());
  }
}
