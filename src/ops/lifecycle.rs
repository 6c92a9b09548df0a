//! Lifecycle hooks: side effects at protocol events.
//!
//! Every hook observes its event and forwards it untouched. The `try_`
//! variants may fail; their `Err` cancels the upstream and takes the place of
//! the observed signal, so the stream still ends with exactly one terminal.

use std::sync::{
  atomic::{AtomicBool, Ordering},
  Arc,
};

use crate::{
  error::ProtocolError,
  publisher::Publisher,
  signal::Signal,
  subscriber::Subscriber,
  subscription::{validate_request, Subscription, SubscriptionRef},
};

/// Operator struct, constructor and `Publisher` impl shared by every hook.
macro_rules! hook_operator {
  (
    $(#[$meta:meta])*
    $name:ident => $subscriber:ident { $($field:ident: $init:expr),* }
    where F: $($bound:tt)+
  ) => {
    $(#[$meta])*
    pub struct $name<P, F> {
      source: P,
      hook: Arc<F>,
    }

    impl<P, F> $name<P, F> {
      pub fn new(source: P, hook: F) -> Self { Self { source, hook: Arc::new(hook) } }
    }

    impl<P, F> Publisher for $name<P, F>
    where
      P: Publisher,
      F: $($bound)+ + Send + Sync + 'static,
    {
      type Item = P::Item;
      type Err = P::Err;

      fn actual_subscribe<S>(&self, subscriber: S)
      where
        S: Subscriber<P::Item, P::Err> + 'static,
      {
        self.source.actual_subscribe($subscriber {
          actual: subscriber,
          hook: self.hook.clone(),
          $($field: $init),*
        })
      }
    }
  };
}

// ==================== DoOnNext ====================

hook_operator! {
  /// Calls the hook with each element before forwarding it.
  DoOnNext => DoOnNextSubscriber {} where F: Fn(&P::Item)
}

pub struct DoOnNextSubscriber<S, F> {
  actual: S,
  hook: Arc<F>,
}

impl<S, F, T, E> Subscriber<T, E> for DoOnNextSubscriber<S, F>
where
  S: Subscriber<T, E>,
  F: Fn(&T) + Send + Sync,
{
  fn on_subscribe(&mut self, subscription: SubscriptionRef) {
    self.actual.on_subscribe(subscription)
  }

  fn on_signal(&mut self, signal: Signal<T, E>) {
    if let Signal::Next(value) = &signal {
      (self.hook)(value);
    }
    self.actual.on_signal(signal)
  }
}

// ==================== TryDoOnNext ====================

hook_operator! {
  TryDoOnNext => TryDoOnNextSubscriber { upstream: None, done: false }
  where F: Fn(&P::Item) -> Result<(), P::Err>
}

pub struct TryDoOnNextSubscriber<S, F> {
  actual: S,
  hook: Arc<F>,
  upstream: Option<SubscriptionRef>,
  done: bool,
}

impl<S, F, T, E> Subscriber<T, E> for TryDoOnNextSubscriber<S, F>
where
  S: Subscriber<T, E>,
  F: Fn(&T) -> Result<(), E> + Send + Sync,
{
  fn on_subscribe(&mut self, subscription: SubscriptionRef) {
    self.upstream = Some(subscription.clone());
    self.actual.on_subscribe(subscription)
  }

  fn on_signal(&mut self, signal: Signal<T, E>) {
    if self.done {
      return;
    }
    let signal = match signal {
      Signal::Next(value) => match (self.hook)(&value) {
        Ok(()) => Signal::Next(value),
        Err(err) => {
          if let Some(upstream) = self.upstream.take() {
            upstream.cancel();
          }
          Signal::Error(err)
        }
      },
      terminal => terminal,
    };
    if signal.is_terminal() {
      self.done = true;
      self.upstream = None;
    }
    self.actual.on_signal(signal)
  }
}

// ==================== DoOnError ====================

hook_operator! {
  /// Calls the hook with the error before forwarding it.
  DoOnError => DoOnErrorSubscriber {} where F: Fn(&P::Err)
}

pub struct DoOnErrorSubscriber<S, F> {
  actual: S,
  hook: Arc<F>,
}

impl<S, F, T, E> Subscriber<T, E> for DoOnErrorSubscriber<S, F>
where
  S: Subscriber<T, E>,
  F: Fn(&E) + Send + Sync,
{
  fn on_subscribe(&mut self, subscription: SubscriptionRef) {
    self.actual.on_subscribe(subscription)
  }

  fn on_signal(&mut self, signal: Signal<T, E>) {
    if let Signal::Error(err) = &signal {
      (self.hook)(err);
    }
    self.actual.on_signal(signal)
  }
}

// ==================== DoOnComplete ====================

hook_operator! {
  DoOnComplete => DoOnCompleteSubscriber {} where F: Fn()
}

pub struct DoOnCompleteSubscriber<S, F> {
  actual: S,
  hook: Arc<F>,
}

impl<S, F, T, E> Subscriber<T, E> for DoOnCompleteSubscriber<S, F>
where
  S: Subscriber<T, E>,
  F: Fn() + Send + Sync,
{
  fn on_subscribe(&mut self, subscription: SubscriptionRef) {
    self.actual.on_subscribe(subscription)
  }

  fn on_signal(&mut self, signal: Signal<T, E>) {
    if matches!(signal, Signal::Complete) {
      (self.hook)();
    }
    self.actual.on_signal(signal)
  }
}

// ==================== TryDoOnComplete ====================

hook_operator! {
  TryDoOnComplete => TryDoOnCompleteSubscriber {} where F: Fn() -> Result<(), P::Err>
}

pub struct TryDoOnCompleteSubscriber<S, F> {
  actual: S,
  hook: Arc<F>,
}

impl<S, F, T, E> Subscriber<T, E> for TryDoOnCompleteSubscriber<S, F>
where
  S: Subscriber<T, E>,
  F: Fn() -> Result<(), E> + Send + Sync,
{
  fn on_subscribe(&mut self, subscription: SubscriptionRef) {
    self.actual.on_subscribe(subscription)
  }

  fn on_signal(&mut self, signal: Signal<T, E>) {
    let signal = match signal {
      Signal::Complete => Signal::terminal((self.hook)()),
      other => other,
    };
    self.actual.on_signal(signal)
  }
}

// ==================== DoOnSubscribe ====================

hook_operator! {
  /// Calls the hook with the upstream subscription before the downstream
  /// receives it.
  DoOnSubscribe => DoOnSubscribeSubscriber {} where F: Fn(&SubscriptionRef)
}

pub struct DoOnSubscribeSubscriber<S, F> {
  actual: S,
  hook: Arc<F>,
}

impl<S, F, T, E> Subscriber<T, E> for DoOnSubscribeSubscriber<S, F>
where
  S: Subscriber<T, E>,
  F: Fn(&SubscriptionRef) + Send + Sync,
{
  fn on_subscribe(&mut self, subscription: SubscriptionRef) {
    (self.hook)(&subscription);
    self.actual.on_subscribe(subscription)
  }

  fn on_signal(&mut self, signal: Signal<T, E>) { self.actual.on_signal(signal) }
}

// ==================== DoOnRequest / DoOnCancel ====================

hook_operator! {
  /// Calls the hook with every valid downstream request.
  DoOnRequest => DoOnRequestSubscriber {} where F: Fn(u64)
}

hook_operator! {
  /// Calls the hook once when the downstream cancels. Terminal signals do
  /// not count as cancellation.
  DoOnCancel => DoOnCancelSubscriber {} where F: Fn()
}

pub struct DoOnRequestSubscriber<S, F> {
  actual: S,
  hook: Arc<F>,
}

pub struct DoOnCancelSubscriber<S, F> {
  actual: S,
  hook: Arc<F>,
}

struct RequestHook<F> {
  upstream: SubscriptionRef,
  hook: Arc<F>,
}

impl<F: Fn(u64) + Send + Sync> Subscription for RequestHook<F> {
  fn request(&self, n: u64) -> Result<(), ProtocolError> {
    validate_request(n)?;
    (self.hook)(n);
    self.upstream.request(n)
  }

  fn cancel(&self) { self.upstream.cancel() }
}

struct CancelHook<F> {
  upstream: SubscriptionRef,
  hook: Arc<F>,
  fired: AtomicBool,
}

impl<F: Fn() + Send + Sync> Subscription for CancelHook<F> {
  fn request(&self, n: u64) -> Result<(), ProtocolError> { self.upstream.request(n) }

  fn cancel(&self) {
    if !self.fired.swap(true, Ordering::AcqRel) {
      (self.hook)();
    }
    self.upstream.cancel()
  }
}

impl<S, F, T, E> Subscriber<T, E> for DoOnRequestSubscriber<S, F>
where
  S: Subscriber<T, E>,
  F: Fn(u64) + Send + Sync + 'static,
{
  fn on_subscribe(&mut self, subscription: SubscriptionRef) {
    let hooked = RequestHook { upstream: subscription, hook: self.hook.clone() };
    self.actual.on_subscribe(Arc::new(hooked))
  }

  fn on_signal(&mut self, signal: Signal<T, E>) { self.actual.on_signal(signal) }
}

impl<S, F, T, E> Subscriber<T, E> for DoOnCancelSubscriber<S, F>
where
  S: Subscriber<T, E>,
  F: Fn() + Send + Sync + 'static,
{
  fn on_subscribe(&mut self, subscription: SubscriptionRef) {
    let hooked = CancelHook {
      upstream: subscription,
      hook: self.hook.clone(),
      fired: AtomicBool::new(false),
    };
    self.actual.on_subscribe(Arc::new(hooked))
  }

  fn on_signal(&mut self, signal: Signal<T, E>) { self.actual.on_signal(signal) }
}

// ==================== DoOnSuccess ====================

hook_operator! {
  DoOnSuccess => DoOnSuccessSubscriber { fired: false } where F: Fn(Option<&P::Item>)
}

pub struct DoOnSuccessSubscriber<S, F> {
  actual: S,
  hook: Arc<F>,
  fired: bool,
}

impl<S, F, T, E> Subscriber<T, E> for DoOnSuccessSubscriber<S, F>
where
  S: Subscriber<T, E>,
  F: Fn(Option<&T>) + Send + Sync,
{
  fn on_subscribe(&mut self, subscription: SubscriptionRef) {
    self.actual.on_subscribe(subscription)
  }

  fn on_signal(&mut self, signal: Signal<T, E>) {
    if !self.fired {
      match &signal {
        Signal::Next(value) => {
          self.fired = true;
          (self.hook)(Some(value));
        }
        Signal::Complete => {
          self.fired = true;
          (self.hook)(None);
        }
        Signal::Error(_) => {}
      }
    }
    self.actual.on_signal(signal)
  }
}

// ==================== Tests ====================

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use parking_lot::Mutex;

  use crate::{prelude::*, signal::Signal, subscription::describe_demand};

  type Log = Arc<Mutex<Vec<String>>>;

  fn log() -> Log { Arc::new(Mutex::new(vec![])) }

  fn push(log: &Log, entry: impl Into<String>) { log.lock().push(entry.into()) }

  #[test]
  fn hooks_fire_in_protocol_order() {
    let events = log();
    let (a, b, c, d, e) = (events.clone(), events.clone(), events.clone(), events.clone(), events.clone());
    flux::from_iter(vec![1, 2])
      .do_on_subscribe(move |_| push(&a, "subscribe"))
      .do_on_request(move |n| push(&b, format!("request {}", describe_demand(n))))
      .do_on_next(move |v| push(&c, format!("next {v}")))
      .do_on_complete(move || push(&d, "complete"))
      .do_on_success(move |first| push(&e, format!("success {first:?}")))
      .subscribe(|_| {});
    assert_eq!(
      *events.lock(),
      vec![
        "subscribe",
        "request unbounded",
        "next 1",
        "success Some(1)",
        "next 2",
        "complete",
      ]
    );
  }

  #[test]
  fn failing_hook_becomes_error() {
    let out = Arc::new(Mutex::new(vec![]));
    let (n, e) = (out.clone(), out.clone());
    flux::range(1, 5)
      .with_err::<String>()
      .try_do_on_next(|v| if *v == 2 { Err(format!("rejected {v}")) } else { Ok(()) })
      .subscribe_all(
        move |v| n.lock().push(Signal::Next(v)),
        move |err| e.lock().push(Signal::Error(err)),
        || {},
      );
    assert_eq!(*out.lock(), vec![Signal::Next(1), Signal::Error("rejected 2".to_owned())]);
  }

  #[test]
  fn failing_complete_hook_replaces_completion() {
    let err = Arc::new(Mutex::new(None));
    let e = err.clone();
    flux::empty::<i32>()
      .with_err::<&str>()
      .try_do_on_complete(|| Err("cleanup failed"))
      .subscribe_all(|_| {}, move |x| *e.lock() = Some(x), || panic!("must not complete"));
    assert_eq!(*err.lock(), Some("cleanup failed"));
  }

  #[test]
  fn error_and_cancel_hooks() {
    let events = log();
    let (a, b) = (events.clone(), events.clone());
    flux::error::<i32, _>("boom")
      .do_on_error(move |e| push(&a, format!("error {e}")))
      .subscribe_all(|_| {}, |_| {}, || {});

    let handle = flux::never::<i32>().do_on_cancel(move || push(&b, "cancel")).subscribe(|_| {});
    handle.cancel();
    handle.cancel();
    assert_eq!(*events.lock(), vec!["error boom", "cancel"]);
  }

  #[test]
  fn success_with_empty_source() {
    let seen = Arc::new(Mutex::new(vec![]));
    let s = seen.clone();
    flux::empty::<i32>().do_on_success(move |v| s.lock().push(v.copied())).subscribe(|_| {});
    assert_eq!(*seen.lock(), vec![None]);
  }
}
