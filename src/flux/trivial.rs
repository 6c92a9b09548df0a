use std::convert::Infallible;

use super::pull::{subscribe_generator, Generator};
use crate::{
  publisher::Publisher, subscriber::Subscriber, subscription::empty_subscription,
  type_hint::TypeHint,
};

/// Signals `Error(err)` right after subscription, without waiting for demand.
///
/// The error is cloned for each subscription.
pub fn error<T, E: Clone>(err: E) -> Error<T, E> { Error { err, _hint: TypeHint::new() } }

/// Completes right after subscription.
pub fn empty<T>() -> Empty<T> { Empty(TypeHint::new()) }

/// Never signals anything after `on_subscribe`.
pub fn never<T>() -> Never<T> { Never(TypeHint::new()) }

pub struct Error<T, E> {
  err: E,
  _hint: TypeHint<T>,
}

pub struct Empty<T>(TypeHint<T>);

pub struct Never<T>(TypeHint<T>);

impl<T, E: Clone> Clone for Error<T, E> {
  fn clone(&self) -> Self { Self { err: self.err.clone(), _hint: self._hint } }
}

impl<T> Clone for Empty<T> {
  fn clone(&self) -> Self { Self(self.0) }
}

impl<T> Clone for Never<T> {
  fn clone(&self) -> Self { Self(self.0) }
}

impl<T, E> Publisher for Error<T, E>
where
  T: Send + 'static,
  E: Clone + Send + Sync + 'static,
{
  type Item = T;
  type Err = E;

  fn actual_subscribe<S>(&self, subscriber: S)
  where
    S: Subscriber<T, E> + 'static,
  {
    let generator = Terminal { result: Some(Err(self.err.clone())), _hint: TypeHint::<T>::new() };
    subscribe_generator(generator, subscriber)
  }
}

impl<T: Send + 'static> Publisher for Empty<T> {
  type Item = T;
  type Err = Infallible;

  fn actual_subscribe<S>(&self, subscriber: S)
  where
    S: Subscriber<T, Infallible> + 'static,
  {
    subscribe_generator(Terminal { result: Some(Ok(())), _hint: TypeHint::<T>::new() }, subscriber)
  }
}

impl<T: Send + 'static> Publisher for Never<T> {
  type Item = T;
  type Err = Infallible;

  fn actual_subscribe<S>(&self, mut subscriber: S)
  where
    S: Subscriber<T, Infallible> + 'static,
  {
    subscriber.on_subscribe(empty_subscription());
  }
}

/// Generator that only ever reports its terminal.
struct Terminal<T, E> {
  result: Option<Result<(), E>>,
  _hint: TypeHint<T>,
}

impl<T, E> Generator for Terminal<T, E>
where
  T: Send + 'static,
  E: Send + 'static,
{
  type Item = T;
  type Err = E;

  fn finished(&mut self) -> Option<Result<(), E>> { Some(self.result.take().unwrap_or(Ok(()))) }

  fn produce(&mut self) -> Option<Result<T, E>> { None }
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use parking_lot::Mutex;

  use crate::{prelude::*, signal::Signal};

  fn record<P>(publisher: &P) -> Arc<Mutex<Vec<Signal<P::Item, P::Err>>>>
  where
    P: Publisher,
  {
    let out = Arc::new(Mutex::new(vec![]));
    let (n, e, c) = (out.clone(), out.clone(), out.clone());
    publisher.subscribe_full(
      move |v| n.lock().push(Signal::Next(v)),
      move |err| e.lock().push(Signal::Error(err)),
      move || c.lock().push(Signal::Complete),
      |_| {},
    );
    out
  }

  #[test]
  fn error_without_demand() {
    let out = record(&flux::error::<i32, _>("boom"));
    assert_eq!(*out.lock(), vec![Signal::Error("boom")]);
  }

  #[test]
  fn empty_without_demand() {
    let out = record(&flux::empty::<i32>());
    assert_eq!(*out.lock(), vec![Signal::Complete]);
  }

  #[test]
  fn never_stays_silent() {
    let out = record(&flux::never::<i32>());
    assert!(out.lock().is_empty());
  }
}
