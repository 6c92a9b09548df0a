use std::{convert::Infallible, iter::Peekable};

use super::pull::{subscribe_generator, Generator};
use crate::{publisher::Publisher, subscriber::Subscriber};

/// Emits every element of an iterable in order, then completes.
///
/// The iterable is cloned for each subscription, so every subscriber sees
/// the full sequence. Completion is signalled as soon as the last element
/// was delivered, without waiting for further demand.
///
/// ```rust
/// use rxflux::prelude::*;
///
/// flux::from_iter(vec!["A", "B", "C"]).subscribe(|v| println!("{v}"));
/// ```
pub fn from_iter<I>(iter: I) -> FromIter<I>
where
  I: IntoIterator + Clone,
{
  FromIter { iter }
}

/// A single value followed by completion.
pub fn just<T: Clone>(value: T) -> FromIter<[T; 1]> { FromIter { iter: [value] } }

#[derive(Clone)]
pub struct FromIter<I> {
  iter: I,
}

impl<I> Publisher for FromIter<I>
where
  I: IntoIterator + Clone + Send + Sync + 'static,
  I::IntoIter: Send + 'static,
  I::Item: Send + 'static,
{
  type Item = I::Item;
  type Err = Infallible;

  fn actual_subscribe<S>(&self, subscriber: S)
  where
    S: Subscriber<Self::Item, Self::Err> + 'static,
  {
    subscribe_generator(IterGenerator(self.iter.clone().into_iter().peekable()), subscriber)
  }
}

struct IterGenerator<It: Iterator>(Peekable<It>);

impl<It> Generator for IterGenerator<It>
where
  It: Iterator + Send + 'static,
  It::Item: Send + 'static,
{
  type Item = It::Item;
  type Err = Infallible;

  fn finished(&mut self) -> Option<Result<(), Infallible>> {
    match self.0.peek() {
      Some(_) => None,
      None => Some(Ok(())),
    }
  }

  fn produce(&mut self) -> Option<Result<It::Item, Infallible>> { self.0.next().map(Ok) }
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use parking_lot::Mutex;

  use crate::{prelude::*, signal::Signal, subscription::SubscriptionRef};

  struct Manual {
    seen: Arc<Mutex<Vec<Signal<&'static str, std::convert::Infallible>>>>,
    subscription: Arc<Mutex<Option<SubscriptionRef>>>,
  }

  impl Subscriber<&'static str, std::convert::Infallible> for Manual {
    fn on_subscribe(&mut self, subscription: SubscriptionRef) {
      *self.subscription.lock() = Some(subscription);
    }

    fn on_signal(&mut self, signal: Signal<&'static str, std::convert::Infallible>) {
      self.seen.lock().push(signal);
    }
  }

  #[test]
  fn emits_only_what_was_requested() {
    let seen = Arc::new(Mutex::new(vec![]));
    let subscription = Arc::new(Mutex::new(None));
    flux::from_iter(vec!["A", "B", "C"])
      .subscribe_with(Manual { seen: seen.clone(), subscription: subscription.clone() });
    assert!(seen.lock().is_empty());

    let s = subscription.lock().clone().unwrap();
    s.request(2).unwrap();
    assert_eq!(*seen.lock(), vec![Signal::Next("A"), Signal::Next("B")]);

    s.request(1).unwrap();
    assert_eq!(seen.lock().len(), 4);
    assert_eq!(seen.lock()[3], Signal::Complete);
  }

  #[test]
  fn just_and_completion() {
    let out = Arc::new(Mutex::new(vec![]));
    let (o, c) = (out.clone(), out.clone());
    flux::just("Hello").subscribe_all(move |v| o.lock().push(v), |_| {}, move || c.lock().push("done"));
    assert_eq!(*out.lock(), vec!["Hello", "done"]);
  }

  #[test]
  fn empty_iterable_completes_without_demand() {
    let done = Arc::new(Mutex::new(false));
    let d = done.clone();
    flux::from_iter(Vec::<i32>::new()).subscribe_full(
      |_| {},
      |_| {},
      move || *d.lock() = true,
      |_| {},
    );
    assert!(*done.lock());
  }
}
