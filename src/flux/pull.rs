//! Demand-driven emission loop shared by every synchronous source.

use std::sync::{
  atomic::{AtomicBool, Ordering},
  Arc,
};

use parking_lot::Mutex;

use crate::{
  error::ProtocolError,
  signal::Signal,
  subscriber::Subscriber,
  subscription::{Demand, Subscription, Wip},
};

/// A synchronous producer of values.
pub(crate) trait Generator: Send + 'static {
  type Item: Send + 'static;
  type Err: Send + 'static;

  /// `Some` once no further value will be produced. Checked before every
  /// value and also without demand, so terminals never wait for a request.
  fn finished(&mut self) -> Option<Result<(), Self::Err>>;

  /// Produce the next value. `None` is treated as completion.
  fn produce(&mut self) -> Option<Result<Self::Item, Self::Err>>;
}

/// Subscribe `subscriber` to a fresh activation of `generator`.
pub(crate) fn subscribe_generator<G, S>(generator: G, mut subscriber: S)
where
  G: Generator,
  S: Subscriber<G::Item, G::Err> + 'static,
{
  let subscription = Arc::new(PullSubscription {
    demand: Demand::new(),
    wip: Wip::held(),
    cancelled: AtomicBool::new(false),
    state: Mutex::new(None),
  });
  // Requests issued from inside `on_subscribe` only mark work; the loop
  // below picks them up once the subscriber is stored.
  subscriber.on_subscribe(subscription.clone());
  *subscription.state.lock() = Some((generator, subscriber));
  subscription.drain();
}

struct PullSubscription<G, S> {
  demand: Demand,
  wip: Wip,
  cancelled: AtomicBool,
  state: Mutex<Option<(G, S)>>,
}

impl<G, S> PullSubscription<G, S>
where
  G: Generator,
  S: Subscriber<G::Item, G::Err>,
{
  /// Runs only while the caller owns `wip`.
  fn drain(&self) {
    let mut missed = 1;
    loop {
      let terminal = {
        let mut slot = self.state.lock();
        let outcome = match slot.as_mut() {
          Some(_) if self.cancelled.load(Ordering::Acquire) => Outcome::Release,
          Some((generator, subscriber)) => self.emit(generator, subscriber),
          None => Outcome::Idle,
        };
        match outcome {
          Outcome::Idle => None,
          Outcome::Release => {
            slot.take();
            None
          }
          Outcome::Terminal(result) => slot.take().map(|(_, subscriber)| (subscriber, result)),
        }
      };
      if let Some((mut subscriber, result)) = terminal {
        subscriber.on_signal(Signal::terminal(result));
      }
      missed = self.wip.leave(missed);
      if missed == 0 {
        break;
      }
    }
  }

  fn emit(&self, generator: &mut G, subscriber: &mut S) -> Outcome<G::Err> {
    loop {
      if self.cancelled.load(Ordering::Acquire) {
        return Outcome::Release;
      }
      if let Some(result) = generator.finished() {
        return Outcome::Terminal(result);
      }
      if self.demand.get() == 0 {
        return Outcome::Idle;
      }
      match generator.produce() {
        Some(Ok(value)) => {
          self.demand.produced(1);
          subscriber.on_signal(Signal::Next(value));
        }
        Some(Err(err)) => return Outcome::Terminal(Err(err)),
        None => return Outcome::Terminal(Ok(())),
      }
    }
  }
}

enum Outcome<E> {
  Idle,
  Release,
  Terminal(Result<(), E>),
}

impl<G, S> Subscription for PullSubscription<G, S>
where
  G: Generator,
  S: Subscriber<G::Item, G::Err> + 'static,
{
  fn request(&self, n: u64) -> Result<(), ProtocolError> {
    self.demand.request(n)?;
    if self.wip.enter() {
      self.drain();
    }
    Ok(())
  }

  fn cancel(&self) {
    if !self.cancelled.swap(true, Ordering::AcqRel) && self.wip.enter() {
      self.drain();
    }
  }
}
