//! Scripted expectations against a publisher.
//!
//! [`StepVerifier`] subscribes to a publisher, records every signal and then
//! walks a list of steps in order: expectations consume recorded signals,
//! actions (`then_*`) request, cancel, run arbitrary code or move a
//! controllable clock. Nothing here reaches into engine internals; the
//! verifier is an ordinary subscriber.
//!
//! ```rust
//! use rxflux::{prelude::*, verifier::StepVerifier};
//!
//! StepVerifier::create(flux::range(1, 3))
//!   .expect_subscription()
//!   .expect_next([1, 2, 3])
//!   .verify_complete()
//!   .unwrap();
//! ```
//!
//! Timed sources run against virtual time, so a day-long interval verifies
//! instantly:
//!
//! ```rust
//! use rxflux::{prelude::*, verifier::StepVerifier};
//!
//! const DAY: Duration = Duration::from_secs(24 * 60 * 60);
//!
//! StepVerifier::with_virtual_time(|scheduler| flux::interval(DAY, scheduler).take(2))
//!   .expect_subscription()
//!   .expect_no_event(DAY)
//!   .then_await(DAY)
//!   .expect_next([0])
//!   .then_await(DAY)
//!   .expect_next([1])
//!   .verify_complete()
//!   .unwrap();
//! ```

use std::{
  collections::VecDeque,
  fmt::Debug,
  sync::Arc,
  thread,
  time::{Duration, Instant},
};

use parking_lot::{Condvar, Mutex};
use thiserror::Error;

use crate::{
  error::ProtocolError,
  publisher::{Publisher, PublisherExt},
  scheduler::{ControllableClock, SchedulerRef, VirtualTimeScheduler},
  signal::Signal,
  subscriber::Subscriber,
  subscription::{SubscriptionRef, UNBOUNDED},
};

/// How long `verify` waits, in total, for the expected signals.
pub const DEFAULT_VERIFY_TIMEOUT: Duration = Duration::from_secs(5);

const ONE_NANO: Duration = Duration::from_nanos(1);

/// Why a verification failed. `step` is the zero-based index of the step
/// that did not hold.
#[derive(Debug, Error)]
pub enum VerificationError {
  #[error("step {step}: expected {expected}, got {actual}")]
  Unexpected { step: usize, expected: String, actual: String },

  #[error("step {step}: timed out after {timeout:?} waiting for {expected}")]
  Timeout { step: usize, expected: String, timeout: Duration },

  #[error("step {step}: {message}")]
  Assertion { step: usize, message: String },

  #[error("step {step}: {source}")]
  Protocol {
    step: usize,
    #[source]
    source: ProtocolError,
  },
}

type NextCheck<T> = Box<dyn FnOnce(&T) -> bool>;
type ErrorCheck<E> = Box<dyn FnOnce(&E) -> Result<(), String>>;

enum Step<T, E> {
  Subscription,
  Next { expected: String, check: NextCheck<T> },
  NextCount(u64),
  NoEvent(Duration),
  Await(Duration),
  Run(Box<dyn FnOnce()>),
  Request(u64),
  ConsumeWhile(Box<dyn FnMut(&T) -> bool>),
  Cancel,
  Complete,
  Error { expected: String, check: ErrorCheck<E> },
}

// ============================================================================
// StepVerifier
// ============================================================================

/// Builder of a scripted verification. Nothing is subscribed until
/// [`verify`](Self::verify) runs.
pub struct StepVerifier<P: Publisher> {
  publisher: P,
  initial_demand: u64,
  clock: Option<Arc<dyn ControllableClock>>,
  timeout: Duration,
  steps: Vec<Step<P::Item, P::Err>>,
}

impl<P> StepVerifier<P>
where
  P: Publisher,
  P::Item: Debug,
  P::Err: Debug,
{
  /// Verify `publisher` with unbounded initial demand.
  pub fn create(publisher: P) -> Self { Self::with_initial_demand(publisher, UNBOUNDED) }

  /// Verify `publisher`, requesting `demand` on subscription. Zero requests
  /// nothing; use [`then_request`](Self::then_request) later.
  pub fn with_initial_demand(publisher: P, demand: u64) -> Self {
    Self {
      publisher,
      initial_demand: demand,
      clock: None,
      timeout: DEFAULT_VERIFY_TIMEOUT,
      steps: vec![],
    }
  }

  /// Build the publisher against a fresh [`VirtualTimeScheduler`] and drive
  /// every time-based step through it.
  pub fn with_virtual_time<F>(factory: F) -> Self
  where
    F: FnOnce(SchedulerRef) -> P,
  {
    let vts = Arc::new(VirtualTimeScheduler::new());
    let publisher = factory(vts.clone());
    Self::with_clock(vts, publisher)
  }

  /// Verify `publisher`, moving `clock` for `expect_no_event` and
  /// `then_await` instead of sleeping.
  pub fn with_clock(clock: Arc<dyn ControllableClock>, publisher: P) -> Self {
    let mut verifier = Self::create(publisher);
    verifier.clock = Some(clock);
    verifier
  }

  /// Budget for the whole verification. Defaults to
  /// [`DEFAULT_VERIFY_TIMEOUT`].
  pub fn timeout(mut self, timeout: Duration) -> Self {
    self.timeout = timeout;
    self
  }

  fn step(mut self, step: Step<P::Item, P::Err>) -> Self {
    self.steps.push(step);
    self
  }

  // --------------------------------------------------------------------------
  // Expectations
  // --------------------------------------------------------------------------

  pub fn expect_subscription(self) -> Self { self.step(Step::Subscription) }

  /// Expect exactly these elements, in this order.
  pub fn expect_next<I>(mut self, values: I) -> Self
  where
    I: IntoIterator<Item = P::Item>,
    P::Item: PartialEq,
  {
    for value in values {
      let expected = format!("onNext({value:?})");
      self = self.step(Step::Next { expected, check: Box::new(move |actual| *actual == value) });
    }
    self
  }

  /// Expect `n` elements without looking at them.
  pub fn expect_next_count(self, n: u64) -> Self { self.step(Step::NextCount(n)) }

  /// Expect nothing to be signalled for `duration`.
  ///
  /// Under a controllable clock the clock moves by `duration - 1ns`, so a
  /// timer due exactly at the end of the window does not count as inside
  /// it.
  pub fn expect_no_event(self, duration: Duration) -> Self { self.step(Step::NoEvent(duration)) }

  pub fn expect_complete(self) -> Self { self.step(Step::Complete) }

  /// Expect an error of any value.
  pub fn expect_error(self) -> Self {
    self.step(Step::Error { expected: "onError(_)".into(), check: Box::new(|_| Ok(())) })
  }

  pub fn expect_error_matches<F>(self, predicate: F) -> Self
  where
    F: FnOnce(&P::Err) -> bool + 'static,
  {
    let check = move |err: &P::Err| {
      if predicate(err) {
        Ok(())
      } else {
        Err(format!("error {err:?} did not match the predicate"))
      }
    };
    self.step(Step::Error { expected: "a matching onError".into(), check: Box::new(check) })
  }

  pub fn expect_error_with(self, expected: P::Err) -> Self
  where
    P::Err: PartialEq + 'static,
  {
    let description = format!("onError({expected:?})");
    let check = move |err: &P::Err| {
      if *err == expected {
        Ok(())
      } else {
        Err(format!("expected error {expected:?}, got {err:?}"))
      }
    };
    self.step(Step::Error { expected: description, check: Box::new(check) })
  }

  // --------------------------------------------------------------------------
  // Actions
  // --------------------------------------------------------------------------

  /// Advance the clock by exactly `duration`, or sleep that long when no
  /// controllable clock is in use.
  pub fn then_await(self, duration: Duration) -> Self { self.step(Step::Await(duration)) }

  /// Run `task` at this point of the script.
  pub fn then<F>(self, task: F) -> Self
  where
    F: FnOnce() + 'static,
  {
    self.step(Step::Run(Box::new(task)))
  }

  pub fn then_request(self, n: u64) -> Self { self.step(Step::Request(n)) }

  /// Consume elements while `predicate` holds. Stops, without consuming,
  /// at the first element that fails it or at a terminal signal.
  pub fn then_consume_while<F>(self, predicate: F) -> Self
  where
    F: FnMut(&P::Item) -> bool + 'static,
  {
    self.step(Step::ConsumeWhile(Box::new(predicate)))
  }

  pub fn then_cancel(self) -> Self { self.step(Step::Cancel) }

  // --------------------------------------------------------------------------
  // Running
  // --------------------------------------------------------------------------

  /// `expect_complete` followed by `verify`.
  pub fn verify_complete(self) -> Result<Duration, VerificationError> {
    self.expect_complete().verify()
  }

  /// `expect_error` followed by `verify`.
  pub fn verify_error(self) -> Result<Duration, VerificationError> { self.expect_error().verify() }

  /// Subscribe and run the script. Returns the wall-clock time it took.
  ///
  /// The subscription is cancelled once the script ends, whatever the
  /// outcome.
  pub fn verify(self) -> Result<Duration, VerificationError> {
    let Self { publisher, initial_demand, clock, timeout, steps } = self;
    let started = Instant::now();
    let recorder = Arc::new(Recorder::new());
    publisher.subscribe_with(RecordingSubscriber { recorder: recorder.clone(), initial_demand });

    let session = Session { recorder, clock, timeout, deadline: started + timeout };
    let outcome = steps
      .into_iter()
      .enumerate()
      .try_for_each(|(index, step)| session.run(index, step));
    session.close();

    match &outcome {
      Ok(()) => tracing::debug!(elapsed = ?started.elapsed(), "verification passed"),
      Err(err) => tracing::debug!(%err, "verification failed"),
    }
    outcome.map(|()| started.elapsed())
  }
}

// ============================================================================
// Recording
// ============================================================================

struct Recorder<T, E> {
  state: Mutex<RecordState<T, E>>,
  signalled: Condvar,
}

struct RecordState<T, E> {
  subscription: Option<SubscriptionRef>,
  events: VecDeque<Signal<T, E>>,
}

impl<T, E> Recorder<T, E> {
  fn new() -> Self {
    Self {
      state: Mutex::new(RecordState { subscription: None, events: VecDeque::new() }),
      signalled: Condvar::new(),
    }
  }

  /// Block until `ready` yields a value or `deadline` passes.
  fn wait_for<R>(
    &self, deadline: Instant, mut ready: impl FnMut(&mut RecordState<T, E>) -> Option<R>,
  ) -> Option<R> {
    let mut state = self.state.lock();
    loop {
      if let Some(found) = ready(&mut state) {
        return Some(found);
      }
      if self.signalled.wait_until(&mut state, deadline).timed_out() {
        return ready(&mut state);
      }
    }
  }
}

struct RecordingSubscriber<T, E> {
  recorder: Arc<Recorder<T, E>>,
  initial_demand: u64,
}

impl<T: Send, E: Send> Subscriber<T, E> for RecordingSubscriber<T, E> {
  fn on_subscribe(&mut self, subscription: SubscriptionRef) {
    self.recorder.state.lock().subscription = Some(subscription.clone());
    self.recorder.signalled.notify_all();
    if self.initial_demand > 0 {
      if let Err(err) = subscription.request(self.initial_demand) {
        tracing::warn!(%err, "initial request rejected");
      }
    }
  }

  fn on_signal(&mut self, signal: Signal<T, E>) {
    self.recorder.state.lock().events.push_back(signal);
    self.recorder.signalled.notify_all();
  }
}

fn describe<T: Debug, E: Debug>(signal: &Signal<T, E>) -> String {
  match signal {
    Signal::Next(value) => format!("onNext({value:?})"),
    Signal::Error(err) => format!("onError({err:?})"),
    Signal::Complete => "onComplete()".to_owned(),
  }
}

// ============================================================================
// Session
// ============================================================================

struct Session<T, E> {
  recorder: Arc<Recorder<T, E>>,
  clock: Option<Arc<dyn ControllableClock>>,
  timeout: Duration,
  deadline: Instant,
}

impl<T: Debug, E: Debug> Session<T, E> {
  fn run(&self, index: usize, step: Step<T, E>) -> Result<(), VerificationError> {
    match step {
      Step::Subscription => self.subscription(index).map(|_| ()),
      Step::Next { expected, check } => {
        let signal = self.next_signal(index, &expected)?;
        let matched = match &signal {
          Signal::Next(value) => check(value),
          _ => false,
        };
        if matched {
          Ok(())
        } else {
          Err(self.unexpected(index, expected, &signal))
        }
      }
      Step::NextCount(n) => {
        for seen in 0..n {
          let expected = format!("onNext #{} of {n}", seen + 1);
          match self.next_signal(index, &expected)? {
            Signal::Next(_) => {}
            other => return Err(self.unexpected(index, expected, &other)),
          }
        }
        Ok(())
      }
      Step::NoEvent(duration) => self.no_event(index, duration),
      Step::Await(duration) => {
        match &self.clock {
          Some(clock) => clock.advance_by(duration),
          None => thread::sleep(duration),
        }
        Ok(())
      }
      Step::Run(task) => {
        task();
        Ok(())
      }
      Step::Request(n) => self
        .subscription(index)?
        .request(n)
        .map_err(|source| VerificationError::Protocol { step: index, source }),
      Step::ConsumeWhile(predicate) => self.consume_while(index, predicate),
      Step::Cancel => {
        self.subscription(index)?.cancel();
        Ok(())
      }
      Step::Complete => match self.next_signal(index, "onComplete()")? {
        Signal::Complete => Ok(()),
        other => Err(self.unexpected(index, "onComplete()".into(), &other)),
      },
      Step::Error { expected, check } => match self.next_signal(index, &expected)? {
        Signal::Error(err) => {
          check(&err).map_err(|message| VerificationError::Assertion { step: index, message })
        }
        other => Err(self.unexpected(index, expected, &other)),
      },
    }
  }

  fn subscription(&self, index: usize) -> Result<SubscriptionRef, VerificationError> {
    self
      .recorder
      .wait_for(self.deadline, |state| state.subscription.clone())
      .ok_or_else(|| self.timed_out(index, "onSubscribe"))
  }

  fn next_signal(&self, index: usize, expected: &str) -> Result<Signal<T, E>, VerificationError> {
    self
      .recorder
      .wait_for(self.deadline, |state| state.events.pop_front())
      .ok_or_else(|| self.timed_out(index, expected))
  }

  fn no_event(&self, index: usize, duration: Duration) -> Result<(), VerificationError> {
    let arrived = match &self.clock {
      Some(clock) => {
        clock.advance_by(duration.saturating_sub(ONE_NANO));
        self.recorder.state.lock().events.pop_front()
      }
      None => {
        let window = Instant::now() + duration;
        self.recorder.wait_for(window, |state| state.events.pop_front())
      }
    };
    match arrived {
      None => Ok(()),
      Some(signal) => Err(self.unexpected(index, format!("no event for {duration:?}"), &signal)),
    }
  }

  fn consume_while(
    &self, index: usize, mut predicate: Box<dyn FnMut(&T) -> bool>,
  ) -> Result<(), VerificationError> {
    loop {
      let keep_going = self
        .recorder
        .wait_for(self.deadline, |state| {
          let matched = match state.events.front()? {
            Signal::Next(value) => predicate(value),
            _ => false,
          };
          if matched {
            state.events.pop_front();
          }
          Some(matched)
        })
        .ok_or_else(|| self.timed_out(index, "an element or terminal signal"))?;
      if !keep_going {
        return Ok(());
      }
    }
  }

  fn unexpected(&self, index: usize, expected: String, actual: &Signal<T, E>) -> VerificationError {
    VerificationError::Unexpected { step: index, expected, actual: describe(actual) }
  }

  fn timed_out(&self, index: usize, expected: &str) -> VerificationError {
    VerificationError::Timeout { step: index, expected: expected.to_owned(), timeout: self.timeout }
  }

  fn close(&self) {
    let subscription = self.recorder.state.lock().subscription.take();
    if let Some(subscription) = subscription {
      subscription.cancel();
    }
  }
}

#[cfg(test)]
mod tests {
  use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
  };

  use super::*;
  use crate::{error::FluxError, flux, prelude::*};

  const DAY: Duration = Duration::from_secs(24 * 60 * 60);

  #[test]
  fn passes_on_matching_sequence() {
    StepVerifier::create(flux::from_iter(vec!["A", "B"]))
      .expect_subscription()
      .expect_next(["A", "B"])
      .verify_complete()
      .unwrap();
  }

  #[test]
  fn reports_the_failing_step() {
    let err = StepVerifier::create(flux::range(1, 3))
      .expect_next([1, 5])
      .verify_complete()
      .unwrap_err();
    match err {
      VerificationError::Unexpected { step, expected, actual } => {
        assert_eq!(step, 1);
        assert_eq!(expected, "onNext(5)");
        assert_eq!(actual, "onNext(2)");
      }
      other => panic!("unexpected failure: {other}"),
    }
  }

  #[test]
  fn demand_is_under_script_control() {
    StepVerifier::with_initial_demand(flux::range(1, 10), 0)
      .expect_subscription()
      .expect_no_event(Duration::from_millis(20))
      .then_request(2)
      .expect_next([1, 2])
      .expect_no_event(Duration::from_millis(20))
      .then_cancel()
      .verify()
      .unwrap();
  }

  #[test]
  fn virtual_interval_window_excludes_its_end() {
    StepVerifier::with_virtual_time(|scheduler| flux::interval(DAY, scheduler).take(2))
      .expect_subscription()
      .expect_no_event(DAY)
      .then_await(DAY)
      .expect_next([0])
      .then_await(DAY)
      .expect_next([1])
      .verify_complete()
      .unwrap();
  }

  #[test]
  fn overflow_surfaces_as_error() {
    let vts = Arc::new(VirtualTimeScheduler::new());
    StepVerifier::with_initial_demand(flux::interval(DAY, vts.clone()), 1)
      .then(move || vts.advance_by(DAY * 2))
      .expect_next([0])
      .expect_error_with(FluxError::Overflow { tick: 1 })
      .verify()
      .unwrap();
  }

  #[test]
  fn consume_while_stops_before_the_first_miss() {
    StepVerifier::create(flux::range(1, 10))
      .then_consume_while(|v| *v <= 5)
      .expect_next([6, 7, 8, 9, 10])
      .verify_complete()
      .unwrap();
  }

  #[test]
  fn then_runs_in_order() {
    let ran = Arc::new(AtomicBool::new(false));
    let flag = ran.clone();
    StepVerifier::create(flux::just(1))
      .then(move || flag.store(true, Ordering::SeqCst))
      .expect_next_count(1)
      .verify_complete()
      .unwrap();
    assert!(ran.load(Ordering::SeqCst));
  }

  #[test]
  fn error_expectations() {
    StepVerifier::create(flux::error::<i32, _>("boom"))
      .expect_error_matches(|e| e.contains("oo"))
      .verify()
      .unwrap();

    let err = StepVerifier::create(flux::error::<i32, _>("boom"))
      .expect_error_with("bang")
      .verify()
      .unwrap_err();
    assert!(matches!(err, VerificationError::Assertion { step: 0, .. }));
  }

  #[test]
  fn silence_times_out() {
    let err = StepVerifier::create(flux::never::<i32>())
      .timeout(Duration::from_millis(50))
      .verify_complete()
      .unwrap_err();
    assert!(matches!(err, VerificationError::Timeout { step: 0, .. }));
  }
}
