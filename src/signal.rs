//! The three events a subscriber can observe, as one tagged union.

/// A single event flowing from a publisher to its subscriber.
///
/// At most one terminal variant (`Error` or `Complete`) is ever delivered
/// for a given subscription, and nothing follows it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal<T, E> {
  Next(T),
  Error(E),
  Complete,
}

impl<T, E> Signal<T, E> {
  #[inline]
  pub fn is_terminal(&self) -> bool { !matches!(self, Signal::Next(_)) }

  #[inline]
  pub fn is_next(&self) -> bool { matches!(self, Signal::Next(_)) }

  /// Transform the `Next` payload, leaving terminals untouched.
  pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Signal<U, E> {
    match self {
      Signal::Next(v) => Signal::Next(f(v)),
      Signal::Error(e) => Signal::Error(e),
      Signal::Complete => Signal::Complete,
    }
  }

  /// Transform the `Error` payload, leaving other variants untouched.
  pub fn map_err<F>(self, f: impl FnOnce(E) -> F) -> Signal<T, F> {
    match self {
      Signal::Next(v) => Signal::Next(v),
      Signal::Error(e) => Signal::Error(f(e)),
      Signal::Complete => Signal::Complete,
    }
  }

  /// Build a terminal signal from a `Result`.
  pub fn terminal(result: Result<(), E>) -> Self {
    match result {
      Ok(()) => Signal::Complete,
      Err(e) => Signal::Error(e),
    }
  }
}
