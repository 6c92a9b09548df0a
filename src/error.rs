//! Error types
//!
//! Three families live here:
//!
//! - [`ProtocolError`]: misuse of the subscription protocol. These are
//!   returned to the caller that broke the contract and never travel down a
//!   stream as an `Error` signal.
//! - [`FluxError`]: errors raised by the engine's own sources.
//! - [`SchedulerError`]: worker pool construction and lifecycle failures.
//!
//! Stream errors produced by user code are not wrapped: every publisher
//! carries its own `Err` type parameter.

use thiserror::Error;

/// Violation of the request/cancel contract by the caller.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolError {
  /// `request(0)`: demand must be strictly positive.
  #[error("request must be strictly positive, got {requested}")]
  NonPositiveRequest { requested: u64 },

  /// The handle has no subscription attached yet.
  #[error("no subscription has been attached to this handle yet")]
  NotSubscribed,
}

/// Errors originating from the engine's built-in sources.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FluxError {
  /// A timer fired but the subscriber had no outstanding demand.
  #[error("could not emit tick {tick} due to lack of requests")]
  Overflow { tick: u64 },
}

/// Failures creating or using a worker pool.
#[derive(Debug, Error)]
pub enum SchedulerError {
  #[error("failed to start worker pool `{name}`")]
  Build {
    name: String,
    #[source]
    source: std::io::Error,
  },

  #[error("scheduler `{0}` has been disposed")]
  Disposed(String),
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn messages() {
    assert_eq!(
      ProtocolError::NonPositiveRequest { requested: 0 }.to_string(),
      "request must be strictly positive, got 0"
    );
    assert_eq!(
      FluxError::Overflow { tick: 3 }.to_string(),
      "could not emit tick 3 due to lack of requests"
    );
  }

  #[test]
  fn build_error_keeps_source() {
    use std::error::Error as _;

    let err = SchedulerError::Build {
      name: "single".into(),
      source: std::io::Error::new(std::io::ErrorKind::Other, "no threads"),
    };
    assert!(err.source().is_some());
    assert_eq!(err.to_string(), "failed to start worker pool `single`");
  }
}
