//! # rxflux: demand-driven reactive streams
//!
//! Publishers, subscribers and subscriptions following the Reactive Streams
//! protocol: nothing flows until a subscriber requests it, and a subscriber
//! never receives more elements than it asked for.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::{Arc, Mutex};
//!
//! use rxflux::prelude::*;
//!
//! let seen = Arc::new(Mutex::new(vec![]));
//! let sink = seen.clone();
//! flux::range(1, 10)
//!   .filter(|v| v % 2 == 0)
//!   .map(|v| v * 2)
//!   .subscribe(move |v| sink.lock().unwrap().push(v));
//! assert_eq!(*seen.lock().unwrap(), vec![4, 8, 12, 16, 20]);
//! ```
//!
//! ## Key Concepts
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Publisher`] | Cold, reusable source of a sequence; operators chain on [`PublisherExt`] |
//! | [`Subscriber`] | Receives `on_subscribe`, then [`Signal`]s bounded by demand |
//! | [`Subscription`] | `request(n)` / `cancel()` link between the two |
//! | [`Scheduler`] | Where work runs: worker pools or virtual time |
//! | [`ConnectableFlux`] | Hot, shared publisher that starts on `connect()` |
//!
//! ## Feature Flags
//!
//! - **`verifier`** (default): [`StepVerifier`](verifier::StepVerifier), a
//!   scripted expectation harness for tests.
//!
//! [`Publisher`]: publisher::Publisher
//! [`PublisherExt`]: publisher::PublisherExt
//! [`Subscriber`]: subscriber::Subscriber
//! [`Subscription`]: subscription::Subscription
//! [`Signal`]: signal::Signal
//! [`Scheduler`]: scheduler::Scheduler
//! [`ConnectableFlux`]: connectable::ConnectableFlux

pub mod config;
pub mod connectable;
pub mod error;
pub mod flux;
pub mod ops;
pub mod prelude;
pub mod publisher;
pub mod scheduler;
pub mod signal;
pub mod subscriber;
pub mod subscription;
pub mod type_hint;
#[cfg(feature = "verifier")]
pub mod verifier;

pub use prelude::*;

#[cfg(doctest)]
mod readme {
  #![doc = include_str!("../README.md")]
}
