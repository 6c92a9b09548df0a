//! Sources: the publishers every chain starts from.
//!
//! | Source | Emits |
//! |---|---|
//! | [`just`], [`from_iter`] | a fixed sequence, then completes |
//! | [`range`] | `count` consecutive integers |
//! | [`from_callable`] | one lazily computed value |
//! | [`defer`] | whatever a per-subscription factory builds |
//! | [`interval`] | a counter on a timer |
//! | [`error`], [`empty`], [`never`] | a lone terminal, or nothing |
//!
//! Synchronous sources share one demand-driven emission loop: nothing is
//! produced beyond the outstanding demand, and a terminal is delivered as
//! soon as the sequence is exhausted.

mod callable;
mod defer;
mod from_iter;
mod interval;
mod pull;
mod range;
mod trivial;

pub use callable::{from_callable, FromCallable};
pub use defer::{defer, Defer};
pub use from_iter::{from_iter, just, FromIter};
pub use interval::{interval, interval_with_delay, Interval};
pub use range::{range, Range};
pub use trivial::{empty, error, never, Empty, Error, Never};
