//! Operators. Each module holds the publisher struct returned by the
//! matching [`PublisherExt`](crate::publisher::PublisherExt) method and its
//! per-subscription state.

pub mod delay_elements;
pub mod filter;
pub mod flat_map;
pub mod into_stream;
pub mod lifecycle;
pub mod limit_rate;
pub mod log;
pub mod map;
pub mod on_error;
pub mod publish_on;
pub mod subscribe_on;
pub mod switch_if_empty;
pub mod take;
