//! Prelude module for convenient imports

pub use crate::{
  connectable::{AutoConnect, ConnectableFlux},
  flux,
  publisher::{BoxedPublisher, Publisher, PublisherExt},
  scheduler::{ControllableClock, Duration, Scheduler, SchedulerRef, VirtualTimeScheduler},
  signal::Signal,
  subscriber::Subscriber,
  subscription::{Subscription, SubscriptionHandle, SubscriptionRef, UNBOUNDED},
};
