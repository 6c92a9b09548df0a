use std::sync::Arc;

use super::pull::{subscribe_generator, Generator};
use crate::{publisher::Publisher, subscriber::Subscriber};

/// Emits the value produced by `callable`, invoked lazily on the first
/// request of each subscription.
///
/// Combined with `subscribe_on` this is how blocking work (reading a file,
/// a synchronous client call) is placed onto a worker pool.
///
/// ```rust,no_run
/// use std::sync::Arc;
///
/// use rxflux::{config::SchedulerConfig, prelude::*};
///
/// let io: SchedulerRef = Arc::new(SchedulerConfig::growable("io", 0).build()?);
/// flux::from_callable(|| std::fs::read_to_string("Cargo.toml"))
///   .subscribe_on(io)
///   .subscribe(|text| println!("{} bytes", text.len()));
/// # Ok::<(), rxflux::error::SchedulerError>(())
/// ```
pub fn from_callable<T, E, F>(callable: F) -> FromCallable<F>
where
  F: Fn() -> Result<T, E>,
{
  FromCallable { callable: Arc::new(callable) }
}

pub struct FromCallable<F> {
  callable: Arc<F>,
}

impl<F> Clone for FromCallable<F> {
  fn clone(&self) -> Self { Self { callable: self.callable.clone() } }
}

impl<T, E, F> Publisher for FromCallable<F>
where
  F: Fn() -> Result<T, E> + Send + Sync + 'static,
  T: Send + 'static,
  E: Send + 'static,
{
  type Item = T;
  type Err = E;

  fn actual_subscribe<S>(&self, subscriber: S)
  where
    S: Subscriber<T, E> + 'static,
  {
    subscribe_generator(CallableGenerator { callable: Some(self.callable.clone()) }, subscriber)
  }
}

struct CallableGenerator<F> {
  callable: Option<Arc<F>>,
}

impl<T, E, F> Generator for CallableGenerator<F>
where
  F: Fn() -> Result<T, E> + Send + Sync + 'static,
  T: Send + 'static,
  E: Send + 'static,
{
  type Item = T;
  type Err = E;

  fn finished(&mut self) -> Option<Result<(), E>> {
    match self.callable {
      Some(_) => None,
      None => Some(Ok(())),
    }
  }

  fn produce(&mut self) -> Option<Result<T, E>> { self.callable.take().map(|f| f()) }
}
