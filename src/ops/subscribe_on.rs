use std::{
  sync::Arc,
  thread::{self, ThreadId},
};

use once_cell::sync::OnceCell;
use parking_lot::Mutex;

use crate::{
  error::ProtocolError,
  publisher::Publisher,
  scheduler::{SchedulerRef, TaskHandle},
  signal::Signal,
  subscriber::Subscriber,
  subscription::{
    request_upstream, validate_request, Subscription, SubscriptionArbiter, SubscriptionRef,
  },
};

/// Subscribe to the source from a task on `scheduler`.
///
/// The downstream receives its subscription right away on the calling
/// thread. The source is subscribed from the scheduler, and every later
/// request issued from another thread is routed back there, so a source
/// that produces while serving requests keeps producing on the scheduler.
///
/// With several `subscribe_on` in one chain the one closest to the source
/// decides where it runs.
///
/// ```rust,no_run
/// use std::sync::Arc;
///
/// use rxflux::{config::SchedulerConfig, prelude::*};
///
/// let io = Arc::new(SchedulerConfig::growable("io", 8).build()?);
/// flux::range(1, 3).subscribe_on(io).subscribe(|v| println!("{v}"));
/// # Ok::<(), rxflux::error::SchedulerError>(())
/// ```
pub struct SubscribeOn<P> {
  source: Arc<P>,
  scheduler: SchedulerRef,
}

impl<P> SubscribeOn<P> {
  pub fn new(source: P, scheduler: SchedulerRef) -> Self {
    Self { source: Arc::new(source), scheduler }
  }
}

impl<P: Publisher> Publisher for SubscribeOn<P> {
  type Item = P::Item;
  type Err = P::Err;

  fn actual_subscribe<S>(&self, mut subscriber: S)
  where
    S: Subscriber<P::Item, P::Err> + 'static,
  {
    let core = Arc::new(SubscribeOnCore {
      arbiter: Arc::new(SubscriptionArbiter::new()),
      worker: OnceCell::new(),
      scheduler: self.scheduler.clone(),
      task: Mutex::new(None),
    });
    subscriber.on_subscribe(Arc::new(SubscribeOnGate(core.clone())));
    if core.arbiter.is_cancelled() {
      return;
    }

    let source = self.source.clone();
    let arbiter = core.arbiter.clone();
    let worker = core.clone();
    let task = self.scheduler.schedule(Box::new(move || {
      let _ = worker.worker.set(thread::current().id());
      source.actual_subscribe(SubscribeOnSubscriber { actual: subscriber, arbiter });
    }));
    *core.task.lock() = Some(task);
  }
}

struct SubscribeOnCore {
  arbiter: Arc<SubscriptionArbiter>,
  worker: OnceCell<ThreadId>,
  scheduler: SchedulerRef,
  task: Mutex<Option<TaskHandle>>,
}

impl SubscribeOnCore {
  fn on_worker(&self) -> bool { self.worker.get() == Some(&thread::current().id()) }
}

struct SubscribeOnGate(Arc<SubscribeOnCore>);

impl Subscription for SubscribeOnGate {
  fn request(&self, n: u64) -> Result<(), ProtocolError> {
    validate_request(n)?;
    let core = &self.0;
    if core.on_worker() {
      return core.arbiter.request(n);
    }
    let arbiter = core.arbiter.clone();
    core.scheduler.schedule(Box::new(move || request_upstream(&*arbiter, n)));
    Ok(())
  }

  fn cancel(&self) {
    self.0.arbiter.cancel();
    if let Some(task) = self.0.task.lock().take() {
      task.cancel();
    }
  }
}

struct SubscribeOnSubscriber<S> {
  actual: S,
  arbiter: Arc<SubscriptionArbiter>,
}

impl<S, T, E> Subscriber<T, E> for SubscribeOnSubscriber<S>
where
  S: Subscriber<T, E>,
{
  fn on_subscribe(&mut self, subscription: SubscriptionRef) { self.arbiter.set(subscription) }

  #[inline]
  fn on_signal(&mut self, signal: Signal<T, E>) { self.actual.on_signal(signal) }
}
