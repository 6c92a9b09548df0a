//! Bridge from a publisher to `futures::Stream`.
//!
//! The stream subscribes eagerly, prefetches a bounded number of elements
//! and requests more as they are polled, so a slow consumer applies
//! backpressure all the way to the source. Dropping the stream cancels the
//! subscription.
//!
//! ```rust
//! use futures::{executor::block_on, StreamExt};
//! use rxflux::prelude::*;
//!
//! let items: Vec<_> = block_on(flux::range(1, 3).into_stream().collect());
//! assert_eq!(items, vec![Ok(1), Ok(2), Ok(3)]);
//! ```

use std::{
  collections::VecDeque,
  pin::Pin,
  sync::Arc,
  task::{Context, Poll, Waker},
};

use futures::stream::{FusedStream, Stream};
use parking_lot::Mutex;

use crate::{
  config::replenish_threshold,
  publisher::{Publisher, PublisherExt},
  signal::Signal,
  subscriber::Subscriber,
  subscription::{request_upstream, SubscriptionRef, UNBOUNDED},
};

struct StreamState<T, E> {
  queue: VecDeque<T>,
  /// `Some(None)` after completion, `Some(Some(err))` until the error was
  /// polled.
  terminal: Option<Option<E>>,
  finished: bool,
  waker: Option<Waker>,
  subscription: Option<SubscriptionRef>,
  consumed: usize,
}

/// A `Stream` of `Result<T, E>` fed by a publisher.
///
/// Yields `Ok` for every element, then either ends or yields one `Err` and
/// ends.
pub struct PublisherStream<T, E> {
  state: Arc<Mutex<StreamState<T, E>>>,
  prefetch: usize,
  limit: usize,
}

impl<T, E> PublisherStream<T, E>
where
  T: Send + 'static,
  E: Send + 'static,
{
  pub fn new<P>(publisher: &P, prefetch: usize) -> Self
  where
    P: Publisher<Item = T, Err = E>,
  {
    let prefetch = prefetch.max(1);
    let state = Arc::new(Mutex::new(StreamState {
      queue: VecDeque::new(),
      terminal: None,
      finished: false,
      waker: None,
      subscription: None,
      consumed: 0,
    }));
    publisher.subscribe_with(StreamSubscriber { state: state.clone(), prefetch });
    Self { state, prefetch, limit: replenish_threshold(prefetch) }
  }
}

impl<T, E> Stream for PublisherStream<T, E> {
  type Item = Result<T, E>;

  fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
    let this = self.get_mut();
    let mut state = this.state.lock();
    if let Some(value) = state.queue.pop_front() {
      let replenish = if this.prefetch == usize::MAX {
        None
      } else {
        state.consumed += 1;
        if state.consumed >= this.limit {
          state.consumed = 0;
          state.subscription.clone()
        } else {
          None
        }
      };
      drop(state);
      if let Some(subscription) = replenish {
        request_upstream(&*subscription, this.limit as u64);
      }
      return Poll::Ready(Some(Ok(value)));
    }
    if state.terminal.is_some() {
      state.finished = true;
      state.subscription = None;
      let err = state.terminal.as_mut().and_then(Option::take);
      return Poll::Ready(err.map(Err));
    }
    state.waker = Some(cx.waker().clone());
    Poll::Pending
  }
}

impl<T, E> FusedStream for PublisherStream<T, E> {
  fn is_terminated(&self) -> bool {
    let state = self.state.lock();
    state.finished && state.queue.is_empty() && matches!(state.terminal, Some(None))
  }
}

impl<T, E> Drop for PublisherStream<T, E> {
  fn drop(&mut self) {
    let subscription = self.state.lock().subscription.take();
    if let Some(subscription) = subscription {
      subscription.cancel();
    }
  }
}

struct StreamSubscriber<T, E> {
  state: Arc<Mutex<StreamState<T, E>>>,
  prefetch: usize,
}

impl<T: Send, E: Send> Subscriber<T, E> for StreamSubscriber<T, E> {
  fn on_subscribe(&mut self, subscription: SubscriptionRef) {
    self.state.lock().subscription = Some(subscription.clone());
    let initial = if self.prefetch == usize::MAX { UNBOUNDED } else { self.prefetch as u64 };
    request_upstream(&*subscription, initial);
  }

  fn on_signal(&mut self, signal: Signal<T, E>) {
    let waker = {
      let mut state = self.state.lock();
      match signal {
        Signal::Next(value) => state.queue.push_back(value),
        Signal::Error(err) => state.terminal = Some(Some(err)),
        Signal::Complete => state.terminal = Some(None),
      }
      state.waker.take()
    };
    if let Some(waker) = waker {
      waker.wake();
    }
  }
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use futures::{executor::block_on, StreamExt};
  use parking_lot::Mutex;

  use crate::{config::SchedulerConfig, flux, prelude::*, scheduler::SchedulerRef};

  #[test]
  fn collects_all_elements() {
    let items: Vec<_> = block_on(flux::from_iter(vec!["A", "B"]).into_stream().collect());
    assert_eq!(items, vec![Ok("A"), Ok("B")]);
  }

  #[test]
  fn error_ends_the_stream() {
    let items: Vec<_> = block_on(
      flux::range(1, 3)
        .with_err::<&'static str>()
        .try_map(|v| if v == 2 { Err("two") } else { Ok(v) })
        .into_stream()
        .collect(),
    );
    assert_eq!(items, vec![Ok(1), Err("two")]);
  }

  #[test]
  fn requests_follow_consumption() {
    let requests = Arc::new(Mutex::new(vec![]));
    let r = requests.clone();
    let mut stream =
      flux::range(1, 100).do_on_request(move |n| r.lock().push(n)).into_stream_with(4);
    block_on(async {
      for _ in 0..3 {
        stream.next().await;
      }
    });
    assert_eq!(*requests.lock(), vec![4, 3]);
  }

  #[tokio::test]
  async fn awaits_elements_from_a_pool() {
    let pool: SchedulerRef = Arc::new(SchedulerConfig::single("stream").build().unwrap());
    let items: Vec<_> = flux::range(1, 5).subscribe_on(pool).into_stream().collect().await;
    assert_eq!(items.len(), 5);
  }
}
