//! End-to-end scenarios: sources, backpressure, time, hot publishers and
//! thread hopping, each checked with the step verifier.

use std::{
  sync::{
    atomic::{AtomicU64, Ordering},
    mpsc, Arc,
  },
  thread,
};

use parking_lot::Mutex;
use rxflux::{config::SchedulerConfig, prelude::*, verifier::StepVerifier};
use tracing_subscriber::EnvFilter;

const DAY: Duration = Duration::from_secs(24 * 60 * 60);

fn init_logging() {
  let _ = tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::from_default_env())
    .with_test_writer()
    .try_init();
}

fn pool(config: SchedulerConfig) -> SchedulerRef { Arc::new(config.build().unwrap()) }

fn thread_name() -> String { thread::current().name().unwrap_or_default().to_owned() }

// ==================== Sources ====================

#[test]
fn just_emits_in_order() {
  init_logging();
  let names = flux::from_iter(["Daniel", "Souza", "DevDojo", "Academy"]).log();
  StepVerifier::create(names)
    .expect_next(["Daniel", "Souza", "DevDojo", "Academy"])
    .verify_complete()
    .unwrap();
}

#[test]
fn range_and_list_are_cold() {
  init_logging();
  let numbers = flux::range(1, 5).log();
  let seen = Arc::new(Mutex::new(vec![]));
  let sink = seen.clone();
  numbers.subscribe(move |v| sink.lock().push(v));
  assert_eq!(*seen.lock(), vec![1, 2, 3, 4, 5]);

  StepVerifier::create(numbers).expect_next([1, 2, 3, 4, 5]).verify_complete().unwrap();
  StepVerifier::create(flux::from_iter(vec![1, 2, 3, 4, 5]).log())
    .expect_next([1, 2, 3, 4, 5])
    .verify_complete()
    .unwrap();
}

#[test]
fn map_failure_ends_the_stream() {
  init_logging();
  let numbers = flux::range(1, 5).log().with_err::<String>().try_map(|v| {
    if v == 4 {
      Err("index error".to_owned())
    } else {
      Ok(v)
    }
  });

  let events = Arc::new(Mutex::new(vec![]));
  let (next, error, done) = (events.clone(), events.clone(), events.clone());
  numbers.subscribe_full(
    move |v| next.lock().push(format!("{v}")),
    move |e| error.lock().push(e),
    move || done.lock().push("DONE!".to_owned()),
    |subscription: &SubscriptionRef| subscription.request(3).unwrap(),
  );
  assert_eq!(*events.lock(), vec!["1", "2", "3"]);

  StepVerifier::create(numbers)
    .expect_next([1, 2, 3])
    .expect_error_with("index error".to_owned())
    .verify()
    .unwrap();
}

// ==================== Backpressure ====================

struct PairwiseRequester {
  subscription: Option<SubscriptionRef>,
  count: u32,
  seen: Arc<Mutex<Vec<i64>>>,
}

impl<E> Subscriber<i64, E> for PairwiseRequester {
  fn on_subscribe(&mut self, subscription: SubscriptionRef) {
    subscription.request(2).unwrap();
    self.subscription = Some(subscription);
  }

  fn on_signal(&mut self, signal: Signal<i64, E>) {
    if let Signal::Next(v) = signal {
      self.seen.lock().push(v);
      self.count += 1;
      if self.count >= 2 {
        self.count = 0;
        if let Some(subscription) = &self.subscription {
          subscription.request(2).unwrap();
        }
      }
    }
  }
}

#[test]
fn hand_written_subscriber_paces_in_pairs() {
  init_logging();
  let requests = Arc::new(Mutex::new(vec![]));
  let r = requests.clone();
  let numbers = flux::range(1, 10).log().do_on_request(move |n| r.lock().push(n));
  let seen = Arc::new(Mutex::new(vec![]));
  numbers.subscribe_with(PairwiseRequester { subscription: None, count: 0, seen: seen.clone() });

  assert_eq!(*seen.lock(), (1..=10).collect::<Vec<_>>());
  assert!(requests.lock().iter().all(|n| *n == 2));

  StepVerifier::create(numbers).expect_next(1..=10).verify_complete().unwrap();
}

#[test]
fn limit_rate_batches_upstream_requests() {
  init_logging();
  let requests = Arc::new(Mutex::new(vec![]));
  let r = requests.clone();
  let numbers = flux::range(1, 10).do_on_request(move |n| r.lock().push(n)).log().limit_rate(3);

  StepVerifier::create(numbers).expect_next(1..=10).verify_complete().unwrap();
  assert_eq!(*requests.lock(), vec![3, 3, 3, 3]);
}

// ==================== Time ====================

#[test]
fn interval_on_a_real_pool() {
  init_logging();
  let timers = pool(SchedulerConfig::single("parallel"));
  StepVerifier::create(flux::interval(Duration::from_millis(10), timers).take(10).log())
    .timeout(Duration::from_secs(30))
    .expect_next(0..10)
    .verify_complete()
    .unwrap();
}

#[test]
fn interval_under_virtual_time() {
  init_logging();
  StepVerifier::with_virtual_time(|scheduler| flux::interval(DAY, scheduler).take(10).log())
    .expect_subscription()
    .expect_no_event(DAY)
    .then_await(DAY)
    .expect_next([0])
    .then_await(DAY)
    .expect_next([1])
    .then_cancel()
    .verify()
    .unwrap();
}

// ==================== Hot publishers ====================

#[test]
fn connectable_starts_on_connect() {
  init_logging();
  let timers = pool(SchedulerConfig::single("delay"));
  let hot = flux::range(1, 10).log().delay_elements(Duration::from_millis(10), timers).publish();
  let trigger = hot.clone();

  let (tx, rx) = mpsc::channel();
  let second = Arc::new(Mutex::new(vec![]));
  let sink = second.clone();
  hot.subscribe_all(move |v| sink.lock().push(v), |_| {}, move || tx.send(()).unwrap());
  assert!(!hot.is_connected());

  StepVerifier::create(hot)
    .timeout(Duration::from_secs(30))
    .then(move || {
      trigger.connect();
    })
    .then_consume_while(|v| *v <= 5)
    .expect_next([6, 7, 8, 9, 10])
    .expect_complete()
    .verify()
    .unwrap();

  rx.recv_timeout(Duration::from_secs(5)).unwrap();
  assert_eq!(*second.lock(), (1..=10).collect::<Vec<_>>());
}

// ==================== Thread hopping ====================

#[test]
fn subscribe_on_moves_the_whole_chain() {
  init_logging();
  let threads = Arc::new(Mutex::new(vec![]));
  let (first, second) = (threads.clone(), threads.clone());
  let numbers = flux::range(1, 4)
    .map(move |v| {
      first.lock().push(("map1", thread_name()));
      v
    })
    .subscribe_on(pool(SchedulerConfig::single("single")))
    .map(move |v| {
      second.lock().push(("map2", thread_name()));
      v
    });

  StepVerifier::create(numbers).expect_subscription().expect_next(1..=4).verify_complete().unwrap();
  assert!(threads.lock().iter().all(|(_, name)| name.starts_with("single-")));
}

#[test]
fn publish_on_moves_only_downstream() {
  init_logging();
  let threads = Arc::new(Mutex::new(vec![]));
  let (first, second) = (threads.clone(), threads.clone());
  let caller = thread_name();
  let numbers = flux::range(1, 4)
    .map(move |v| {
      first.lock().push(("map1", thread_name()));
      v
    })
    .publish_on(pool(SchedulerConfig::single("single")))
    .map(move |v| {
      second.lock().push(("map2", thread_name()));
      v
    });

  StepVerifier::create(numbers).expect_subscription().expect_next(1..=4).verify_complete().unwrap();
  let threads = threads.lock();
  assert!(threads.iter().filter(|(op, _)| *op == "map1").all(|(_, name)| *name == caller));
  assert!(threads.iter().filter(|(op, _)| *op == "map2").all(|(_, name)| name.starts_with("single-")));
}

#[test]
fn mixed_hops_keep_order() {
  init_logging();
  let single = pool(SchedulerConfig::single("single"));
  let elastic = pool(SchedulerConfig::growable("bounded-elastic", 4));

  let chains: Vec<BoxedPublisher<i64, std::convert::Infallible>> = vec![
    flux::range(1, 4).subscribe_on(elastic.clone()).map(|v| v).subscribe_on(single.clone()).boxed(),
    flux::range(1, 4).publish_on(single.clone()).map(|v| v).publish_on(elastic.clone()).boxed(),
    flux::range(1, 4).publish_on(single.clone()).subscribe_on(elastic.clone()).boxed(),
    flux::range(1, 4).subscribe_on(single.clone()).publish_on(elastic.clone()).boxed(),
  ];
  for chain in chains {
    StepVerifier::create(chain).expect_subscription().expect_next(1..=4).verify_complete().unwrap();
  }
}

#[test]
fn blocking_callable_runs_on_an_elastic_pool() {
  init_logging();
  let elastic = pool(SchedulerConfig::growable("bounded-elastic", 4));
  let (tx, rx) = mpsc::channel();
  let lines = flux::from_callable(move || {
    tx.send(thread_name()).ok();
    std::fs::read_to_string(concat!(env!("CARGO_MANIFEST_DIR"), "/Cargo.toml"))
      .map(|text| text.lines().map(str::to_owned).collect::<Vec<_>>())
  })
  .log()
  .subscribe_on(elastic);

  StepVerifier::create(lines)
    .expect_subscription()
    .then_consume_while(|lines| !lines.is_empty())
    .verify_complete()
    .unwrap();
  assert!(rx.recv_timeout(Duration::from_secs(5)).unwrap().starts_with("bounded-elastic-"));
}

// ==================== Fallbacks ====================

#[test]
fn switch_if_empty_replaces_an_empty_source() {
  init_logging();
  let source = flux::empty::<&str>().switch_if_empty(flux::just("not empty anymore")).log();
  StepVerifier::create(source)
    .expect_subscription()
    .expect_next(["not empty anymore"])
    .verify_complete()
    .unwrap();
}

#[test]
fn on_error_return_completes_with_fallback() {
  init_logging();
  let source = flux::error::<&str, _>("illegal argument").on_error_return("EMPTY").log();
  StepVerifier::create(source).expect_next(["EMPTY"]).verify_complete().unwrap();
}

#[test]
fn defer_evaluates_per_subscription() {
  init_logging();
  let clock = Arc::new(AtomicU64::new(0));
  let eager = flux::just(clock.fetch_add(1, Ordering::SeqCst));
  let c = clock.clone();
  let deferred = flux::defer(move || flux::just(c.fetch_add(1, Ordering::SeqCst)));

  for _ in 0..2 {
    StepVerifier::create(eager.clone()).expect_next([0]).verify_complete().unwrap();
  }
  StepVerifier::create(deferred.clone()).expect_next([1]).verify_complete().unwrap();
  StepVerifier::create(deferred).expect_next([2]).verify_complete().unwrap();
}
