//! Tests for the fixed-interval poller.

use std::cell::Cell;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rstest::rstest;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::predicates::{instance_absent, pool_drained};
use super::*;
use crate::api::{Instance, Pool};

const INTERVAL: Duration = Duration::from_millis(50);

fn policy(max_attempts: Option<u32>) -> PollPolicy {
    PollPolicy::unbounded()
        .with_interval(INTERVAL)
        .with_max_attempts(max_attempts)
}

fn named(names: &[&str]) -> Vec<Instance> {
    names
        .iter()
        .map(|name| Instance {
            name: (*name).to_owned(),
            ..Instance::default()
        })
        .collect()
}

/// Returns a fetch closure that serves `snapshots` in order, repeating the last.
fn scripted<'a, T: Clone + 'a>(
    snapshots: Vec<T>,
    calls: &'a Cell<u32>,
) -> impl FnMut() -> std::future::Ready<Result<T, RemoteError>> + 'a {
    let mut queue: VecDeque<T> = snapshots.into();
    move || {
        calls.set(calls.get() + 1);
        let next = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        };
        std::future::ready(next.ok_or_else(|| RemoteError::Transport {
            endpoint: String::from("scripted"),
            message: String::from("script exhausted"),
        }))
    }
}

#[rstest]
#[case::immediate(0)]
#[case::after_one(1)]
#[case::after_four(4)]
#[tokio::test(start_paused = true)]
async fn converges_after_k_failures_with_k_sleeps(#[case] k: u32) {
    let calls = Cell::new(0);
    let snapshots: Vec<u32> = (0..=k).collect();
    let poller = Poller::new(policy(Some(10)));
    let started = Instant::now();

    let polled = poller
        .wait_for("counter", scripted(snapshots, &calls), |value| *value == k)
        .await
        .unwrap_or_else(|err| panic!("wait should converge: {err}"));

    assert_eq!(polled.value, k);
    assert_eq!(polled.attempts, k + 1);
    assert_eq!(calls.get(), k + 1);
    assert_eq!(started.elapsed(), INTERVAL * k);
}

#[tokio::test(start_paused = true)]
async fn drain_wait_never_returns_on_non_empty_read() {
    let calls = Cell::new(0);
    let shrinking = vec![
        Pool {
            instances: named(&["a", "b"]),
            ..Pool::default()
        },
        Pool {
            instances: named(&["b"]),
            ..Pool::default()
        },
        Pool::default(),
    ];
    let poller = Poller::new(policy(None));

    let polled = poller
        .wait_for("pool drain", scripted(shrinking, &calls), pool_drained)
        .await
        .unwrap_or_else(|err| panic!("drain should complete: {err}"));

    assert!(polled.value.instances.is_empty());
    assert_eq!(calls.get(), 3);
}

#[tokio::test(start_paused = true)]
async fn disappearance_is_confirmed_on_read_m_plus_one() {
    let calls = Cell::new(0);
    let listings = vec![
        named(&["garm-1", "garm-2"]),
        named(&["garm-1"]),
        named(&["garm-1"]),
        named(&["garm-2"]),
    ];
    let poller = Poller::new(policy(None));

    let polled = poller
        .wait_for("garm-1 deletion", scripted(listings, &calls), instance_absent("garm-1"))
        .await
        .unwrap_or_else(|err| panic!("deletion should be observed: {err}"));

    assert_eq!(polled.attempts, 4);
    assert_eq!(calls.get(), 4);
}

#[tokio::test(start_paused = true)]
async fn exhausted_budget_times_out_without_trailing_sleep() {
    let calls = Cell::new(0);
    let poller = Poller::new(policy(Some(3)));
    let started = Instant::now();

    let err = poller
        .wait_for("never", scripted(vec![false], &calls), |ready| *ready)
        .await
        .expect_err("wait should time out");

    assert!(matches!(
        err,
        PollError::Timeout { ref what, attempts: 3, .. } if what == "never"
    ));
    assert_eq!(calls.get(), 3);
    assert_eq!(started.elapsed(), INTERVAL * 2);
}

#[tokio::test(start_paused = true)]
async fn deadline_bounds_unlimited_attempts() {
    let calls = Cell::new(0);
    let poller = Poller::new(policy(None).with_deadline(Some(INTERVAL * 3)));

    let err = poller
        .wait_for("never", scripted(vec![false], &calls), |ready| *ready)
        .await
        .expect_err("deadline should stop the wait");

    assert!(matches!(err, PollError::Timeout { attempts: 4, .. }));
    assert_eq!(calls.get(), 4);
}

#[tokio::test(start_paused = true)]
async fn remote_error_stops_the_wait_immediately() {
    let calls = Cell::new(0);
    let poller = Poller::new(policy(None));

    let err = poller
        .wait_for("empty", scripted(Vec::<bool>::new(), &calls), |ready| *ready)
        .await
        .expect_err("fetch failure should surface");

    assert!(matches!(err, PollError::Remote(RemoteError::Transport { .. })));
    assert_eq!(calls.get(), 1);
}

#[tokio::test(start_paused = true)]
async fn cancellation_interrupts_the_sleep() {
    let token = CancellationToken::new();
    let poller = Poller::new(policy(None)).with_cancellation(token.clone());
    let seen = Arc::new(Mutex::new(0_u32));
    let counter = Arc::clone(&seen);

    let fetch = move || {
        let mut guard = counter
            .lock()
            .unwrap_or_else(|err| panic!("counter lock poisoned: {err}"));
        *guard += 1;
        if *guard == 2 {
            token.cancel();
        }
        std::future::ready(Ok::<_, RemoteError>(false))
    };

    let err = poller
        .wait_for("cancellable", fetch, |ready| *ready)
        .await
        .expect_err("cancellation should stop the wait");

    assert_eq!(
        err,
        PollError::Cancelled {
            what: String::from("cancellable"),
            attempts: 2,
        }
    );
    let fetched = *seen
        .lock()
        .unwrap_or_else(|err| panic!("counter lock poisoned: {err}"));
    assert_eq!(fetched, 2);
}

#[test]
fn jitter_stays_within_bounds() {
    let policy = PollPolicy::default()
        .with_interval(Duration::from_millis(100))
        .with_jitter(Duration::from_millis(20));
    for _ in 0..64 {
        let delay = policy.next_delay();
        assert!(delay >= Duration::from_millis(100));
        assert!(delay <= Duration::from_millis(120));
    }
}

#[test]
fn default_policy_is_bounded() {
    let policy = PollPolicy::default();
    assert_eq!(policy.interval, Duration::from_secs(5));
    assert_eq!(policy.max_attempts, Some(120));
    assert_eq!(PollPolicy::unbounded().max_attempts, None);
}
