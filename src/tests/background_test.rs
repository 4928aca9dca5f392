use std::panic;
use std::thread;
use std::time::{Duration, Instant};

use crate::background::{self, Worker, WorkerConfig};
use crate::tests::{assert_memory_freed, link, ring, serial, Counter};
use crate::{Cyptr, Error};

// Leaves background processing disabled even when a test fails.
struct BackgroundGuard;

impl BackgroundGuard {
    fn enable() -> BackgroundGuard {
        assert!(background::enable());
        BackgroundGuard
    }
}

impl Drop for BackgroundGuard {
    fn drop(&mut self) {
        background::disable();
    }
}

#[test]
fn enable_and_disable() {
    let _serial = serial();
    assert!(!background::is_enabled());
    let _guard = BackgroundGuard::enable();
    assert!(background::is_enabled());
    assert!(!background::enable());
    assert_eq!(background::disable(), 0);
    assert!(!background::is_enabled());
    assert_eq!(background::disable(), 0);
}

#[test]
fn sweeps_are_queued_until_disable() {
    let _serial = serial();
    let counter = Counter::default();
    let _guard = BackgroundGuard::enable();
    let k = 10;
    for _ in 0..k {
        drop(ring(&counter, 2));
    }
    assert_eq!(counter.live(), 2 * k);
    assert_eq!(background::pending(), k);
    assert_eq!(background::disable(), k);
    assert_memory_freed(&counter);
}

#[test]
fn generation_is_queued_once() {
    let _serial = serial();
    let counter = Counter::default();
    let _guard = BackgroundGuard::enable();
    let links = ring(&counter, 4);
    drop(links);
    assert_eq!(background::pending(), 1);
    assert_eq!(background::process(false, 0), 1);
    assert!(!background::process_one(false));
    assert_eq!(background::pending(), 0);
    assert_memory_freed(&counter);
}

#[test]
fn process_respects_count() {
    let _serial = serial();
    let counter = Counter::default();
    let _guard = BackgroundGuard::enable();
    for _ in 0..3 {
        drop(ring(&counter, 3));
    }
    assert_eq!(background::process(false, 2), 2);
    assert_eq!(counter.live(), 3);
    assert!(background::process_one(false));
    assert_memory_freed(&counter);
}

#[test]
fn disabled_queue_does_nothing() {
    let _serial = serial();
    assert_eq!(background::pending(), 0);
    assert!(!background::process_one(true));
    assert_eq!(background::process(true, 0), 0);
}

#[test]
fn worker_sweeps_in_the_background() {
    let _serial = serial();
    let counter = Counter::default();
    let worker = Worker::with_config(WorkerConfig::default().name("cyptr-test-worker")).unwrap();
    assert!(background::is_enabled());
    for _ in 0..10 {
        drop(ring(&counter, 5));
    }
    let deadline = Instant::now() + Duration::from_secs(10);
    while counter.live() > 0 && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(1));
    }
    drop(worker);
    assert!(!background::is_enabled());
    assert_memory_freed(&counter);
}

#[test]
fn dropping_worker_drains_queue() {
    let _serial = serial();
    let counter = Counter::default();
    let worker = Worker::start().unwrap();
    for _ in 0..50 {
        drop(ring(&counter, 2));
    }
    drop(worker);
    assert_memory_freed(&counter);
}

#[test]
fn one_worker_at_a_time() {
    let _serial = serial();
    let worker = Worker::start().unwrap();
    assert!(matches!(Worker::start(), Err(Error::WorkerRunning)));
    drop(worker);
    let worker = Worker::start().unwrap();
    drop(worker);
}

#[test]
fn batch_defers_sweeps_to_the_outermost_end() {
    let _serial = serial();
    let counter = Counter::default();
    let inner_live = background::batch(|| {
        drop(ring(&counter, 3));
        background::batch(|| drop(ring(&counter, 2)));
        counter.live()
    });
    assert_eq!(inner_live, 5);
    assert_memory_freed(&counter);
    // Nothing stays deferred once the batch is over.
    drop(ring(&counter, 4));
    assert_memory_freed(&counter);
}

#[test]
fn batch_walks_a_long_chain() {
    let _serial = serial();
    let counter = Counter::default();
    let n = 5_000;
    let head = link(&counter, 0);
    let mut tail = head.clone();
    for i in 1..n {
        let node = link(&counter, i);
        tail.next.set(Some(&node)).unwrap();
        tail = node;
    }
    drop(tail);
    let visited = background::batch(|| {
        let mut visited = vec![head.label];
        let mut cursor = head.next.get().unwrap();
        while let Some(node) = cursor {
            visited.push(node.label);
            cursor = node.next.get().unwrap();
        }
        visited
    });
    assert_eq!(visited, (0..n).collect::<Vec<usize>>());
    assert_eq!(counter.live(), n);
    assert_eq!(Cyptr::external_count(&head), 1);
    drop(head);
    assert_memory_freed(&counter);
}

#[test]
fn panicking_batch_still_sweeps() {
    let _serial = serial();
    let counter = Counter::default();
    let result = panic::catch_unwind(panic::AssertUnwindSafe(|| {
        background::batch(|| {
            drop(ring(&counter, 3));
            panic!("walk failed");
        })
    }));
    assert!(result.is_err());
    assert_memory_freed(&counter);
    drop(ring(&counter, 3));
    assert_memory_freed(&counter);
}

#[test]
fn batch_defers_to_the_queue_when_enabled() {
    let _serial = serial();
    let counter = Counter::default();
    let _guard = BackgroundGuard::enable();
    background::batch(|| drop(ring(&counter, 2)));
    assert_eq!(background::pending(), 1);
    assert_eq!(background::process(false, 0), 1);
    assert_memory_freed(&counter);
}
