use std::collections::HashSet;
use std::thread;

use crate::timestamp::{self, Timestamp};

#[test]
fn now_increases_on_one_thread() {
    let mut prev = timestamp::now();
    for _ in 0..10_000 {
        let next = timestamp::now();
        assert!(prev < next, "{:?} !< {:?}", prev, next);
        prev = next;
    }
}

#[test]
fn now_is_unique_across_threads() {
    let handles: Vec<_> = (0..4)
        .map(|_| thread::spawn(|| (0..2_000).map(|_| timestamp::now()).collect::<Vec<Timestamp>>()))
        .collect();
    let mut all: Vec<Timestamp> = handles
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect();
    let count = all.len();
    all.sort();
    all.dedup();
    assert_eq!(all.len(), count);
    let threads: HashSet<u64> = all.iter().map(|t| t.thread_id()).collect();
    assert_eq!(threads.len(), 4);
}

#[test]
fn order_is_total() {
    let a = timestamp::now();
    let b = timestamp::now();
    assert_ne!(a, b);
    assert_eq!(a, a);
    assert_eq!(a.cmp(&b), b.cmp(&a).reverse());
    assert!(a < b || b < a);
}

#[test]
fn thread_ids_are_never_reused() {
    let mut ids: Vec<u64> = (0..8)
        .map(|_| thread::spawn(timestamp::thread_id).join().unwrap())
        .collect();
    ids.push(timestamp::thread_id());
    let distinct: HashSet<u64> = ids.iter().copied().collect();
    assert_eq!(distinct.len(), ids.len());
    assert!(!distinct.contains(&0));
}
