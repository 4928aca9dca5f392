use std::collections::HashSet;
use std::panic;

use crate::tests::{assert_memory_freed, link, ring, serial, Counter, Link, Token};
use crate::{collect, Cyptr, Edge};

struct Chain {
    next: Option<Cyptr<Chain>>,
    _token: Token,
}

#[test]
fn deref_and_clone() {
    let _serial = serial();
    let a = Cyptr::new(41);
    assert_eq!(*a, 41);
    assert_eq!(Cyptr::external_count(&a), 1);
    let b = a.clone();
    assert!(Cyptr::ptr_eq(&a, &b));
    assert_eq!(Cyptr::external_count(&a), 2);
    drop(b);
    assert_eq!(Cyptr::external_count(&a), 1);
    assert!(!Cyptr::ptr_eq(&a, &Cyptr::new(41)));
}

#[test]
fn try_new() {
    let _serial = serial();
    let a = Cyptr::try_new("value".to_string()).unwrap();
    assert_eq!(a.as_str(), "value");
}

#[test]
fn acyclic_chain_is_freed_by_reference_counting() {
    let _serial = serial();
    let counter = Counter::default();
    let n = 1_000;
    let mut head: Option<Cyptr<Chain>> = None;
    for _ in 0..n {
        head = Some(Cyptr::new(Chain {
            next: head.take(),
            _token: counter.token(),
        }));
    }
    assert_eq!(counter.live(), n);
    let head = head.unwrap();
    // Handles inside values never merge generations.
    let mut generations = HashSet::new();
    let mut cur = Some(head.clone());
    while let Some(node) = cur {
        generations.insert(Cyptr::generation_id(&node));
        cur = node.next.clone();
    }
    assert_eq!(generations.len(), n);
    drop(head);
    assert_memory_freed(&counter);
}

#[test]
fn cycle_is_reclaimed() {
    let _serial = serial();
    let counter = Counter::default();
    for n in [1, 2, 3, 10, 100] {
        let links = ring(&counter, n);
        assert_eq!(counter.live(), n);
        drop(links);
        assert_memory_freed(&counter);
    }
}

#[test]
fn cycle_held_from_outside_survives() {
    let _serial = serial();
    let counter = Counter::default();
    let mut links = ring(&counter, 5);
    let kept = links.remove(2);
    drop(links);
    assert_eq!(counter.live(), 5);
    let report = collect(&kept).unwrap();
    assert_eq!(report.members, 5);
    assert_eq!(report.reachable, 5);
    assert_eq!(report.collected, 0);
    let mut cursor = kept.next.get().unwrap().unwrap();
    for _ in 0..5 {
        cursor = cursor.next.get().unwrap().unwrap();
    }
    assert_eq!(cursor.label, 3);
    drop(cursor);
    drop(kept);
    assert_memory_freed(&counter);
}

#[test]
fn merge_keeps_the_older_generation() {
    let _serial = serial();
    let counter = Counter::default();
    let a = link(&counter, 0);
    let b = link(&counter, 1);
    let ga = Cyptr::generation_id(&a);
    let gb = Cyptr::generation_id(&b);
    assert_ne!(ga, gb);
    b.next.set(Some(&a)).unwrap();
    assert_eq!(Cyptr::generation_id(&a), Cyptr::generation_id(&b));
    assert_eq!(Cyptr::generation_id(&a), ga.min(gb));
}

#[test]
fn panicking_constructor_leaves_nothing_behind() {
    let _serial = serial();
    let counter = Counter::default();
    let target = link(&counter, 0);
    let fail = true;
    let result = panic::catch_unwind(panic::AssertUnwindSafe(|| {
        Cyptr::<Link>::new_cyclic(|node| {
            let next = Edge::with_target(node, &target).unwrap();
            let _token = counter.token();
            if fail {
                panic!("constructor failed");
            }
            Link {
                label: 1,
                next,
                _token,
            }
        })
    }));
    assert!(result.is_err());
    assert_eq!(Cyptr::external_count(&target), 1);
    assert_eq!(counter.live(), 1);
    let report = collect(&target).unwrap();
    assert_eq!(report.members, 1);
    drop(target);
    assert_memory_freed(&counter);
}

#[test]
fn debug_output() {
    let _serial = serial();
    let a = Cyptr::new(7u8);
    let text = format!("{:?}", a);
    assert!(text.starts_with("Cyptr"));
    assert!(text.contains("value: 7"));
}
