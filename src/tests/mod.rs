mod background_test;
mod cyptr_test;
mod timestamp_test;

use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use crate::{Cyptr, Edge};

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

static SERIAL: Mutex<()> = parking_lot::const_mutex(());

// Background processing is process-wide: tests that rely on when sweeps run
// must not overlap with tests that enable it.
pub fn serial() -> MutexGuard<'static, ()> {
    init();
    SERIAL.lock()
}

/// Counts live values carrying one of its tokens.
#[derive(Clone, Default)]
pub struct Counter {
    live: Arc<AtomicUsize>,
}

pub struct Token {
    live: Arc<AtomicUsize>,
}

impl Counter {
    pub fn token(&self) -> Token {
        self.live.fetch_add(1, Ordering::SeqCst);
        Token {
            live: self.live.clone(),
        }
    }

    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }
}

impl Drop for Token {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct Link {
    pub label: usize,
    pub next: Edge<Link>,
    _token: Token,
}

pub fn link(counter: &Counter, label: usize) -> Cyptr<Link> {
    Cyptr::new_cyclic(|node| Link {
        label,
        next: Edge::new(node),
        _token: counter.token(),
    })
}

/// `n` links, each pointing at the next, the last one at the first.
pub fn ring(counter: &Counter, n: usize) -> Vec<Cyptr<Link>> {
    let links: Vec<Cyptr<Link>> = (0..n).map(|i| link(counter, i)).collect();
    for i in 0..n {
        links[i].next.set(Some(&links[(i + 1) % n])).unwrap();
    }
    links
}

pub fn assert_memory_freed(counter: &Counter) {
    let live = counter.live();
    println!();
    println!("live {}", live);
    assert_eq!(live, 0);
}
