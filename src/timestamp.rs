//! Logical timestamps used to order generations.
//!
//! A [`Timestamp`] combines a monotonic clock reading with a per-thread tick
//! and a process-unique thread id. Two calls to [`now`] never produce equal
//! values, even when they run on different threads at the same instant.

use std::cell::Cell;
use std::cmp::Ordering;
use std::fmt;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering as AtomicOrdering;
use std::time::Instant;

// Zero is reserved: edge lock words use it to mean "unlocked".
static NEXT_THREAD_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static THREAD_ID: u64 = NEXT_THREAD_ID.fetch_add(1, AtomicOrdering::Relaxed);
    static LAST: Cell<Option<(Instant, u64)>> = const { Cell::new(None) };
}

/// A globally unique, totally ordered point in time.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Timestamp {
    time_point: Instant,
    tick: u64,
    thread_id: u64,
}

impl Timestamp {
    pub fn time_point(&self) -> Instant {
        self.time_point
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn thread_id(&self) -> u64 {
        self.thread_id
    }
}

impl Ord for Timestamp {
    fn cmp(&self, other: &Self) -> Ordering {
        self.time_point
            .cmp(&other.time_point)
            .then(self.tick.cmp(&other.tick))
            .then(self.thread_id.cmp(&other.thread_id))
    }
}

impl PartialOrd for Timestamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Timestamp({:?}+{} @{})",
            self.time_point, self.tick, self.thread_id
        )
    }
}

/// Id of the calling thread. Ids start at 1 and are never reused, even when
/// the operating system recycles its own thread ids.
pub fn thread_id() -> u64 {
    THREAD_ID
        .try_with(|id| *id)
        .unwrap_or_else(|_| NEXT_THREAD_ID.fetch_add(1, AtomicOrdering::Relaxed))
}

/// Produce a timestamp strictly greater than every earlier timestamp made on
/// this thread.
pub fn now() -> Timestamp {
    let thread_id = thread_id();
    let time_point = Instant::now();
    let (time_point, tick) = LAST
        .try_with(|last| {
            let next = match last.get() {
                Some((prev, tick)) if time_point <= prev => (prev, tick + 1),
                _ => (time_point, 0),
            };
            last.set(Some(next));
            next
        })
        // Thread teardown: the fresh thread id alone keeps the value unique.
        .unwrap_or((time_point, 0));
    Timestamp {
        time_point,
        tick,
        thread_id,
    }
}
