use std::cell::RefCell;
use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use log::{debug, error, trace};
use parking_lot::{Condvar, Mutex, RwLock};

use crate::impl_::generation::{self, Generation};

static INSTANCE: RwLock<Option<Arc<Background>>> = parking_lot::const_rwlock(None);

thread_local! {
    static BATCH: RefCell<Batch> = RefCell::new(Batch::default());
}

// Sweeps requested on this thread while inside `batch`, one per generation.
#[derive(Default)]
struct Batch {
    depth: usize,
    deferred: HashMap<usize, Arc<Generation>>,
}

/// Queue of generations waiting to be swept.
pub struct Background {
    queue: Mutex<Queue>,
    changed: Condvar,
    processed: AtomicUsize,
}

struct Queue {
    pending: VecDeque<Arc<Generation>>,
    active: usize,
    closed: bool,
}

impl Default for Background {
    fn default() -> Background {
        Background::new()
    }
}

impl Background {
    pub fn new() -> Background {
        Background {
            queue: Mutex::new(Queue {
                pending: VecDeque::new(),
                active: 0,
                closed: false,
            }),
            changed: Condvar::new(),
            processed: AtomicUsize::new(0),
        }
    }

    /// Queue `generation` for sweeping. Returns false once the queue is
    /// closed; the caller then sweeps inline.
    pub fn enqueue(&self, generation: &Arc<Generation>) -> bool {
        let mut queue = self.queue.lock();
        if queue.closed {
            return false;
        }
        if generation.set_queued() {
            trace!("{:?} already queued", generation);
            return true;
        }
        queue.pending.push_back(generation.clone());
        drop(queue);
        self.changed.notify_one();
        true
    }

    /// Sweep one queued generation. With `wait`, blocks until work arrives or
    /// the queue is closed.
    pub fn process_one(&self, wait: bool) -> bool {
        let generation = {
            let mut queue = self.queue.lock();
            loop {
                if let Some(generation) = queue.pending.pop_front() {
                    generation.clear_queued();
                    queue.active += 1;
                    break generation;
                }
                if !wait || queue.closed {
                    return false;
                }
                self.changed.wait(&mut queue);
            }
        };
        match generation::sweep(&generation) {
            Ok(report) => trace!("background sweep of {:?}: {:?}", generation, report),
            Err(err) => error!("background sweep of {:?} failed: {}", generation, err),
        }
        self.processed.fetch_add(1, Ordering::AcqRel);
        {
            let mut queue = self.queue.lock();
            queue.active -= 1;
        }
        self.changed.notify_all();
        true
    }

    /// Run up to `count` sweeps (`0` means no limit). Returns how many ran.
    pub fn process(&self, wait: bool, count: usize) -> usize {
        let mut done = 0;
        while count == 0 || done < count {
            if !self.process_one(wait) {
                break;
            }
            done += 1;
        }
        done
    }

    pub fn pending(&self) -> usize {
        self.queue.lock().pending.len()
    }

    pub fn processed(&self) -> usize {
        self.processed.load(Ordering::Acquire)
    }

    /// Stop accepting work, drain what is queued and wait for sweeps running
    /// on other threads.
    pub fn close(&self) {
        {
            let mut queue = self.queue.lock();
            queue.closed = true;
        }
        self.changed.notify_all();
        self.process(false, 0);
        let mut queue = self.queue.lock();
        while queue.active > 0 || !queue.pending.is_empty() {
            self.changed.wait(&mut queue);
        }
    }
}

pub fn instance() -> Option<Arc<Background>> {
    INSTANCE.read().clone()
}

/// The installed queue, installing a new one first if needed. The flag tells
/// whether this call installed it.
pub fn install() -> (Arc<Background>, bool) {
    let mut slot = INSTANCE.write();
    if let Some(background) = slot.as_ref() {
        return (background.clone(), false);
    }
    let background = Arc::new(Background::new());
    *slot = Some(background.clone());
    debug!("background processing enabled");
    (background, true)
}

pub fn enable() -> bool {
    install().1
}

/// Close and drain the installed queue, then uninstall it. Returns the number
/// of sweeps it ran over its lifetime.
pub fn disable() -> usize {
    let background = match instance() {
        Some(background) => background,
        None => return 0,
    };
    background.close();
    {
        let mut slot = INSTANCE.write();
        if slot.as_ref().map_or(false, |b| Arc::ptr_eq(b, &background)) {
            *slot = None;
        }
    }
    let processed = background.processed();
    debug!("background processing disabled after {} sweeps", processed);
    processed
}

pub fn batch<R, K: FnOnce() -> R>(k: K) -> R {
    enter_batch();
    let _leave = LeaveBatch;
    k()
}

fn enter_batch() {
    let _ = BATCH.try_with(|batch| batch.borrow_mut().depth += 1);
}

fn leave_batch() {
    let deferred = BATCH.try_with(|batch| {
        let mut batch = batch.borrow_mut();
        batch.depth -= 1;
        if batch.depth == 0 {
            batch.deferred.drain().map(|(_, g)| g).collect::<Vec<_>>()
        } else {
            Vec::new()
        }
    });
    let deferred: Vec<Arc<Generation>> = deferred.unwrap_or_default();
    if !deferred.is_empty() {
        trace!("end of batch: {} deferred sweeps", deferred.len());
    }
    for generation in deferred {
        request_sweep(&generation);
    }
}

// Leaves the batch on unwind too, so a panic never strands deferred sweeps.
struct LeaveBatch;

impl Drop for LeaveBatch {
    fn drop(&mut self) {
        leave_batch();
    }
}

// Returns false when no batch is open on this thread.
fn defer(generation: &Arc<Generation>) -> bool {
    BATCH
        .try_with(|batch| {
            let mut batch = batch.borrow_mut();
            if batch.depth == 0 {
                return false;
            }
            let key = Arc::as_ptr(generation) as usize;
            batch.deferred.entry(key).or_insert_with(|| generation.clone());
            true
        })
        .unwrap_or(false)
}

/// Sweep `generation` in the background if enabled, at the end of the
/// current batch if one is open, inline otherwise.
pub fn request_sweep(generation: &Arc<Generation>) {
    if let Some(background) = instance() {
        if background.enqueue(generation) {
            return;
        }
    }
    if defer(generation) {
        return;
    }
    match generation::sweep(generation) {
        Ok(report) => trace!("inline sweep of {:?}: {:?}", generation, report),
        Err(err) => error!("inline sweep of {:?} failed: {}", generation, err),
    }
}
