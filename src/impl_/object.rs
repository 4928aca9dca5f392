use std::any::Any;
use std::mem;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::{fence, Ordering};
use std::sync::Arc;

use log::{error, trace};
use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::impl_::background;
use crate::impl_::drop_queue;
use crate::impl_::edge::EdgeSlot;
use crate::impl_::generation::{Generation, GenerationLock};

pub type ObjectId = u64;

static NEXT_OBJECT_ID: AtomicU64 = AtomicU64::new(0);

/// A value taking part in the object graph, with its type erased.
pub trait GraphValue: Send + Sync + 'static {
    fn core(&self) -> &Arc<ObjectCore>;

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

/// Strong reference to a graph value, as stored in edges.
pub type Target = Arc<dyn GraphValue>;

/// The allocation behind a `Cyptr`: graph bookkeeping next to the value.
pub struct Shared<T> {
    pub core: Arc<ObjectCore>,
    pub value: T,
}

impl<T: Send + Sync + 'static> GraphValue for Shared<T> {
    fn core(&self) -> &Arc<ObjectCore> {
        &self.core
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

impl<T> Drop for Shared<T> {
    fn drop(&mut self) {
        self.core.detach();
    }
}

/// Per-object collector state.
pub struct ObjectCore {
    id: ObjectId,
    generation: Mutex<Arc<Generation>>,
    external: AtomicUsize,
    edges: Mutex<Vec<Arc<EdgeSlot>>>,
    detached: AtomicBool,
}

impl ObjectCore {
    /// A new object owned by one external handle, not yet registered.
    pub fn new(generation: Arc<Generation>) -> Arc<ObjectCore> {
        Arc::new(ObjectCore {
            id: NEXT_OBJECT_ID.fetch_add(1, Ordering::Relaxed),
            generation: Mutex::new(generation),
            external: AtomicUsize::new(1),
            edges: Mutex::new(Vec::new()),
            detached: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    /// Snapshot of the current generation. Only stable while that
    /// generation is locked.
    pub fn generation(&self) -> Arc<Generation> {
        self.generation.lock().clone()
    }

    // Caller holds the lock of the generation being replaced.
    pub(crate) fn set_generation(&self, generation: Arc<Generation>) {
        *self.generation.lock() = generation;
    }

    pub fn is_detached(&self) -> bool {
        self.detached.load(Ordering::Acquire)
    }

    /// Lock this object's generation: lock the generation last seen, then
    /// check the object still belongs to it, retrying when a concurrent
    /// merge moved it in between.
    pub fn lock(&self) -> Result<GenerationLock> {
        let mut generation = self.generation();
        loop {
            let lock = generation.lock()?;
            let current = self.generation();
            if Arc::ptr_eq(&current, &generation) {
                if self.is_detached() {
                    return Err(Error::Detached);
                }
                return Ok(lock);
            }
            drop(lock);
            generation = current;
        }
    }

    /// Single attempt of [`ObjectCore::lock`].
    pub fn try_lock(&self) -> Result<Option<GenerationLock>> {
        let generation = self.generation();
        let lock = match generation.try_lock() {
            Some(lock) => lock,
            None => return Ok(None),
        };
        if !Arc::ptr_eq(&self.generation(), &generation) {
            return Ok(None);
        }
        if self.is_detached() {
            return Err(Error::Detached);
        }
        Ok(Some(lock))
    }

    pub fn external_count(&self) -> usize {
        self.external.load(Ordering::Acquire)
    }

    pub fn acquire_external(&self) {
        self.external.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns true when the last external handle went away.
    pub fn release_external(&self) -> bool {
        if self.external.fetch_sub(1, Ordering::Release) == 1 {
            fence(Ordering::Acquire);
            true
        } else {
            false
        }
    }

    // An empty slot does not change reachability, so the object lock is
    // enough here.
    pub fn attach_edge(&self, slot: Arc<EdgeSlot>) {
        self.edges.lock().push(slot);
    }

    // Caller holds the generation lock.
    pub fn detach_edge(&self, slot: &Arc<EdgeSlot>) {
        self.edges.lock().retain(|s| !Arc::ptr_eq(s, slot));
    }

    // Caller holds the generation lock.
    pub fn for_each_target<F: FnMut(&Arc<ObjectCore>)>(&self, mut f: F) {
        let edges = self.edges.lock();
        for slot in edges.iter() {
            let edge = slot.lock_for_collector();
            if let Some(target) = edge.target() {
                f(target.core());
            }
        }
    }

    // Caller holds the generation lock.
    pub fn release_edges(&self, garbage: &mut Vec<Target>) {
        let edges = self.edges.lock();
        for slot in edges.iter() {
            if let Some(target) = slot.lock_for_collector().take() {
                garbage.push(target);
            }
        }
    }

    /// Remove the object from the graph: unregister it from its generation
    /// and release every outgoing edge.
    pub fn detach(&self) {
        let (garbage, generation) = {
            let mut lock = match self.lock() {
                Ok(lock) => lock,
                Err(Error::Detached) => return,
                Err(err) => {
                    error!("cannot detach object {}: {}", self.id, err);
                    return;
                }
            };
            lock.unregister(self);
            self.detached.store(true, Ordering::Release);
            let slots = mem::take(&mut *self.edges.lock());
            let mut garbage = Vec::new();
            for slot in &slots {
                if let Some(target) = slot.lock_for_collector().take() {
                    garbage.push(target);
                }
            }
            trace!(
                "detached object {} from {:?}, released {} edges",
                self.id,
                lock.generation(),
                garbage.len()
            );
            (garbage, lock.generation().clone())
        };
        release(garbage, &generation);
    }
}

/// Drop references taken out of edges. A target that outlives this release
/// without an external handle may now be an unreachable cycle, so its
/// generation is swept.
pub fn release(targets: Vec<Target>, generation: &Arc<Generation>) {
    if targets.is_empty() {
        return;
    }
    let needs_sweep = targets
        .iter()
        .any(|t| Arc::strong_count(t) > 1 && t.core().external_count() == 0);
    drop_queue::release(targets);
    if needs_sweep {
        background::request_sweep(generation);
    }
}
