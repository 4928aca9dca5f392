use std::cell::RefCell;
use std::cell::UnsafeCell;
use std::collections::HashMap;
use std::collections::HashSet;
use std::fmt;
use std::marker::PhantomData;
use std::mem;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use log::{debug, trace};
use parking_lot::lock_api::RawMutex as _;
use parking_lot::RawMutex;

use crate::error::{Error, Result};
use crate::impl_::drop_queue;
use crate::impl_::object::{ObjectCore, ObjectId, Target};
use crate::timestamp::{self, Timestamp};

thread_local! {
    // Generations locked by the current thread, by address.
    static HELD: RefCell<Vec<usize>> = const { RefCell::new(Vec::new()) };
}

fn is_held(generation: &Arc<Generation>) -> bool {
    let addr = Arc::as_ptr(generation) as usize;
    HELD.try_with(|held| held.borrow().contains(&addr))
        .unwrap_or(false)
}

fn mark_held(generation: &Arc<Generation>) {
    let addr = Arc::as_ptr(generation) as usize;
    let _ = HELD.try_with(|held| held.borrow_mut().push(addr));
}

fn unmark_held(generation: &Arc<Generation>) {
    let addr = Arc::as_ptr(generation) as usize;
    let _ = HELD.try_with(|held| {
        let mut held = held.borrow_mut();
        if let Some(pos) = held.iter().rposition(|x| *x == addr) {
            held.swap_remove(pos);
        }
    });
}

/// A set of objects that are collected, and locked, together.
pub struct Generation {
    id: Timestamp,
    raw: RawMutex,
    queued: AtomicBool,
    state: UnsafeCell<GenerationState>,
}

struct GenerationState {
    members: HashMap<ObjectId, Arc<ObjectCore>>,
    // Set once this generation has been spliced into an older one.
    successor: Option<Arc<Generation>>,
}

// `state` is only reached through a `GenerationLock`, which holds `raw`.
unsafe impl Send for Generation {}
unsafe impl Sync for Generation {}

impl Generation {
    pub fn new() -> Arc<Generation> {
        let generation = Arc::new(Generation {
            id: timestamp::now(),
            raw: RawMutex::INIT,
            queued: AtomicBool::new(false),
            state: UnsafeCell::new(GenerationState {
                members: HashMap::new(),
                successor: None,
            }),
        });
        trace!("new generation {:?}", generation.id);
        generation
    }

    pub fn id(&self) -> Timestamp {
        self.id
    }

    pub fn lock(self: &Arc<Self>) -> Result<GenerationLock> {
        if is_held(self) {
            return Err(Error::WouldDeadlock);
        }
        self.raw.lock();
        Ok(GenerationLock::new(self.clone()))
    }

    pub fn try_lock(self: &Arc<Self>) -> Option<GenerationLock> {
        if self.raw.try_lock() {
            Some(GenerationLock::new(self.clone()))
        } else {
            None
        }
    }

    /// Flag this generation as sitting in the background queue. Returns the
    /// previous value.
    pub fn set_queued(&self) -> bool {
        self.queued.swap(true, Ordering::AcqRel)
    }

    pub fn clear_queued(&self) {
        self.queued.store(false, Ordering::Release);
    }
}

impl fmt::Debug for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Generation({:?})", self.id)
    }
}

/// Exclusive access to a generation's state. Unlocks on drop.
pub struct GenerationLock {
    generation: Arc<Generation>,
    // Unlocking must happen on the locking thread.
    _not_send: PhantomData<*const ()>,
}

impl GenerationLock {
    fn new(generation: Arc<Generation>) -> GenerationLock {
        mark_held(&generation);
        GenerationLock {
            generation,
            _not_send: PhantomData,
        }
    }

    fn state(&self) -> &GenerationState {
        unsafe { &*self.generation.state.get() }
    }

    fn state_mut(&mut self) -> &mut GenerationState {
        unsafe { &mut *self.generation.state.get() }
    }

    pub fn generation(&self) -> &Arc<Generation> {
        &self.generation
    }

    pub fn id(&self) -> Timestamp {
        self.generation.id
    }

    pub fn len(&self) -> usize {
        self.state().members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state().members.is_empty()
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.state().members.contains_key(&id)
    }

    pub fn successor(&self) -> Option<Arc<Generation>> {
        self.state().successor.clone()
    }

    pub fn register(&mut self, obj: &Arc<ObjectCore>) {
        debug_assert!(!self.contains(obj.id()), "object {} registered twice", obj.id());
        self.state_mut().members.insert(obj.id(), obj.clone());
    }

    pub fn try_register(&mut self, obj: &Arc<ObjectCore>) -> Result<()> {
        debug_assert!(!self.contains(obj.id()), "object {} registered twice", obj.id());
        let members = &mut self.state_mut().members;
        members.try_reserve(1)?;
        members.insert(obj.id(), obj.clone());
        Ok(())
    }

    pub fn unregister(&mut self, obj: &ObjectCore) {
        if self.state_mut().members.remove(&obj.id()).is_none() {
            panic!(
                "object graph corrupt: object {} is not a member of {:?}",
                obj.id(),
                self.generation
            );
        }
    }

    /// Move every member of `other` into this generation. `other` must be
    /// the newer of the two so the merged generation keeps the older id.
    fn absorb(&mut self, mut other: GenerationLock) {
        debug_assert!(self.id() < other.id());
        let successor = self.generation.clone();
        let other_state = other.state_mut();
        let members = mem::take(&mut other_state.members);
        other_state.successor = Some(successor);
        let count = members.len();
        let merged = self.generation.clone();
        let target = &mut self.state_mut().members;
        target.reserve(count);
        for (id, obj) in members {
            obj.set_generation(merged.clone());
            target.insert(id, obj);
        }
        debug!(
            "merged {:?} ({} members) into {:?} ({} members)",
            other.generation,
            count,
            self.generation,
            self.len()
        );
    }

    /// Wavefront mark-sweep over the members of this generation.
    ///
    /// Members with a nonzero external count seed the wavefront; reachability
    /// is propagated along outgoing edges. Every member left unreached has
    /// its outgoing edges reset. The released targets are returned so the
    /// caller can drop them once the lock is gone.
    pub fn marksweep(&mut self) -> (SweepReport, Vec<Target>) {
        trace!("start: marksweep {:?}", self.generation);
        let members = &self.state().members;
        let mut reachable: HashSet<ObjectId> = HashSet::with_capacity(members.len());
        let mut wavefront: Vec<&Arc<ObjectCore>> = Vec::new();
        for obj in members.values() {
            if obj.external_count() > 0 {
                reachable.insert(obj.id());
                wavefront.push(obj);
            }
        }
        while let Some(obj) = wavefront.pop() {
            obj.for_each_target(|target: &Arc<ObjectCore>| {
                let id = target.id();
                match members.get(&id) {
                    Some(member) => {
                        if reachable.insert(id) {
                            wavefront.push(member);
                        }
                    }
                    None => panic!(
                        "object graph corrupt: edge {} -> {} leaves {:?}",
                        obj.id(),
                        id,
                        self.generation
                    ),
                }
            });
        }
        let mut garbage = Vec::new();
        let mut collected = 0;
        for obj in members.values() {
            if !reachable.contains(&obj.id()) {
                trace!("marksweep: object {} is unreachable", obj.id());
                obj.release_edges(&mut garbage);
                collected += 1;
            }
        }
        let report = SweepReport {
            members: members.len(),
            reachable: reachable.len(),
            collected,
        };
        trace!("end: marksweep {:?} {:?}", self.generation, report);
        (report, garbage)
    }
}

impl Drop for GenerationLock {
    fn drop(&mut self) {
        unmark_held(&self.generation);
        unsafe { self.generation.raw.unlock() };
    }
}

/// Outcome of one mark-sweep.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Members of the generation when the sweep ran.
    pub members: usize,
    /// Members reached from an external handle.
    pub reachable: usize,
    /// Unreached members whose edges were released.
    pub collected: usize,
}

/// Lock the common generation of `a` and `b`, merging their generations if
/// they differ. The older generation is always locked first.
pub fn fix_relation(a: &ObjectCore, b: &ObjectCore) -> Result<GenerationLock> {
    loop {
        if a.is_detached() || b.is_detached() {
            return Err(Error::Detached);
        }
        let ga = a.generation();
        let gb = b.generation();
        if Arc::ptr_eq(&ga, &gb) {
            let lock = ga.lock()?;
            if Arc::ptr_eq(&a.generation(), &ga) && Arc::ptr_eq(&b.generation(), &ga) {
                if a.is_detached() || b.is_detached() {
                    return Err(Error::Detached);
                }
                return Ok(lock);
            }
            continue;
        }
        let (low, high) = if ga.id() < gb.id() { (ga, gb) } else { (gb, ga) };
        let mut low_lock = low.lock()?;
        let high_lock = high.lock()?;
        if a.is_detached() || b.is_detached() {
            return Err(Error::Detached);
        }
        let a_gen = a.generation();
        let b_gen = b.generation();
        let in_low = |g: &Arc<Generation>| Arc::ptr_eq(g, &low);
        let in_high = |g: &Arc<Generation>| Arc::ptr_eq(g, &high);
        if in_low(&a_gen) && in_low(&b_gen) {
            return Ok(low_lock);
        }
        if in_high(&a_gen) && in_high(&b_gen) {
            drop(low_lock);
            return Ok(high_lock);
        }
        if (in_low(&a_gen) || in_high(&a_gen)) && (in_low(&b_gen) || in_high(&b_gen)) {
            low_lock.absorb(high_lock);
            return Ok(low_lock);
        }
        // Another merge moved one of them elsewhere; start over.
    }
}

/// Lock `generation`, following merges, and mark-sweep it.
pub fn sweep(generation: &Arc<Generation>) -> Result<SweepReport> {
    let mut generation = generation.clone();
    loop {
        let mut lock = generation.lock()?;
        if let Some(successor) = lock.successor() {
            drop(lock);
            generation = successor;
            continue;
        }
        if lock.is_empty() {
            trace!("nothing to sweep in {:?}", generation);
            return Ok(SweepReport::default());
        }
        let (report, garbage) = lock.marksweep();
        drop(lock);
        drop_queue::release(garbage);
        return Ok(report);
    }
}
