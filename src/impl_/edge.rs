use std::cell::UnsafeCell;
use std::fmt;
use std::hint;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Weak;

use log::trace;

use crate::error::{Error, Result};
use crate::impl_::drop_queue;
use crate::impl_::generation::fix_relation;
use crate::impl_::object::{release, ObjectCore, Target};
use crate::timestamp;

const UNLOCKED: u64 = 0;

/// One retargetable pointer slot owned by a graph object.
///
/// The target is guarded by `owner`, a spin lock word holding the id of the
/// locking thread (zero when free). Retargeting additionally requires the
/// source's generation lock, so sweeps never see a half-updated graph.
pub struct EdgeSlot {
    source: Weak<ObjectCore>,
    owner: AtomicU64,
    target: UnsafeCell<Option<Target>>,
}

// `target` is only reached through an `EdgeLock`.
unsafe impl Send for EdgeSlot {}
unsafe impl Sync for EdgeSlot {}

pub struct EdgeLock<'a> {
    slot: &'a EdgeSlot,
}

impl<'a> EdgeLock<'a> {
    pub fn target(&self) -> Option<&Target> {
        unsafe { (*self.slot.target.get()).as_ref() }
    }

    pub fn replace(&mut self, target: Option<Target>) -> Option<Target> {
        unsafe { std::mem::replace(&mut *self.slot.target.get(), target) }
    }

    pub fn take(&mut self) -> Option<Target> {
        self.replace(None)
    }
}

impl<'a> Drop for EdgeLock<'a> {
    fn drop(&mut self) {
        self.slot.owner.store(UNLOCKED, Ordering::Release);
    }
}

impl EdgeSlot {
    /// A new, empty slot registered with `source`.
    pub fn new(source: &Arc<ObjectCore>) -> Arc<EdgeSlot> {
        let slot = Arc::new(EdgeSlot {
            source: Arc::downgrade(source),
            owner: AtomicU64::new(UNLOCKED),
            target: UnsafeCell::new(None),
        });
        source.attach_edge(slot.clone());
        slot
    }

    pub fn source(&self) -> Result<Arc<ObjectCore>> {
        match self.source.upgrade() {
            Some(source) if !source.is_detached() => Ok(source),
            _ => Err(Error::Detached),
        }
    }

    pub fn lock(&self) -> Result<EdgeLock<'_>> {
        let me = timestamp::thread_id();
        loop {
            match self
                .owner
                .compare_exchange_weak(UNLOCKED, me, Ordering::Acquire, Ordering::Relaxed)
            {
                Ok(_) => return Ok(EdgeLock { slot: self }),
                Err(holder) if holder == me => return Err(Error::WouldDeadlock),
                Err(_) => hint::spin_loop(),
            }
        }
    }

    pub fn try_lock(&self) -> Option<EdgeLock<'_>> {
        let me = timestamp::thread_id();
        self.owner
            .compare_exchange(UNLOCKED, me, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| EdgeLock { slot: self })
    }

    // The collector never re-enters an edge it holds.
    pub(crate) fn lock_for_collector(&self) -> EdgeLock<'_> {
        match self.lock() {
            Ok(lock) => lock,
            Err(err) => panic!("object graph corrupt: edge lock re-entered: {}", err),
        }
    }

    /// Racy snapshot: whether the slot is empty right now.
    pub fn is_null(&self) -> bool {
        self.lock_for_collector().target().is_none()
    }

    /// Point the slot at `target`, or clear it. Setting a target merges the
    /// source and target generations first. Dropping the previous target may
    /// orphan a cycle, in which case the generation is swept.
    pub fn reset(&self, target: Option<Target>) -> Result<()> {
        let source = self.source()?;
        let new_id = target.as_ref().map(|t| t.core().id());
        let (old, generation) = {
            let lock = match &target {
                Some(t) => fix_relation(&source, t.core())?,
                None => source.lock()?,
            };
            let mut edge = self.lock()?;
            let old = edge.replace(target);
            (old, lock.generation().clone())
        };
        match old {
            Some(old) if Some(old.core().id()) == new_id => {
                trace!("edge of object {} reset to the same target", source.id());
                drop_queue::release(vec![old]);
            }
            Some(old) => release(vec![old], &generation),
            None => {}
        }
        Ok(())
    }

    /// Clone the target and count it as an external handle, under the
    /// source's generation lock so no sweep can free it in between.
    pub fn get(&self) -> Result<Option<Target>> {
        let source = self.source()?;
        let _lock = source.lock()?;
        let edge = self.lock()?;
        Ok(edge.target().map(|target| {
            target.core().acquire_external();
            target.clone()
        }))
    }

    /// Detach the slot from its source and drop its target. Used when the
    /// owning `Edge` goes away while the source is still alive.
    pub fn unlink(self: &Arc<Self>) {
        let source = match self.source() {
            Ok(source) => source,
            Err(_) => return,
        };
        let (old, generation) = {
            let lock = match source.lock() {
                Ok(lock) => lock,
                Err(_) => return,
            };
            source.detach_edge(self);
            let old = self.lock_for_collector().take();
            (old, lock.generation().clone())
        };
        if let Some(old) = old {
            release(vec![old], &generation);
        }
    }
}

impl fmt::Debug for EdgeSlot {
    // Never blocks: a snapshot is only taken when the source's generation
    // and the slot are both free right now.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let source = match self.source() {
            Ok(source) => source,
            Err(_) => return write!(f, "(Edge <detached>)"),
        };
        let _lock = match source.try_lock() {
            Ok(Some(lock)) => lock,
            Ok(None) => return write!(f, "(Edge {} -> <locked>)", source.id()),
            Err(_) => return write!(f, "(Edge <detached>)"),
        };
        match self.try_lock() {
            Some(edge) => {
                let target = edge.target().map(|t| t.core().id());
                write!(f, "(Edge {} -> {:?})", source.id(), target)
            }
            None => write!(f, "(Edge {} -> <locked>)", source.id()),
        }
    }
}
