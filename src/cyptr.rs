use std::fmt;
use std::mem::ManuallyDrop;
use std::ops::Deref;
use std::sync::Arc;

use log::trace;

use crate::error::Result;
use crate::impl_::background;
use crate::impl_::drop_queue;
use crate::impl_::generation::{self, Generation, GenerationLock, SweepReport};
use crate::impl_::object::{ObjectCore, Shared, Target};
use crate::node::Node;
use crate::timestamp::Timestamp;

/// A reference-counted handle to a collectible value.
///
/// `Cyptr` is the way to hold a value from outside the object graph: on the
/// stack, in a container, in another thread. Every live `Cyptr` keeps its
/// value reachable. References that may form cycles belong in
/// [`Edge`][crate::Edge] fields of the values instead.
///
/// Dropping the last handle to a value that an edge still points at sweeps
/// the value's generation, since it may have been the only way into a
/// cycle. See [`background::batch`][crate::background::batch] for grouping
/// those sweeps.
pub struct Cyptr<T: Send + Sync + 'static> {
    shared: ManuallyDrop<Arc<Shared<T>>>,
}

// Rolls back a registration when the closure building the value panics.
struct Construction<'a> {
    core: &'a ObjectCore,
    done: bool,
}

impl<'a> Drop for Construction<'a> {
    fn drop(&mut self) {
        if !self.done {
            self.core.detach();
        }
    }
}

impl<T: Send + Sync + 'static> Cyptr<T> {
    pub fn new(value: T) -> Cyptr<T> {
        Cyptr::new_cyclic(|_| value)
    }

    /// Like [`Cyptr::new`], but a failure to grow the generation's member
    /// set is returned as [`Error::AllocationFailed`][crate::Error::AllocationFailed]
    /// instead of aborting. Allocating the value and its bookkeeping still
    /// aborts on out-of-memory, as any `Arc::new` does.
    pub fn try_new(value: T) -> Result<Cyptr<T>> {
        Cyptr::try_new_cyclic(|_| value)
    }

    /// Build a value whose [`Edge`][crate::Edge] fields belong to it.
    pub fn new_cyclic<F: FnOnce(&Node) -> T>(f: F) -> Cyptr<T> {
        match Cyptr::build(f, |lock, core| {
            lock.register(core);
            Ok(())
        }) {
            Ok(cyptr) => cyptr,
            Err(err) => panic!("cannot register a new object: {}", err),
        }
    }

    pub fn try_new_cyclic<F: FnOnce(&Node) -> T>(f: F) -> Result<Cyptr<T>> {
        Cyptr::build(f, |lock, core| lock.try_register(core))
    }

    fn build<F, R>(f: F, register: R) -> Result<Cyptr<T>>
    where
        F: FnOnce(&Node) -> T,
        R: FnOnce(&mut GenerationLock, &Arc<ObjectCore>) -> Result<()>,
    {
        let core = ObjectCore::new(Generation::new());
        {
            let mut lock = core.lock()?;
            register(&mut lock, &core)?;
        }
        let mut construction = Construction {
            core: &core,
            done: false,
        };
        let value = f(&Node::new(core.clone()));
        construction.done = true;
        drop(construction);
        trace!("new object {}", core.id());
        Ok(Cyptr {
            shared: ManuallyDrop::new(Arc::new(Shared { core, value })),
        })
    }

    // `target` must already be counted as an external handle.
    pub(crate) fn from_target(target: Target) -> Cyptr<T> {
        match target.into_any().downcast::<Shared<T>>() {
            Ok(shared) => Cyptr {
                shared: ManuallyDrop::new(shared),
            },
            Err(_) => unreachable!("edge target has a different type than its edge"),
        }
    }

    pub(crate) fn to_target(&self) -> Target {
        let shared: Arc<Shared<T>> = Arc::clone(&self.shared);
        shared
    }

    pub(crate) fn core(this: &Self) -> &Arc<ObjectCore> {
        &this.shared.core
    }

    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        Arc::ptr_eq(&this.shared, &other.shared)
    }

    /// Id of the generation the value currently belongs to.
    pub fn generation_id(this: &Self) -> Timestamp {
        Cyptr::core(this).generation().id()
    }

    /// Number of live `Cyptr` handles to the value.
    pub fn external_count(this: &Self) -> usize {
        this.shared.core.external_count()
    }
}

/// Sweep the generation `cyptr` belongs to right away, bypassing the
/// background queue.
pub fn collect<T: Send + Sync + 'static>(cyptr: &Cyptr<T>) -> Result<SweepReport> {
    generation::sweep(&Cyptr::core(cyptr).generation())
}

impl<T: Send + Sync + 'static> Clone for Cyptr<T> {
    fn clone(&self) -> Self {
        self.shared.core.acquire_external();
        Cyptr {
            shared: ManuallyDrop::new(Arc::clone(&self.shared)),
        }
    }
}

impl<T: Send + Sync + 'static> Drop for Cyptr<T> {
    fn drop(&mut self) {
        let shared = unsafe { ManuallyDrop::take(&mut self.shared) };
        // Still referenced from inside the graph: possibly only by a cycle.
        let orphaned = shared.core.release_external() && Arc::strong_count(&shared) > 1;
        if orphaned {
            let generation = shared.core.generation();
            drop_queue::release_one(shared);
            background::request_sweep(&generation);
        } else {
            drop_queue::release_one(shared);
        }
    }
}

impl<T: Send + Sync + 'static> Deref for Cyptr<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.shared.value
    }
}

impl<T: fmt::Debug + Send + Sync + 'static> fmt::Debug for Cyptr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cyptr")
            .field("object", &self.shared.core.id())
            .field("value", &self.shared.value)
            .finish()
    }
}
