use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::cyptr::Cyptr;
use crate::error::Result;
use crate::impl_::edge::EdgeSlot;
use crate::impl_::object::Target;
use crate::node::Node;

/// A field of a collectible value that points at another collectible value.
///
/// Unlike a [`Cyptr`] held inside a value, edges may form cycles: objects
/// connected by edges share a generation, and a cycle of edges nobody holds
/// from the outside is reclaimed when its generation is swept.
pub struct Edge<T> {
    pub(crate) impl_: Arc<EdgeSlot>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Send + Sync + 'static> Edge<T> {
    /// An empty edge owned by the object `node` describes.
    pub fn new(node: &Node) -> Edge<T> {
        Edge {
            impl_: EdgeSlot::new(&node.core),
            _marker: PhantomData,
        }
    }

    /// An edge owned by `node`, pointing at `target`.
    pub fn with_target(node: &Node, target: &Cyptr<T>) -> Result<Edge<T>> {
        let edge = Edge::new(node);
        edge.set(Some(target))?;
        Ok(edge)
    }

    /// Point this edge at `target`, or clear it with `None`.
    ///
    /// Connecting two objects merges their generations. Overwriting the
    /// previous target may leave a cycle without outside references, in
    /// which case the generation is swept (inline, or queued when
    /// [background processing][crate::background] is enabled).
    ///
    /// Fails with [`Error::Detached`][crate::Error::Detached] when the
    /// object owning this edge no longer exists.
    pub fn set(&self, target: Option<&Cyptr<T>>) -> Result<()> {
        let target: Option<Target> = target.map(Cyptr::to_target);
        self.impl_.reset(target)
    }

    /// Clear this edge. Clearing an empty edge does nothing.
    pub fn reset(&self) -> Result<()> {
        self.impl_.reset(None)
    }

    /// A handle to the current target, `None` when the edge is empty.
    ///
    /// Fails with [`Error::Detached`][crate::Error::Detached] like
    /// [`Edge::set`].
    pub fn get(&self) -> Result<Option<Cyptr<T>>> {
        Ok(self.impl_.get()?.map(Cyptr::from_target))
    }

    pub fn is_null(&self) -> bool {
        self.impl_.is_null()
    }
}

impl<T> Drop for Edge<T> {
    fn drop(&mut self) {
        self.impl_.unlink();
    }
}

impl<T> fmt::Debug for Edge<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.impl_)
    }
}
