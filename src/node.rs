use std::fmt;
use std::sync::Arc;

use crate::impl_::object::ObjectCore;
use crate::timestamp::Timestamp;

/// The graph object of a value under construction.
///
/// [`Cyptr::new_cyclic`][crate::Cyptr::new_cyclic] hands a `Node` to the
/// closure building the value, so that the value's [`Edge`][crate::Edge]
/// fields can be bound to the object that owns them:
///
/// ```
/// use cyptr::{Cyptr, Edge};
///
/// struct Tree {
///     parent: Edge<Tree>,
/// }
///
/// let root = Cyptr::new_cyclic(|node| Tree { parent: Edge::new(node) });
/// let leaf = Cyptr::new_cyclic(|node| Tree { parent: Edge::new(node) });
/// leaf.parent.set(Some(&root)).unwrap();
/// assert!(Cyptr::ptr_eq(&leaf.parent.get().unwrap().unwrap(), &root));
/// ```
pub struct Node {
    pub(crate) core: Arc<ObjectCore>,
}

impl Node {
    pub(crate) fn new(core: Arc<ObjectCore>) -> Node {
        Node { core }
    }

    /// Id of the generation the object currently belongs to.
    pub fn generation_id(&self) -> Timestamp {
        self.core.generation().id()
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(Node {})", self.core.id())
    }
}
