//! A concurrent, generation-based cycle collector layered on reference
//! counting.
//!
//! Values are allocated behind a [`Cyptr`], an atomically reference-counted
//! handle. Fields that may take part in cycles are declared as [`Edge`]s.
//! Objects connected by edges share a *generation*: the unit that is
//! locked, and swept, as a whole. When dropping a handle or overwriting an
//! edge may have orphaned a cycle, the generation is mark-swept from the
//! objects still held by a `Cyptr`, and the unreached ones are freed.
//!
//! ```
//! use cyptr::{Cyptr, Edge};
//!
//! struct Ring {
//!     next: Edge<Ring>,
//! }
//!
//! let a = Cyptr::new_cyclic(|node| Ring { next: Edge::new(node) });
//! let b = Cyptr::new_cyclic(|node| Ring { next: Edge::new(node) });
//! a.next.set(Some(&b)).unwrap();
//! b.next.set(Some(&a)).unwrap();
//! assert_eq!(Cyptr::generation_id(&a), Cyptr::generation_id(&b));
//! drop(a);
//! drop(b); // the cycle is swept here
//! ```
//!
//! Sweeps run inline unless [background processing](background) is enabled.

mod cyptr;
mod edge;
mod error;
mod impl_;
mod node;

pub mod background;
pub mod timestamp;

pub use crate::cyptr::{collect, Cyptr};
pub use crate::edge::Edge;
pub use crate::error::{Error, Result};
pub use crate::impl_::generation::SweepReport;
pub use crate::node::Node;
pub use crate::timestamp::Timestamp;

#[cfg(test)]
mod tests;
