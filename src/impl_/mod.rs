pub mod background;
pub mod drop_queue;
pub mod edge;
pub mod generation;
pub mod object;
