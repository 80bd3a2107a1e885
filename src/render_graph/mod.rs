//! Frame graph system
//!
//! Passes are registered once, linked by name, and then prepared, culled and
//! executed every frame. Resources are virtual until a pass acquires them, at
//! which point they are bound to pooled render objects that are recycled
//! across passes and frames.

pub mod binding;
pub mod definition;
pub mod executor;
pub mod graph;
pub mod index;
pub mod object;
pub mod pass;
pub mod resource;
pub mod shared;
pub mod ticket;

pub use binding::*;
pub use definition::*;
pub use executor::PassQueue;
pub use graph::*;
pub use index::*;
pub use object::*;
pub use pass::*;
pub use resource::*;
pub use shared::*;
pub use ticket::*;
