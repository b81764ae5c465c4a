//! Repository layer: entity-scoped database operations.
//!
//! Function-based: each function takes a borrowed `Connection` so callers
//! decide transaction and threading boundaries.

mod audit;
mod users;

pub use audit::*;
pub use users::*;
