//! TODO board table model and per-task spec index.

pub mod specs;
pub mod table;

pub use specs::{SpecError, SpecIndex, SpecStatus};
pub use table::{Board, BoardError, TaskRow};
