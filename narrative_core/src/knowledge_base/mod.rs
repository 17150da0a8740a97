//! Knowledge Base module - structured, timestamped facts about the world.
//!
//! The fact graph consists of:
//! - **Subjects**: named nodes (characters, locations, items, factions)
//! - **Assertions**: `subject PREDICATE object` edges with a validity interval

mod fact;
mod graph;

pub use fact::*;
pub use graph::*;
