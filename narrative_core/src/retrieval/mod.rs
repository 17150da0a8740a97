//! Retrieval module - hybrid dense + lexical ranking.

mod fusion;
mod hybrid;

pub use fusion::*;
pub use hybrid::*;
