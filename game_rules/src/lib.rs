//! # Game Rules
//!
//! The "Rule Bible" crate - the catalog of rules the adjudication engine cites,
//! plus the mechanics needed to read them (roll types, effect wording,
//! prerequisite conditions). This crate holds no retrieval or AI logic and
//! has no async runtime.

pub mod error;
pub mod mechanics;
pub mod rules;
pub mod text;

pub use error::*;
pub use mechanics::*;
pub use rules::*;
