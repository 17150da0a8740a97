//! # Narrative Core (The Cortex)
//!
//! The "brain" of the narrative system. This crate remembers what happened,
//! knows what is true now (and what was true then), and rules on what the
//! players may do, citing the `game_rules` catalog.
//!
//! ## Core Components
//!
//! - **memory**: Records, the BM25 lexical index, and the dense index seams
//! - **knowledge_base**: Temporal fact graph with exclusive predicates
//! - **retrieval**: Hybrid dense + lexical ranking with score fusion
//! - **memory_router**: Intent classification and context bundles for the generator
//! - **adjudication**: Rule candidates, conflict policy, and rulings
//!
//! ## Design Philosophy
//!
//! - **Degrade, don't fail**: One broken backend narrows the answer; only losing every source is an error
//! - **Deterministic**: Same inputs, same ranking, same ruling
//! - **Pluggable**: Embeddings, vector search and graph storage sit behind traits

pub mod adjudication;
pub mod config;
pub mod error;
pub mod knowledge_base;
pub mod memory;
pub mod memory_router;
pub mod retrieval;

pub use adjudication::*;
pub use config::*;
pub use error::*;
pub use knowledge_base::*;
pub use memory::*;
pub use memory_router::*;
pub use retrieval::*;
