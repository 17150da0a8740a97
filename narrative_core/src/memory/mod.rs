//! Memory module - narrative records and the indices that search them.
//!
//! - **Records**: immutable pieces of narrative history
//! - **LexicalIndex**: local BM25 inverted index
//! - **DenseIndex**: nearest-neighbor seam for an external vector store
//! - **EpisodicStore**: writer that keeps both indices in step

mod dense;
mod episodic;
mod lexical;
mod record;

pub use dense::*;
pub use episodic::*;
pub use lexical::*;
pub use record::*;
