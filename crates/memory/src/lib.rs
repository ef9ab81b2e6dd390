//! Long-term memory for the agent core.
//!
//! Two storage planes kept in agreement under one id: a vector index
//! for semantic recall and a namespaced document store for the full
//! records. [`LongTermMemoryStore`] is the hybrid facade;
//! [`SimpleMemIngestor`] distils conversations into memory atoms and
//! retrieves them with hybrid semantic + lexical search.

pub mod bm25;
pub mod docstore;
pub mod embed;
pub mod long_term;
pub mod qdrant;
pub mod simplemem;
pub mod vector;

pub use docstore::{DocumentStore, InMemoryDocumentStore, JsonFileDocumentStore};
pub use embed::{Embedder, GatewayEmbedder, HashingEmbedder};
pub use long_term::LongTermMemoryStore;
pub use qdrant::QdrantVectorStore;
pub use simplemem::{MemoryAtom, SimpleMemConfig, SimpleMemIngestor};
pub use vector::{InMemoryVectorStore, VectorHit, VectorStore};
