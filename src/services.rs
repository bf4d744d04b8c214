//! External collaborators used by the capabilities
//!
//! Object storage turns generated files into public links; the knowledge
//! base stores and retrieves legal text passages.

mod chunking;
mod storage;
mod vector_store;

pub use chunking::{split_text, CHUNK_OVERLAP, CHUNK_SIZE};
pub use storage::{ObjectStorage, R2Config, R2Storage, StorageError};
pub use vector_store::{
    KnowledgeBase, KnowledgeError, Passage, VectorizeConfig, VectorizeKnowledgeBase,
};
