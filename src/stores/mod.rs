/// Built-in vector store adapters.
pub mod memory;
pub mod qdrant;
