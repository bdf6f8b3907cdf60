pub mod fs;
pub mod memory;
pub mod neo4j;
pub mod opensearch;
pub mod qdrant;

pub use fs::{FsObjectStore, FsRegistry};
pub use memory::{MemoryKeywordIndex, MemoryObjectStore, MemoryRegistry, MemoryStructureStore, MemoryVectorIndex};
pub use neo4j::Neo4jStore;
pub use opensearch::OpenSearchStore;
pub use qdrant::QdrantStore;
