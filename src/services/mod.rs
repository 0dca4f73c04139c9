pub mod ragflow;
pub mod retrieval;
pub mod shapes;

pub use ragflow::RagflowClient;
pub use retrieval::{CHUNK_SEPARATOR, Chunk, RetrievalBackend, RetrievalResult};
