pub mod text;

// Re-export the chunker surface for external use
pub use text::{Chunk, ChunkError, Chunker, ChunkerConfig, PassagePart};
