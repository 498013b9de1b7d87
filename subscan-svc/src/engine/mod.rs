//! Chunk engine: one deadline-bounded unit of scanning work

pub mod chunk;

pub use chunk::{run_chunk, ChunkContext, ChunkError, ChunkOutcome, ChunkStats};
