pub mod chunker;

pub use chunker::{ChunkPlanner, PlannedChunk};
