//! Document processors that run in-process.

pub mod chunking;
pub mod plain_text;

pub use chunking::{ChunkingError, SentenceChunker};
pub use plain_text::PlainTextProcessor;
