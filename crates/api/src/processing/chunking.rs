//! Sentence-window chunking.
//!
//! Text is split into sentences (UAX #29) and sentences are packed greedily
//! into chunks of at most `chunk_size` word tokens. When a chunk closes, its
//! trailing sentences (up to `overlap` tokens) seed the next one, so context
//! around a boundary is visible from both sides.
//!
//! A single sentence longer than `chunk_size` becomes its own oversized chunk.

use thiserror::Error;
use unicode_segmentation::UnicodeSegmentation;

pub const DEFAULT_CHUNK_SIZE: usize = 512;
pub const DEFAULT_CHUNK_OVERLAP: usize = 50;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChunkingError {
    #[error("chunk size must be greater than zero")]
    InvalidChunkSize,

    #[error("overlap ({overlap}) must be smaller than chunk size ({chunk_size})")]
    OverlapTooLarge { overlap: usize, chunk_size: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub index: usize,
    pub text: String,
    pub token_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SentenceChunker {
    chunk_size: usize,
    overlap: usize,
}

impl Default for SentenceChunker {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

impl SentenceChunker {
    pub fn new(chunk_size: usize, overlap: usize) -> Result<Self, ChunkingError> {
        if chunk_size == 0 {
            return Err(ChunkingError::InvalidChunkSize);
        }
        if overlap >= chunk_size {
            return Err(ChunkingError::OverlapTooLarge { overlap, chunk_size });
        }
        Ok(Self { chunk_size, overlap })
    }

    pub fn chunk(&self, text: &str) -> Vec<Chunk> {
        if text.trim().is_empty() {
            return Vec::new();
        }

        let sentences: Vec<(&str, usize)> = text
            .unicode_sentences()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| (s, count_tokens(s)))
            .collect();

        let mut chunks = Vec::new();
        let mut window: Vec<(&str, usize)> = Vec::new();
        let mut window_tokens = 0usize;

        for (sentence, tokens) in sentences {
            if !window.is_empty() && window_tokens + tokens > self.chunk_size {
                chunks.push(close(chunks.len(), &window, window_tokens));

                if self.overlap > 0 && window.len() > 1 {
                    let carried = self.carry_over(&window);
                    window_tokens = carried.iter().map(|(_, t)| t).sum();
                    window = carried;
                } else {
                    window.clear();
                    window_tokens = 0;
                }
            }

            window.push((sentence, tokens));
            window_tokens += tokens;
        }

        if !window.is_empty() {
            chunks.push(close(chunks.len(), &window, window_tokens));
        }

        chunks
    }

    /// Trailing sentences of `window` whose token total fits in `overlap`.
    fn carry_over<'a>(&self, window: &[(&'a str, usize)]) -> Vec<(&'a str, usize)> {
        let mut budget = 0usize;
        let mut carried = Vec::new();
        for &(sentence, tokens) in window.iter().rev() {
            if budget + tokens > self.overlap {
                break;
            }
            budget += tokens;
            carried.push((sentence, tokens));
        }
        carried.reverse();
        carried
    }
}

/// Word-level token count; punctuation is not counted.
pub fn count_tokens(text: &str) -> usize {
    text.unicode_words().count()
}

fn close(index: usize, window: &[(&str, usize)], token_count: usize) -> Chunk {
    let text = window
        .iter()
        .map(|(s, _)| *s)
        .collect::<Vec<_>>()
        .join(" ");
    Chunk {
        index,
        text,
        token_count,
    }
}
