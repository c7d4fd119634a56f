//! The document-processing capability the worker delegates to.
//!
//! Parsing, chunking, embedding and storage live behind this trait. The
//! pipeline only needs a chunk count back, or an error.
//!
//! Delivery is at-least-once, so a processor may see the same `document_id`
//! more than once and must tolerate it (overwrite, not append).

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use copilot_core::DocumentId;

use crate::job::Metadata;

#[derive(Debug, Clone, PartialEq)]
pub struct ProcessRequest {
    pub document_id: DocumentId,
    pub filename: String,
    pub file_content: Vec<u8>,
    pub title: String,
    pub department: String,
    pub access_role: String,
    pub metadata: Metadata,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ProcessOutcome {
    pub chunks_created: u32,
    /// Time reported by the processor itself.
    pub processing_time_ms: f64,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProcessorError {
    #[error("unsupported file format: {0}")]
    UnsupportedFormat(String),

    #[error("document contains no extractable text")]
    EmptyDocument,

    #[error("{0}")]
    Failed(String),
}

#[async_trait]
pub trait DocumentProcessor: Send + Sync {
    /// Whether `filename` looks like something this processor can handle.
    ///
    /// Used by producers to reject uploads before they are queued.
    fn supports(&self, _filename: &str) -> bool {
        true
    }

    async fn process(&self, request: ProcessRequest) -> Result<ProcessOutcome, ProcessorError>;
}
