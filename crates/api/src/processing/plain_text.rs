use std::path::Path;
use std::time::Instant;

use async_trait::async_trait;
use tracing::debug;

use copilot_ingestion::{DocumentProcessor, ProcessOutcome, ProcessRequest, ProcessorError};

use super::chunking::SentenceChunker;

pub const SUPPORTED_EXTENSIONS: &[&str] = &["txt", "md", "markdown"];

/// Processor for UTF-8 text and Markdown uploads.
///
/// Output is a pure function of the request, so re-delivery of the same
/// `document_id` produces the same chunk count.
#[derive(Debug, Clone, Default)]
pub struct PlainTextProcessor {
    chunker: SentenceChunker,
}

impl PlainTextProcessor {
    pub fn new(chunker: SentenceChunker) -> Self {
        Self { chunker }
    }
}

fn extension(filename: &str) -> Option<String> {
    Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
}

#[async_trait]
impl DocumentProcessor for PlainTextProcessor {
    fn supports(&self, filename: &str) -> bool {
        extension(filename).is_some_and(|ext| SUPPORTED_EXTENSIONS.contains(&ext.as_str()))
    }

    async fn process(&self, request: ProcessRequest) -> Result<ProcessOutcome, ProcessorError> {
        let started = Instant::now();

        if !self.supports(&request.filename) {
            let ext = extension(&request.filename).unwrap_or_default();
            return Err(ProcessorError::UnsupportedFormat(format!(".{ext}")));
        }

        let text = String::from_utf8_lossy(&request.file_content);
        if text.trim().is_empty() {
            return Err(ProcessorError::EmptyDocument);
        }

        let chunks = self.chunker.chunk(&text);
        if chunks.is_empty() {
            return Err(ProcessorError::EmptyDocument);
        }

        let chunks_created = u32::try_from(chunks.len())
            .map_err(|_| ProcessorError::Failed("too many chunks".to_string()))?;
        let processing_time_ms = started.elapsed().as_secs_f64() * 1000.0;

        debug!(
            document_id = %request.document_id,
            filename = %request.filename,
            chunks_created,
            "document chunked"
        );

        Ok(ProcessOutcome {
            chunks_created,
            processing_time_ms,
        })
    }
}
