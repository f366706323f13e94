//! Map-reduce analysis of a transcript: one oracle call per chunk, plus a
//! combining call when there is more than one chunk.

use crate::error::{PipelineError, Result};
use crate::llm::TextOracle;
use crate::transcript::chunker::{split_into_chunks, DEFAULT_MAX_TOKENS};
use crate::transcript::templates::{combine_prompt, AnalysisKind};
use std::sync::Arc;
use tracing::info;

pub struct TranscriptAnalyzer {
    oracle: Arc<dyn TextOracle>,
    max_chunk_tokens: usize,
}

impl TranscriptAnalyzer {
    pub fn new(oracle: Arc<dyn TextOracle>) -> Self {
        Self {
            oracle,
            max_chunk_tokens: DEFAULT_MAX_TOKENS,
        }
    }

    pub fn with_chunk_tokens(mut self, max_chunk_tokens: usize) -> Self {
        self.max_chunk_tokens = max_chunk_tokens;
        self
    }

    pub async fn analyze(&self, transcript: &str, kind: AnalysisKind) -> Result<String> {
        let chunks = split_into_chunks(transcript, self.max_chunk_tokens);
        if chunks.is_empty() {
            return Err(PipelineError::Transcript("Transcript is empty".to_string()));
        }

        let total = chunks.len();
        info!("Analyzing transcript ({}) in {} chunk(s)", kind, total);

        let mut analyses = Vec::with_capacity(total);
        for (i, chunk) in chunks.iter().enumerate() {
            let part = if total > 1 { Some((i + 1, total)) } else { None };
            let analysis = self
                .oracle
                .complete(&kind.render(chunk, part))
                .await
                .map_err(|e| PipelineError::Transcript(format!("Analysis error: {}", e)))?;
            analyses.push(analysis);
        }

        if analyses.len() == 1 {
            return Ok(analyses.remove(0));
        }

        self.oracle
            .complete(&combine_prompt(&analyses))
            .await
            .map_err(|e| PipelineError::Transcript(format!("Analysis error: {}", e)))
    }
}
