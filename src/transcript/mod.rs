//! Call Transcript Analysis
//!
//! Speaker-labelled call transcripts, an explicit transcript cache and a
//! map-reduce analyzer that runs templated prompts over transcript chunks.

pub mod analyzer;
pub mod cache;
pub mod chunker;
pub mod templates;
pub mod transcriber;

pub use analyzer::TranscriptAnalyzer;
pub use cache::TranscriptCache;
pub use chunker::{estimate_tokens, split_into_chunks, DEFAULT_MAX_TOKENS};
pub use templates::AnalysisKind;
pub use transcriber::{TextFileTranscriber, Transcriber, TranscriptionOptions};
