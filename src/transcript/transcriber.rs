//! Speech-to-text capability and a file-backed implementation.

use crate::error::{PipelineError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TranscriptionOptions {
    pub speaker_labels: bool,
    pub speakers_expected: Option<u8>,
}

impl Default for TranscriptionOptions {
    fn default() -> Self {
        Self {
            speaker_labels: true,
            speakers_expected: Some(2),
        }
    }
}

impl TranscriptionOptions {
    pub fn plain() -> Self {
        Self {
            speaker_labels: false,
            speakers_expected: None,
        }
    }
}

/// Turns a recording (path or URL) into transcript text. With speaker labels,
/// utterances are rendered as `Speaker X: text` separated by blank lines.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, source: &str, options: TranscriptionOptions) -> Result<String>;
}

/// Reads an already transcribed call from disk.
pub struct TextFileTranscriber;

#[async_trait]
impl Transcriber for TextFileTranscriber {
    async fn transcribe(&self, source: &str, options: TranscriptionOptions) -> Result<String> {
        let path = Path::new(source);
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| PipelineError::Transcript(format!("Cannot read transcript {}: {}", path.display(), e)))?;

        let text = text.replace("\r\n", "\n");
        if text.trim().is_empty() {
            return Err(PipelineError::Transcript("No transcription text was generated".to_string()));
        }

        let formatted = if options.speaker_labels {
            text.trim().to_string()
        } else {
            strip_speaker_labels(&text)
        };
        info!("Loaded transcript {} ({} chars)", path.display(), formatted.len());
        Ok(formatted)
    }
}

/// Drop `Speaker X:` prefixes and join utterances into running text.
fn strip_speaker_labels(text: &str) -> String {
    text.split("\n\n")
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|segment| match segment.split_once(':') {
            Some((label, rest)) if label.starts_with("Speaker ") => rest.trim(),
            _ => segment,
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_temp(name: &str, content: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("crm-insight-{}-{}", uuid::Uuid::new_v4(), name));
        std::fs::write(&path, content).unwrap();
        path
    }

    #[tokio::test]
    async fn test_reads_labelled_transcript() {
        let path = write_temp("call.txt", "Speaker A: Hello.\r\n\r\nSpeaker B: Hi there.\n");
        let text = TextFileTranscriber
            .transcribe(path.to_str().unwrap(), TranscriptionOptions::default())
            .await
            .unwrap();
        assert_eq!(text, "Speaker A: Hello.\n\nSpeaker B: Hi there.");
        std::fs::remove_file(path).ok();
    }

    #[tokio::test]
    async fn test_plain_option_strips_labels() {
        let path = write_temp("call.txt", "Speaker A: Hello.\n\nSpeaker B: Hi there.");
        let text = TextFileTranscriber
            .transcribe(path.to_str().unwrap(), TranscriptionOptions::plain())
            .await
            .unwrap();
        assert_eq!(text, "Hello. Hi there.");
        std::fs::remove_file(path).ok();
    }

    #[tokio::test]
    async fn test_empty_or_missing_file_fails() {
        let path = write_temp("empty.txt", "  \n");
        let err = TextFileTranscriber
            .transcribe(path.to_str().unwrap(), TranscriptionOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Transcript(_)));
        std::fs::remove_file(path).ok();

        assert!(TextFileTranscriber
            .transcribe("/nonexistent/call.txt", TranscriptionOptions::default())
            .await
            .is_err());
    }
}
