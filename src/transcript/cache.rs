//! Transcript cache keyed by source and transcription options.
//!
//! Owned by the caller (one per session) instead of living in global state.

use crate::error::Result;
use crate::transcript::transcriber::{Transcriber, TranscriptionOptions};
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::debug;

type CacheKey = (String, TranscriptionOptions);

#[derive(Default)]
pub struct TranscriptCache {
    entries: Mutex<HashMap<CacheKey, String>>,
}

impl TranscriptCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, source: &str, options: TranscriptionOptions) -> Option<String> {
        self.entries
            .lock()
            .await
            .get(&(source.to_string(), options))
            .cloned()
    }

    pub async fn insert(&self, source: &str, options: TranscriptionOptions, transcript: String) {
        self.entries
            .lock()
            .await
            .insert((source.to_string(), options), transcript);
    }

    /// Cached transcript, or transcribe and remember it.
    pub async fn get_or_transcribe(
        &self,
        transcriber: &dyn Transcriber,
        source: &str,
        options: TranscriptionOptions,
    ) -> Result<String> {
        if let Some(hit) = self.get(source, options).await {
            debug!("Transcript cache hit for {}", source);
            return Ok(hit);
        }
        let transcript = transcriber.transcribe(source, options).await?;
        self.insert(source, options, transcript.clone()).await;
        Ok(transcript)
    }

    /// Drop every cached entry for `source`, whatever the options. Returns how many were removed.
    pub async fn invalidate(&self, source: &str) -> usize {
        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|(cached_source, _), _| cached_source != source);
        before - entries.len()
    }

    pub async fn clear(&self) {
        self.entries.lock().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingTranscriber {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Transcriber for CountingTranscriber {
        async fn transcribe(&self, source: &str, options: TranscriptionOptions) -> Result<String> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(format!("{} labels={} call={}", source, options.speaker_labels, n))
        }
    }

    #[tokio::test]
    async fn test_hits_are_keyed_by_source_and_options() {
        let cache = TranscriptCache::new();
        let transcriber = CountingTranscriber { calls: AtomicUsize::new(0) };

        let first = cache
            .get_or_transcribe(&transcriber, "call-1.mp4", TranscriptionOptions::default())
            .await
            .unwrap();
        let again = cache
            .get_or_transcribe(&transcriber, "call-1.mp4", TranscriptionOptions::default())
            .await
            .unwrap();
        assert_eq!(first, again);
        assert_eq!(transcriber.calls.load(Ordering::SeqCst), 1);

        cache
            .get_or_transcribe(&transcriber, "call-1.mp4", TranscriptionOptions::plain())
            .await
            .unwrap();
        assert_eq!(transcriber.calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.len().await, 2);
    }

    #[tokio::test]
    async fn test_invalidate_and_clear() {
        let cache = TranscriptCache::new();
        cache.insert("a", TranscriptionOptions::default(), "x".into()).await;
        cache.insert("a", TranscriptionOptions::plain(), "y".into()).await;
        cache.insert("b", TranscriptionOptions::default(), "z".into()).await;

        assert_eq!(cache.invalidate("a").await, 2);
        assert!(cache.get("a", TranscriptionOptions::default()).await.is_none());
        assert_eq!(cache.get("b", TranscriptionOptions::default()).await.as_deref(), Some("z"));

        cache.clear().await;
        assert!(cache.is_empty().await);
    }
}
