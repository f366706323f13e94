//! Transcript chunking on speaker-segment boundaries.

pub const DEFAULT_MAX_TOKENS: usize = 8000;

/// Rough token estimate: words x 1.3.
pub fn estimate_tokens(segment: &str) -> f64 {
    segment.split_whitespace().count() as f64 * 1.3
}

/// Split `text` into chunks of at most `max_tokens` estimated tokens.
///
/// Segments are separated by blank lines and never split, so a single segment
/// larger than the budget becomes a chunk of its own.
pub fn split_into_chunks(text: &str, max_tokens: usize) -> Vec<String> {
    let budget = max_tokens as f64;
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_tokens = 0.0;

    for segment in text.split("\n\n") {
        let segment_tokens = estimate_tokens(segment);

        if current_tokens + segment_tokens > budget {
            if !current.trim().is_empty() {
                chunks.push(current.trim().to_string());
            }
            current = segment.to_string();
            current_tokens = segment_tokens;
        } else {
            if !current.is_empty() {
                current.push_str("\n\n");
            }
            current.push_str(segment);
            current_tokens += segment_tokens;
        }
    }

    if !current.trim().is_empty() {
        chunks.push(current.trim().to_string());
    }
    chunks
}
