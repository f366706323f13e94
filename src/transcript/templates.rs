//! Analysis prompt templates.

use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisKind {
    Summary,
    Objections,
    CustomerSentiments,
    FollowUpTasks,
    UseCases,
}

impl AnalysisKind {
    pub const ALL: [AnalysisKind; 5] = [
        AnalysisKind::Summary,
        AnalysisKind::Objections,
        AnalysisKind::CustomerSentiments,
        AnalysisKind::FollowUpTasks,
        AnalysisKind::UseCases,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            AnalysisKind::Summary => "summary",
            AnalysisKind::Objections => "objections",
            AnalysisKind::CustomerSentiments => "customer_sentiments",
            AnalysisKind::FollowUpTasks => "follow_up_tasks",
            AnalysisKind::UseCases => "use_cases",
        }
    }

    fn instructions(&self) -> &'static str {
        match self {
            AnalysisKind::Summary => {
                "Focus on:\n\
                 - Main topics discussed\n\
                 - Key points and takeaways\n\
                 - Important conclusions\n\
                 - Critical decisions or agreements made"
            }
            AnalysisKind::Objections => {
                "Please provide:\n\
                 - Each objection with exact customer quotes\n\
                 - Context around each objection\n\
                 - Severity or importance of each objection\n\
                 - How the objection was addressed (if it was)\n\n\
                 Format each objection as:\n\
                 1. Quote: \"[exact customer words]\"\n   Context: [explain the situation]\n   Severity: [High/Medium/Low]\n   Resolution: [how it was addressed]"
            }
            AnalysisKind::CustomerSentiments => {
                "Provide:\n\
                 - Overall sentiment (positive, negative, neutral, mixed)\n\
                 - Emotional progression throughout the conversation\n\
                 - Key moments where sentiment shifted\n\
                 - Supporting quotes for each sentiment observation\n\n\
                 Format as:\n\
                 1. Sentiment: [description]\n   Quote: \"[exact customer words]\"\n   Context: [explain what led to this sentiment]"
            }
            AnalysisKind::FollowUpTasks => {
                "List:\n\
                 - Specific tasks or actions promised\n\
                 - Deadlines or timeframes mentioned\n\
                 - Responsibilities assigned\n\
                 - Any conditions or dependencies\n\n\
                 Format each task as:\n\
                 1. Task: [description]\n   Quote: \"[exact words from conversation]\"\n   Owner: [who is responsible]\n   Timeline: [when it needs to be done]"
            }
            AnalysisKind::UseCases => {
                "For each use case:\n\
                 - Quote the exact discussion\n\
                 - Describe the scenario\n\
                 - Note any specific requirements\n\
                 - Highlight the customer's specific needs or pain points\n\n\
                 Format as:\n\
                 1. Use Case: [title]\n   Quote: \"[exact conversation excerpt]\"\n   Description: [detailed explanation]\n   Requirements: [specific needs mentioned]"
            }
        }
    }

    fn heading(&self) -> &'static str {
        match self {
            AnalysisKind::Summary => "Provide a concise summary of the following transcription:",
            AnalysisKind::Objections => "Analyze the following transcription and identify customer objections:",
            AnalysisKind::CustomerSentiments => {
                "Analyze the customer's emotional state and sentiment throughout the conversation:"
            }
            AnalysisKind::FollowUpTasks => {
                "Extract all action items, commitments, and follow-up tasks from the conversation:"
            }
            AnalysisKind::UseCases => "Identify all use cases and scenarios discussed in the conversation:",
        }
    }

    /// Prompt for one chunk. `part` is `(index, total)`, 1-based, for multi-chunk transcripts.
    pub fn render(&self, transcript: &str, part: Option<(usize, usize)>) -> String {
        let mut prompt = String::new();
        if let Some((index, total)) = part {
            prompt.push_str(&format!("This is part {} of {} of the transcription.\n", index, total));
        }
        prompt.push_str(self.heading());
        prompt.push('\n');
        prompt.push_str(transcript);
        prompt.push_str("\n\n");
        prompt.push_str(self.instructions());
        prompt
    }
}

/// Prompt merging per-chunk analyses into one.
pub fn combine_prompt(analyses: &[String]) -> String {
    let combined = analyses
        .iter()
        .enumerate()
        .map(|(i, analysis)| format!("Part {} Analysis:\n{}", i + 1, analysis))
        .collect::<Vec<_>>()
        .join("\n\n");

    format!(
        "Below are analyses of different parts of a longer transcription.\n\
         Please combine these analyses into a single coherent response:\n\n\
         {}\n\n\
         Provide a unified analysis that:\n\
         1. Synthesizes the key points from all parts\n\
         2. Maintains the original analysis structure\n\
         3. Eliminates redundancy\n\
         4. Presents a clear and organized final analysis",
        combined
    )
}

impl fmt::Display for AnalysisKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key())
    }
}

impl FromStr for AnalysisKind {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_lowercase().replace(['-', ' '], "_");
        AnalysisKind::ALL
            .into_iter()
            .find(|k| k.key() == wanted)
            .ok_or_else(|| {
                PipelineError::Transcript(format!(
                    "Unknown analysis kind '{}', expected one of: {}",
                    s,
                    AnalysisKind::ALL.iter().map(|k| k.key()).collect::<Vec<_>>().join(", ")
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_kind() {
        assert_eq!("summary".parse::<AnalysisKind>().unwrap(), AnalysisKind::Summary);
        assert_eq!("follow-up-tasks".parse::<AnalysisKind>().unwrap(), AnalysisKind::FollowUpTasks);
        assert_eq!("Customer Sentiments".parse::<AnalysisKind>().unwrap(), AnalysisKind::CustomerSentiments);
        assert!("pricing".parse::<AnalysisKind>().is_err());
    }

    #[test]
    fn test_render_single_and_multi_part() {
        let single = AnalysisKind::Objections.render("Speaker A: Too expensive.", None);
        assert!(single.starts_with("Analyze the following transcription"));
        assert!(single.contains("Speaker A: Too expensive."));
        assert!(single.contains("Severity: [High/Medium/Low]"));

        let part = AnalysisKind::Summary.render("Speaker A: Hi.", Some((2, 3)));
        assert!(part.starts_with("This is part 2 of 3 of the transcription."));
    }

    #[test]
    fn test_combine_prompt_numbers_parts() {
        let prompt = combine_prompt(&["first".to_string(), "second".to_string()]);
        assert!(prompt.contains("Part 1 Analysis:\nfirst\n\nPart 2 Analysis:\nsecond"));
    }
}
