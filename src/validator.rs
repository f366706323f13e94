//! Answer Validator
//!
//! Lenient second-opinion check on a composed answer.

use crate::error::{PipelineError, Result};
use crate::llm::TextOracle;
use crate::normalizer;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationVerdict {
    pub is_valid: bool,
    pub reason: String,
    pub suggested_fix: Option<String>,
}

impl ValidationVerdict {
    /// An invalid verdict that carries something to recompose with.
    pub fn correction(&self) -> Option<&str> {
        if self.is_valid {
            None
        } else {
            self.suggested_fix.as_deref()
        }
    }
}

pub struct AnswerValidator {
    oracle: Arc<dyn TextOracle>,
}

impl AnswerValidator {
    pub fn new(oracle: Arc<dyn TextOracle>) -> Self {
        Self { oracle }
    }

    pub fn build_prompt(&self, question: &str, answer: &str) -> String {
        format!(
            r#"You are the final step of a data analysis pipeline - a final quality check if you will.
Determine if the provided answer is reasonable for the given question.
Most of the time, the answer will be adequate - even if the contents are fictional or made up.
Do not reject answers that are not perfect, as long as they are reasonable.
Only reject answers that clearly fail the question, such as answering a different question or omitting a requested quantity.

Question: {question}
Answer: {answer}

Respond in JSON format matching this schema:
{{
    "isValid": true/false,
    "reason": "string explaining why the answer is valid or invalid",
    "suggestedFix": "string with suggestion if invalid, null if valid"
}}"#,
            question = question,
            answer = answer
        )
    }

    pub async fn validate(&self, question: &str, answer: &str) -> Result<ValidationVerdict> {
        let raw = self.oracle.complete(&self.build_prompt(question, answer)).await?;

        let value = normalizer::normalize(&raw)
            .map_err(|e| PipelineError::Validation(e.to_string()))?;
        let is_valid = normalizer::required_bool(&value, "isValid")
            .ok_or_else(|| PipelineError::Validation("Response missing 'isValid' field".to_string()))?;

        let verdict = ValidationVerdict {
            is_valid,
            reason: normalizer::required_str(&value, "reason").unwrap_or_default().to_string(),
            suggested_fix: normalizer::optional_str(&value, "suggestedFix").map(str::to_string),
        };

        if verdict.is_valid {
            info!("Answer validated: {}", verdict.reason);
        } else {
            warn!(
                "Answer rejected: {} (suggested fix: {:?})",
                verdict.reason, verdict.suggested_fix
            );
        }
        Ok(verdict)
    }
}
