//! Answer Composer
//!
//! Turns a tabular result into a direct natural-language answer.

use crate::error::{PipelineError, Result};
use crate::execution::QueryResult;
use crate::llm::TextOracle;
use crate::normalizer;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnswerRecord {
    pub question: String,
    pub text: String,
    /// Size of the full result, not of the sample the oracle saw.
    pub supporting_row_count: usize,
    /// The question as the oracle repeated it back, if it did.
    pub echoed_question: Option<String>,
}

impl AnswerRecord {
    pub fn echoes_question(&self) -> bool {
        self.echoed_question
            .as_deref()
            .map(|echo| echo.trim() == self.question.trim())
            .unwrap_or(false)
    }
}

pub struct AnswerComposer {
    oracle: Arc<dyn TextOracle>,
    sample_rows: usize,
}

impl AnswerComposer {
    pub fn new(oracle: Arc<dyn TextOracle>, sample_rows: usize) -> Self {
        Self { oracle, sample_rows }
    }

    pub fn build_prompt(&self, rows: &QueryResult, question: &str) -> Result<String> {
        let sample = serde_json::to_string(rows.sample(self.sample_rows))?;
        let echo = serde_json::to_string(question)?;

        Ok(format!(
            r#"You are the CRM insight assistant, a database expert that explains query results in clear, natural language.
Provide a concise answer that directly addresses the user's question based on the query results.

User Question: {question}
Total Records Found: {total}
Sample Data: {sample}

Respond in JSON format matching this schema:
{{
    "user_query": {echo},
    "answer": "string"
}}"#,
            question = question,
            total = rows.row_count(),
            sample = sample,
            echo = echo
        ))
    }

    pub async fn compose(&self, rows: &QueryResult, question: &str) -> Result<AnswerRecord> {
        let raw = self.oracle.complete(&self.build_prompt(rows, question)?).await?;

        let value = normalizer::normalize(&raw)
            .map_err(|e| PipelineError::Composition(e.to_string()))?;
        let text = normalizer::required_str(&value, "answer")
            .ok_or_else(|| PipelineError::Composition("Response missing 'answer' field".to_string()))?
            .to_string();

        let record = AnswerRecord {
            question: question.to_string(),
            text,
            supporting_row_count: rows.row_count(),
            echoed_question: normalizer::optional_str(&value, "user_query").map(str::to_string),
        };

        if !record.echoes_question() {
            warn!(
                "Composed answer echoed {:?} instead of the question",
                record.echoed_question
            );
        }
        info!("Generated response: {}", record.text);
        Ok(record)
    }
}
