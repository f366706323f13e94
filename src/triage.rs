//! Triage Classifier
//!
//! Three-way classification of a question before any schema work happens.

use crate::catalog::SchemaCatalog;
use crate::error::{PipelineError, Result};
use crate::llm::TextOracle;
use crate::normalizer;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Classification {
    DataQuestion,
    GeneralQuestion,
    OutOfScope,
}

impl Classification {
    pub fn label(&self) -> &'static str {
        match self {
            Classification::DataQuestion => "DATA_QUESTION",
            Classification::GeneralQuestion => "GENERAL_QUESTION",
            Classification::OutOfScope => "OUT_OF_SCOPE",
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

impl FromStr for Classification {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().trim_matches('"').to_uppercase().as_str() {
            "DATA_QUESTION" => Ok(Classification::DataQuestion),
            "GENERAL_QUESTION" => Ok(Classification::GeneralQuestion),
            "OUT_OF_SCOPE" => Ok(Classification::OutOfScope),
            other => Err(PipelineError::Classification(format!(
                "Unrecognized query type '{}'",
                other
            ))),
        }
    }
}

pub struct TriageClassifier {
    oracle: Arc<dyn TextOracle>,
    catalog: Arc<SchemaCatalog>,
}

impl TriageClassifier {
    pub fn new(oracle: Arc<dyn TextOracle>, catalog: Arc<SchemaCatalog>) -> Self {
        Self { oracle, catalog }
    }

    pub fn build_prompt(&self, question: &str) -> String {
        format!(
            r#"You are a query classifier for a CRM database system. You have access to the following database schema:

{schema}

Analyze if the question can be answered using the available database tables and fields.
Categorize questions into three types:
1. DATA_QUESTION: Questions that require querying the database, including questions that need data analysis after querying
   Examples:
   - "How many opportunities dropped out?"
   - "What are the common dropout reasons?"
   - "Analyze dropout patterns and suggest strategies"
   - "What's the performance of sales reps based on their conversion rates?"

2. GENERAL_QUESTION: Questions about CRM concepts that cannot be answered even partially from the database
   Examples:
   - "What is the best CRM strategy?"
   - "How should we train new sales reps?"
   - "What are industry best practices for reducing dropouts?"

3. OUT_OF_SCOPE: Questions unrelated to CRM or data analysis
   Examples:
   - "What's the weather like?"
   - "How do I make coffee?"

Important: If a question requires analyzing data from the database FIRST (even if it also needs interpretation after), classify it as DATA_QUESTION.

Question: {question}

Return ONLY a valid JSON object in this exact format:
{{"queryType": "DATA_QUESTION" | "GENERAL_QUESTION" | "OUT_OF_SCOPE"}}"#,
            schema = self.catalog.describe(),
            question = question
        )
    }

    pub async fn classify(&self, question: &str) -> Result<Classification> {
        let raw = self.oracle.complete(&self.build_prompt(question)).await?;
        let classification = parse_classification(&raw)?;
        info!("Triage result: {}", classification);
        Ok(classification)
    }
}

/// Accepts `{"queryType": "..."}` (fenced or not) or a bare label.
fn parse_classification(raw: &str) -> Result<Classification> {
    match normalizer::normalize(raw) {
        Ok(value) => {
            let label = normalizer::required_str(&value, "queryType")
                .or_else(|| value.as_str())
                .ok_or_else(|| {
                    PipelineError::Classification("Response missing 'queryType' field".to_string())
                })?;
            label.parse()
        }
        Err(malformed) => {
            let cleaned = normalizer::clean(raw);
            cleaned.parse().map_err(|_| malformed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct FixedOracle(&'static str);

    #[async_trait]
    impl TextOracle for FixedOracle {
        async fn complete(&self, _prompt: &str) -> Result<String> {
            Ok(self.0.to_string())
        }
    }

    fn classifier(reply: &'static str) -> TriageClassifier {
        TriageClassifier::new(
            Arc::new(FixedOracle(reply)),
            Arc::new(SchemaCatalog::builtin().unwrap()),
        )
    }

    #[test]
    fn test_prompt_embeds_catalog_question_and_rule() {
        let prompt = classifier("").build_prompt("How many leads were created last month?");
        assert!(prompt.contains("General Table name: crm.lead"));
        assert!(prompt.contains("Question: How many leads were created last month?"));
        assert!(prompt.contains("classify it as DATA_QUESTION"));
        assert!(prompt.contains(r#"{"queryType": "DATA_QUESTION" | "GENERAL_QUESTION" | "OUT_OF_SCOPE"}"#));
    }

    #[tokio::test]
    async fn test_classifies_fenced_json() {
        let result = classifier("```json\n{\"queryType\": \"OUT_OF_SCOPE\"}\n```")
            .classify("What's the weather like?")
            .await
            .unwrap();
        assert_eq!(result, Classification::OutOfScope);
    }

    #[tokio::test]
    async fn test_classifies_bare_label() {
        let result = classifier("GENERAL_QUESTION").classify("How should we train reps?").await.unwrap();
        assert_eq!(result, Classification::GeneralQuestion);
    }

    #[tokio::test]
    async fn test_unknown_label_is_a_classification_error() {
        let err = classifier(r#"{"queryType": "MAYBE"}"#).classify("?").await.unwrap_err();
        assert!(matches!(err, PipelineError::Classification(_)));

        let err = classifier(r#"{"type": "DATA_QUESTION"}"#).classify("?").await.unwrap_err();
        assert!(matches!(err, PipelineError::Classification(_)));
    }

    #[tokio::test]
    async fn test_garbage_is_malformed_output() {
        let err = classifier("I think it's about data").classify("?").await.unwrap_err();
        assert!(matches!(err, PipelineError::MalformedOracleOutput { .. }));
    }
}
