//! Pipeline Orchestrator
//!
//! Sequences triage, schema analysis, synthesis, execution with repair,
//! composition and validation for one question. `process_query` never fails:
//! every fault becomes an ERROR-tagged response.

use crate::catalog::SchemaCatalog;
use crate::composer::AnswerComposer;
use crate::config::AssistantConfig;
use crate::deadline::Deadline;
use crate::error::Result;
use crate::execution::{connect_store, DataStore, QueryResult};
use crate::execution_loop::{ExecutionLoop, QueryAttempt};
use crate::llm::{LlmClient, TextOracle};
use crate::relevance::{RelevancePlan, SchemaRelevanceAnalyzer};
use crate::synthesis::QuerySynthesizer;
use crate::triage::{Classification, TriageClassifier};
use crate::validator::{AnswerValidator, ValidationVerdict};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

pub const OUT_OF_SCOPE_MESSAGE: &str = "I apologize, but this question is outside the scope of our CRM system. \
I can help you with questions about sales, opportunities, leads, and other CRM-related topics.";

pub const NO_DATA_MESSAGE: &str = "No data found for your query.";

/// Tag attached to every pipeline response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueryTag {
    DataQuestion,
    GeneralQuestion,
    OutOfScope,
    Error,
}

impl QueryTag {
    pub fn label(&self) -> &'static str {
        match self {
            QueryTag::DataQuestion => "DATA_QUESTION",
            QueryTag::GeneralQuestion => "GENERAL_QUESTION",
            QueryTag::OutOfScope => "OUT_OF_SCOPE",
            QueryTag::Error => "ERROR",
        }
    }
}

impl fmt::Display for QueryTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

impl From<Classification> for QueryTag {
    fn from(classification: Classification) -> Self {
        match classification {
            Classification::DataQuestion => QueryTag::DataQuestion,
            Classification::GeneralQuestion => QueryTag::GeneralQuestion,
            Classification::OutOfScope => QueryTag::OutOfScope,
        }
    }
}

/// What happened along the way, for logs, `--show-sql` and tests.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineTrace {
    pub request_id: Uuid,
    pub classification: Option<Classification>,
    pub plan: Option<RelevancePlan>,
    pub explanation: Option<String>,
    pub attempts: Vec<QueryAttempt>,
    pub verdict: Option<ValidationVerdict>,
    pub recomposed: bool,
}

impl PipelineTrace {
    fn new(request_id: Uuid) -> Self {
        Self {
            request_id,
            classification: None,
            plan: None,
            explanation: None,
            attempts: Vec::new(),
            verdict: None,
            recomposed: false,
        }
    }

    /// Statement of the last execution attempt.
    pub fn final_sql(&self) -> Option<&str> {
        self.attempts.last().map(|a| a.statement.as_str())
    }

    pub fn final_attempt_index(&self) -> Option<usize> {
        self.attempts.last().map(|a| a.attempt_index)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineResponse {
    pub answer: String,
    pub rows: Option<QueryResult>,
    pub tag: QueryTag,
    pub trace: PipelineTrace,
}

impl PipelineResponse {
    /// `(answer text, rows or none, classification tag)`
    pub fn into_tuple(self) -> (String, Option<QueryResult>, String) {
        (self.answer, self.rows, self.tag.label().to_string())
    }
}

pub struct QueryPipeline {
    oracle: Arc<dyn TextOracle>,
    store: Arc<dyn DataStore>,
    triage: TriageClassifier,
    analyzer: SchemaRelevanceAnalyzer,
    synthesizer: QuerySynthesizer,
    execution: ExecutionLoop,
    composer: AnswerComposer,
    validator: AnswerValidator,
    deadline: Duration,
}

impl QueryPipeline {
    pub fn new(
        oracle: Arc<dyn TextOracle>,
        store: Arc<dyn DataStore>,
        catalog: Arc<SchemaCatalog>,
        config: &AssistantConfig,
    ) -> Self {
        Self {
            triage: TriageClassifier::new(Arc::clone(&oracle), Arc::clone(&catalog)),
            analyzer: SchemaRelevanceAnalyzer::new(Arc::clone(&oracle), Arc::clone(&catalog)),
            synthesizer: QuerySynthesizer::new(Arc::clone(&oracle), Arc::clone(&catalog), store.dialect()),
            execution: ExecutionLoop::new(config.max_attempts, config.empty_result_policy, config.store_timeout),
            composer: AnswerComposer::new(Arc::clone(&oracle), config.answer_sample_rows),
            validator: AnswerValidator::new(Arc::clone(&oracle)),
            deadline: config.pipeline_deadline,
            oracle,
            store,
        }
    }

    /// Wire the HTTP oracle, the configured store and catalog.
    pub fn from_config(config: &AssistantConfig) -> Result<Self> {
        let oracle: Arc<dyn TextOracle> = Arc::new(LlmClient::from_config(config)?);
        let store = connect_store(config.require_database_url()?, config.store_timeout)?;
        let catalog = Arc::new(SchemaCatalog::load_or_builtin(config.catalog_path.as_deref())?);
        info!(
            "Pipeline ready: store={}, dialect={}, {} catalog tables",
            store.name(),
            store.dialect(),
            catalog.tables().len()
        );
        Ok(Self::new(oracle, store, catalog, config))
    }

    pub async fn process_query(&self, question: &str) -> PipelineResponse {
        let request_id = Uuid::new_v4();
        let span = info_span!("process_query", request_id = %request_id);
        let deadline = Deadline::after(self.deadline);
        let mut trace = PipelineTrace::new(request_id);

        let outcome = self
            .resolve(question, &deadline, &mut trace)
            .instrument(span)
            .await;

        match outcome {
            Ok((answer, rows, tag)) => PipelineResponse { answer, rows, tag, trace },
            Err(e) => {
                error!(request_id = %request_id, "Error in query processing: {}", e);
                PipelineResponse {
                    answer: format!("Error processing query: {}", e),
                    rows: None,
                    tag: QueryTag::Error,
                    trace,
                }
            }
        }
    }

    async fn resolve(
        &self,
        question: &str,
        deadline: &Deadline,
        trace: &mut PipelineTrace,
    ) -> Result<(String, Option<QueryResult>, QueryTag)> {
        info!("Processing question: {}", question);

        let classification = deadline.run("triage", self.triage.classify(question)).await?;
        trace.classification = Some(classification);

        match classification {
            Classification::GeneralQuestion => {
                let answer = deadline
                    .run("general response", self.oracle.complete(&general_prompt(question)))
                    .await?;
                return Ok((answer, None, QueryTag::GeneralQuestion));
            }
            Classification::OutOfScope => {
                return Ok((OUT_OF_SCOPE_MESSAGE.to_string(), None, QueryTag::OutOfScope));
            }
            Classification::DataQuestion => {}
        }

        let plan = deadline.run("schema analysis", self.analyzer.analyze(question)).await?;
        if !plan.is_answerable {
            let answer = format!(
                "This question cannot be answered using the available data: {}",
                plan.refusal_reason()
            );
            trace.plan = Some(plan);
            return Ok((answer, None, QueryTag::OutOfScope));
        }

        let query = deadline
            .run("query synthesis", self.synthesizer.synthesize(question, &plan))
            .await?;
        trace.plan = Some(plan);
        trace.explanation = Some(query.explanation.clone());

        let outcome = self
            .execution
            .execute_with_retry(&query.statement, question, &self.synthesizer, self.store.as_ref(), deadline)
            .await?;
        trace.attempts = outcome.attempts.clone();

        if !outcome.success {
            return Ok((format!("Failed to execute query: {}", outcome.message), None, QueryTag::Error));
        }

        let rows = match outcome.rows {
            Some(rows) if !rows.is_empty() => rows,
            _ => return Ok((NO_DATA_MESSAGE.to_string(), None, QueryTag::DataQuestion)),
        };

        let mut answer = deadline
            .run("answer composition", self.composer.compose(&rows, question))
            .await?;
        let verdict = deadline
            .run("answer validation", self.validator.validate(question, &answer.text))
            .await?;

        if let Some(fix) = verdict.correction() {
            info!("Generating improved response");
            let augmented = format!("{} {}", question, fix);
            answer = deadline
                .run("answer recomposition", self.composer.compose(&rows, &augmented))
                .await?;
            trace.recomposed = true;
        }
        trace.verdict = Some(verdict);

        Ok((answer.text, Some(rows), QueryTag::DataQuestion))
    }
}

fn general_prompt(question: &str) -> String {
    format!(
        "You are a CRM expert. Generate a helpful response to this general CRM question.\n\
         Focus on best practices and industry knowledge. Keep the response concise and practical.\n\n\
         Question: {}",
        question
    )
}
