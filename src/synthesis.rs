//! Query Synthesizer
//!
//! Turns a relevance plan and the question into one SQL statement, and
//! produces corrected statements for the execution-repair loop.

use crate::catalog::SchemaCatalog;
use crate::error::{PipelineError, Result};
use crate::execution::SqlDialect;
use crate::execution_loop::{ErrorRecovery, SqlErrorClass};
use crate::llm::TextOracle;
use crate::normalizer;
use crate::relevance::RelevancePlan;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesizedQuery {
    pub statement: String,
    /// Oracle's own description of the statement; kept for logs and traces only.
    pub explanation: String,
}

pub struct QuerySynthesizer {
    oracle: Arc<dyn TextOracle>,
    catalog: Arc<SchemaCatalog>,
    dialect: SqlDialect,
    recovery: ErrorRecovery,
}

impl QuerySynthesizer {
    pub fn new(oracle: Arc<dyn TextOracle>, catalog: Arc<SchemaCatalog>, dialect: SqlDialect) -> Self {
        let recovery = ErrorRecovery::new(Arc::clone(&catalog), dialect);
        Self {
            oracle,
            catalog,
            dialect,
            recovery,
        }
    }

    pub fn dialect(&self) -> SqlDialect {
        self.dialect
    }

    pub fn build_prompt(&self, question: &str, plan: &RelevancePlan) -> Result<String> {
        let plan_json = serde_json::to_string_pretty(plan)?;
        let id_fields = self
            .catalog
            .identifier_columns()
            .into_iter()
            .collect::<Vec<_>>()
            .join(", ");
        let lead = qualified(&self.catalog, "lead");
        let owner = qualified(&self.catalog, "owner");

        Ok(format!(
            r#"You are an expert SQL query generator for a CRM database. Given a user question, create a syntactically correct {dialect} query.

IMPORTANT RULES:
1. NEVER use INSERT, UPDATE, DELETE, or DROP statements. Produce exactly one SELECT statement.
2. Unless specified, limit results to 100 records ({cap}).
3. For questions about "most" or "top", show ALL records ordered by the metric unless specifically asked for a limit.
4. Only select relevant columns that answer the question.
5. Always use proper table aliases (e.g., 'o' for opportunity, 'dr' for dropout_reason).
6. Order results by relevant columns to show most important data first.

ID FIELD HANDLING:
For any ID fields, always remove curly braces before comparing or displaying them:
   REPLACE(REPLACE(field_name, '{{', ''), '}}', '')
ID fields to clean: {id_fields}

ANALYTICAL QUERIES:
- Use COUNT(DISTINCT ...) for accurate counts
- Calculate ratios as CAST(numerator AS FLOAT) / NULLIF(denominator, 0)
- Include both raw counts and calculated ratios

Example:
For "Which sales rep generated the most leads?", use:
SELECT
    o.fullname AS sales_rep_name,
    COUNT(l.leadid) AS total_leads,
    COUNT(DISTINCT l.leadid) AS unique_leads
FROM {lead} l
JOIN {owner} o
    ON REPLACE(REPLACE(l.createdby, '{{', ''), '}}', '') = REPLACE(REPLACE(o.ownerid, '{{', ''), '}}', '')
GROUP BY o.fullname
ORDER BY total_leads DESC;

Schema Analysis: {plan_json}
Question: {question}

Return ONLY a valid JSON object with this exact structure:
{{
    "query": "YOUR SQL QUERY HERE",
    "explanation": "Brief explanation of the query"
}}"#,
            dialect = self.dialect,
            cap = self.dialect.row_cap_hint(100),
            id_fields = id_fields,
            lead = lead,
            owner = owner,
            plan_json = plan_json,
            question = question
        ))
    }

    pub async fn synthesize(&self, question: &str, plan: &RelevancePlan) -> Result<SynthesizedQuery> {
        let prompt = self.build_prompt(question, plan)?;
        let raw = self.oracle.complete(&prompt).await?;

        let value = normalizer::normalize(&raw)
            .map_err(|e| PipelineError::Synthesis(e.to_string()))?;
        let statement = normalizer::optional_str(&value, "query")
            .map(normalizer::clean_statement)
            .ok_or_else(|| PipelineError::Synthesis("Response missing 'query' field".to_string()))?;
        let explanation = normalizer::optional_str(&value, "explanation")
            .unwrap_or_default()
            .to_string();

        info!("Initial SQL query: {}", statement);
        debug!("Query explanation: {}", explanation);
        Ok(SynthesizedQuery { statement, explanation })
    }

    /// Ask for a corrected statement given the failed one and its error text.
    pub async fn repair(
        &self,
        previous_statement: &str,
        error_message: &str,
        error_class: SqlErrorClass,
        question: &str,
    ) -> Result<String> {
        let prompt = self
            .recovery
            .build_repair_prompt(previous_statement, error_message, question, error_class);
        debug!("Repair prompt:\n{}", prompt);

        let raw = self.oracle.complete(&prompt).await?;
        let statement = normalizer::clean_statement(&raw);
        info!("Alternative SQL query: {}", statement);
        Ok(statement)
    }
}

fn qualified(catalog: &SchemaCatalog, short: &str) -> String {
    catalog
        .find_table(short)
        .map(|t| t.name.clone())
        .unwrap_or_else(|| short.to_string())
}
