//! Schema Relevance Analyzer
//!
//! Decides whether a data question is answerable from the catalog and, if so,
//! which tables, fields, joins and filters the query will need.

use crate::catalog::SchemaCatalog;
use crate::error::{PipelineError, Result};
use crate::llm::TextOracle;
use crate::normalizer;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelevantTable {
    pub table_name: String,
    #[serde(default)]
    pub fields: BTreeSet<String>,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelevancePlan {
    pub is_answerable: bool,
    #[serde(default)]
    pub out_of_scope_reason: Option<String>,
    #[serde(default)]
    pub relevant_tables: Vec<RelevantTable>,
    #[serde(default)]
    pub relationships: Vec<String>,
    #[serde(default)]
    pub conditions: Vec<String>,
}

impl RelevancePlan {
    pub fn table_names(&self) -> Vec<&str> {
        self.relevant_tables.iter().map(|t| t.table_name.as_str()).collect()
    }

    /// Reason shown to the user when the plan is not answerable.
    pub fn refusal_reason(&self) -> &str {
        self.out_of_scope_reason
            .as_deref()
            .filter(|r| !r.trim().is_empty())
            .unwrap_or("no reason given")
    }
}

pub struct SchemaRelevanceAnalyzer {
    oracle: Arc<dyn TextOracle>,
    catalog: Arc<SchemaCatalog>,
}

impl SchemaRelevanceAnalyzer {
    pub fn new(oracle: Arc<dyn TextOracle>, catalog: Arc<SchemaCatalog>) -> Self {
        Self { oracle, catalog }
    }

    pub fn build_prompt(&self, question: &str) -> String {
        format!(
            r#"You are a database expert. Analyze if the question can be answered using the available tables and fields.
Available Schema:
{schema}

Question: {question}

You must return a JSON response with EXACTLY this structure:
{{
    "isAnswerable": true or false,
    "outOfScopeReason": "Reason if not answerable, null if answerable",
    "relevantTables": [
        {{
            "tableName": "Full table name including schema",
            "fields": ["field1", "field2"],
            "reason": "Why this table is needed"
        }}
    ],
    "relationships": ["table1.field1 -> table2.field2"],
    "conditions": ["Any WHERE conditions needed"]
}}

Example response for "Show dropped out opportunities":
{{
    "isAnswerable": true,
    "outOfScopeReason": null,
    "relevantTables": [
        {{
            "tableName": "crm.opportunity",
            "fields": ["opportunityid", "new_dropoutreason", "customerneed"],
            "reason": "Contains dropout information and use cases"
        }}
    ],
    "relationships": [],
    "conditions": ["new_dropoutreason IS NOT NULL"]
}}"#,
            schema = self.catalog.describe(),
            question = question
        )
    }

    pub async fn analyze(&self, question: &str) -> Result<RelevancePlan> {
        let raw = self.oracle.complete(&self.build_prompt(question)).await?;
        debug!("Schema analysis response: {}", raw);

        let plan = parse_plan(&raw)?;
        for table in &plan.relevant_tables {
            if self.catalog.find_table(&table.table_name).is_none() {
                warn!("Schema analysis referenced unknown table '{}'", table.table_name);
            }
        }

        info!(
            "Schema analysis: answerable={}, tables=[{}]",
            plan.is_answerable,
            plan.table_names().join(", ")
        );
        Ok(plan)
    }
}

fn parse_plan(raw: &str) -> Result<RelevancePlan> {
    let mut value = normalizer::normalize(raw)?;

    let is_answerable = normalizer::required_bool(&value, "isAnswerable").ok_or_else(|| {
        PipelineError::SchemaAnalysis("Schema analysis response missing 'isAnswerable' field".to_string())
    })?;

    // Normalise tolerated shapes before the typed decode.
    if let Some(obj) = value.as_object_mut() {
        obj.insert("isAnswerable".to_string(), Value::Bool(is_answerable));
        for key in ["relevantTables", "relationships", "conditions"] {
            if obj.get(key).map(Value::is_null).unwrap_or(false) {
                obj.remove(key);
            }
        }
    }

    serde_json::from_value(value)
        .map_err(|e| PipelineError::SchemaAnalysis(format!("Invalid schema analysis response: {}", e)))
}
