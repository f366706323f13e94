//! Error Recovery
//!
//! Builds repair prompts from a failed statement, its error and its classification.

use crate::catalog::SchemaCatalog;
use crate::execution::SqlDialect;
use crate::execution_loop::error_classifier::{ErrorClassifier, SqlErrorClass};
use std::sync::Arc;

/// Repair prompt builder
pub struct ErrorRecovery {
    catalog: Arc<SchemaCatalog>,
    dialect: SqlDialect,
    classifier: ErrorClassifier,
}

impl ErrorRecovery {
    pub fn new(catalog: Arc<SchemaCatalog>, dialect: SqlDialect) -> Self {
        Self {
            catalog,
            dialect,
            classifier: ErrorClassifier::new(),
        }
    }

    /// Build the prompt asking for a corrected statement. The previous statement
    /// and the error text are embedded verbatim.
    pub fn build_repair_prompt(
        &self,
        previous_statement: &str,
        error_message: &str,
        question: &str,
        error_class: SqlErrorClass,
    ) -> String {
        let mut prompt_parts = Vec::new();

        prompt_parts.push(format!(
            "You are an expert SQL query generator for a CRM database. Given a user question, create a syntactically correct {} query.",
            self.dialect
        ));
        prompt_parts.push(String::new());
        prompt_parts.push("IMPORTANT RULES:".to_string());
        prompt_parts.push("1. NEVER use INSERT, UPDATE, DELETE, or DROP statements".to_string());
        prompt_parts.push(format!(
            "2. Unless specified, limit results to 100 records ({})",
            self.dialect.row_cap_hint(100)
        ));
        prompt_parts.push("3. Only select relevant columns that answer the question".to_string());
        prompt_parts.push("4. Always use proper table aliases (e.g., 'o' for opportunity, 'dr' for dropout_reason)".to_string());
        prompt_parts.push("5. Order results by relevant columns to show most important data first".to_string());
        prompt_parts.push(String::new());
        prompt_parts.push("ID FIELD HANDLING:".to_string());
        prompt_parts.push(
            "For any ID fields, always remove curly braces using: REPLACE(REPLACE(field_name, '{', ''), '}', '')"
                .to_string(),
        );
        prompt_parts.push(format!(
            "ID fields to clean: {}",
            self.catalog.identifier_columns().into_iter().collect::<Vec<_>>().join(", ")
        ));
        prompt_parts.push(String::new());
        prompt_parts.push(format!("Previous Query: {}", previous_statement));
        prompt_parts.push(format!("Error Message: {}", error_message));

        let hints = self.hints(error_message, error_class);
        if !hints.is_empty() {
            prompt_parts.push(String::new());
            prompt_parts.push(format!("ERROR ANALYSIS ({}):", error_class));
            prompt_parts.extend(hints);
        }

        prompt_parts.push(String::new());
        prompt_parts.push("Database Schema:".to_string());
        prompt_parts.push(self.catalog.describe());
        prompt_parts.push(format!("User Question: {}", question));
        prompt_parts.push(String::new());
        prompt_parts.push(format!(
            "Generate only the SQL query without any explanation or markdown. The query should be valid {} syntax.",
            self.dialect
        ));

        prompt_parts.join("\n")
    }

    fn hints(&self, error_message: &str, error_class: SqlErrorClass) -> Vec<String> {
        let mut hints = Vec::new();
        match error_class {
            SqlErrorClass::ColumnNotFound => {
                hints.push("A column referenced in the previous query does not exist.".to_string());
                if let Some(column) = self.classifier.missing_column(error_message) {
                    let suggestions = self.catalog.suggest_columns(&column, 3);
                    if !suggestions.is_empty() {
                        hints.push(format!(
                            "Closest catalog columns to '{}': {}",
                            column,
                            suggestions.join(", ")
                        ));
                    }
                    if let Some((qualifier, _)) = column.rsplit_once('.') {
                        if let Some(columns) = self.catalog.column_names(qualifier) {
                            hints.push(format!("Columns of {}: {}", qualifier, columns.join(", ")));
                        }
                    }
                }
                hints.push("Use only column names listed in the schema below.".to_string());
            }
            SqlErrorClass::TableNotFound => {
                hints.push("A table referenced in the previous query does not exist.".to_string());
                hints.push(format!("Available tables: {}", self.catalog.table_names().join(", ")));
            }
            SqlErrorClass::AmbiguousColumn => {
                hints.push("A column reference is ambiguous (exists in multiple tables).".to_string());
                hints.push("Qualify every column with its table alias.".to_string());
            }
            SqlErrorClass::SyntaxError => {
                hints.push(format!("The previous query is not valid {} syntax.", self.dialect));
            }
            SqlErrorClass::InvalidAggregation => {
                hints.push("Every non-aggregated selected column must appear in GROUP BY.".to_string());
            }
            SqlErrorClass::DivisionByZero => {
                hints.push("Guard denominators: CAST(numerator AS FLOAT) / NULLIF(denominator, 0).".to_string());
            }
            SqlErrorClass::Timeout => {
                hints.push("The previous query took too long. Narrow the filters or aggregate earlier.".to_string());
            }
            SqlErrorClass::EmptyResult => {
                hints.push("The previous query returned no rows. Check filter values, ID formatting and join conditions.".to_string());
            }
            SqlErrorClass::UnsafeStatement => {
                hints.push("Only a single read-only SELECT statement is allowed.".to_string());
            }
            SqlErrorClass::Other => {}
        }
        hints
    }
}
