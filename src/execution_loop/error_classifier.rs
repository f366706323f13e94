//! Error Classifier
//!
//! Classifies data-store errors into a taxonomy used to pick repair hints.

use crate::error::PipelineError;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

lazy_static! {
    // "no such column: l.createdate", "column \"createdate\" does not exist", "Invalid column name 'x'"
    static ref MISSING_COLUMN: Regex = Regex::new(
        r#"(?i)(?:no such column:\s*|column\s+"?|invalid column name\s+')([A-Za-z0-9_."]+?)"?(?:'|\s|$)"#
    )
    .unwrap();
}

/// SQL error classification taxonomy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SqlErrorClass {
    ColumnNotFound,
    TableNotFound,
    AmbiguousColumn,
    SyntaxError,
    InvalidAggregation,
    DivisionByZero,
    Timeout,
    EmptyResult,
    UnsafeStatement,
    Other,
}

impl fmt::Display for SqlErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlErrorClass::ColumnNotFound => write!(f, "ColumnNotFound"),
            SqlErrorClass::TableNotFound => write!(f, "TableNotFound"),
            SqlErrorClass::AmbiguousColumn => write!(f, "AmbiguousColumn"),
            SqlErrorClass::SyntaxError => write!(f, "SyntaxError"),
            SqlErrorClass::InvalidAggregation => write!(f, "InvalidAggregation"),
            SqlErrorClass::DivisionByZero => write!(f, "DivisionByZero"),
            SqlErrorClass::Timeout => write!(f, "Timeout"),
            SqlErrorClass::EmptyResult => write!(f, "EmptyResult"),
            SqlErrorClass::UnsafeStatement => write!(f, "UnsafeStatement"),
            SqlErrorClass::Other => write!(f, "Other"),
        }
    }
}

/// Error classifier
pub struct ErrorClassifier;

impl ErrorClassifier {
    pub fn new() -> Self {
        Self
    }

    pub fn classify(&self, error: &PipelineError) -> SqlErrorClass {
        match error {
            PipelineError::EmptyResult => SqlErrorClass::EmptyResult,
            PipelineError::UnsafeStatement(_) => SqlErrorClass::UnsafeStatement,
            PipelineError::DeadlineExceeded(_) => SqlErrorClass::Timeout,
            other => self.classify_message(&other.to_string()),
        }
    }

    /// Classify raw error text as reported by the data store.
    pub fn classify_message(&self, message: &str) -> SqlErrorClass {
        let error_msg = message.to_lowercase();

        if error_msg.contains("ambiguous") {
            return SqlErrorClass::AmbiguousColumn;
        }

        if error_msg.contains("no such column")
            || error_msg.contains("invalid column")
            || (error_msg.contains("column") && (error_msg.contains("not found") || error_msg.contains("does not exist")))
        {
            return SqlErrorClass::ColumnNotFound;
        }

        if error_msg.contains("no such table")
            || error_msg.contains("invalid object name")
            || (error_msg.contains("relation") && error_msg.contains("does not exist"))
            || (error_msg.contains("table") && (error_msg.contains("not found") || error_msg.contains("does not exist")))
        {
            return SqlErrorClass::TableNotFound;
        }

        if error_msg.contains("division by zero") || error_msg.contains("divide by zero") {
            return SqlErrorClass::DivisionByZero;
        }

        if error_msg.contains("group by")
            || error_msg.contains("aggregate")
            || error_msg.contains("misuse of aggregate")
        {
            return SqlErrorClass::InvalidAggregation;
        }

        if error_msg.contains("syntax error") || error_msg.contains("incorrect syntax") {
            return SqlErrorClass::SyntaxError;
        }

        if error_msg.contains("timeout")
            || error_msg.contains("timed out")
            || error_msg.contains("canceling statement")
        {
            return SqlErrorClass::Timeout;
        }

        if error_msg.contains("no rows") || error_msg.contains("no results") {
            return SqlErrorClass::EmptyResult;
        }

        SqlErrorClass::Other
    }

    /// Column name the store complained about, if the message names one.
    pub fn missing_column(&self, message: &str) -> Option<String> {
        MISSING_COLUMN
            .captures(message)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim_matches('"').to_string())
            .filter(|name| !name.is_empty())
    }
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new()
    }
}
