//! Execution Loop
//!
//! Bounded execute-and-repair loop. A failed attempt (store error, unsafe
//! statement, or an empty result under the retry policy) is handed back to the
//! synthesizer together with its error text until the attempt ceiling is hit.

use crate::deadline::Deadline;
use crate::error::{PipelineError, Result};
use crate::execution::{ensure_read_only, DataStore, QueryResult};
use crate::execution_loop::error_classifier::ErrorClassifier;
use crate::synthesis::QuerySynthesizer;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{info, warn};

/// What to do with a statement that runs cleanly but returns no rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EmptyResultPolicy {
    /// Treat zero rows as a failure and repair the statement.
    #[default]
    Retry,
    /// Zero rows is a valid answer.
    Accept,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueryAttempt {
    pub statement: String,
    pub attempt_index: usize,
    /// Failure of the previous attempt that prompted this statement.
    pub originating_error: Option<String>,
    /// Failure of this attempt, if it failed.
    pub failure: Option<String>,
    pub started_at: DateTime<Utc>,
}

impl QueryAttempt {
    fn new(statement: String, attempt_index: usize, originating_error: Option<String>) -> Self {
        Self {
            statement,
            attempt_index,
            originating_error,
            failure: None,
            started_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutionOutcome {
    pub success: bool,
    pub rows: Option<QueryResult>,
    pub message: String,
    pub attempts: Vec<QueryAttempt>,
}

impl ExecutionOutcome {
    fn succeeded(rows: QueryResult, attempts: Vec<QueryAttempt>) -> Self {
        Self {
            success: true,
            rows: Some(rows),
            message: "Success".to_string(),
            attempts,
        }
    }

    fn failed(message: String, attempts: Vec<QueryAttempt>) -> Self {
        Self {
            success: false,
            rows: None,
            message,
            attempts,
        }
    }

    pub fn final_attempt(&self) -> Option<&QueryAttempt> {
        self.attempts.last()
    }

    pub fn final_attempt_index(&self) -> Option<usize> {
        self.final_attempt().map(|a| a.attempt_index)
    }

    pub fn final_statement(&self) -> Option<&str> {
        self.final_attempt().map(|a| a.statement.as_str())
    }
}

/// Execution loop with bounded retries
pub struct ExecutionLoop {
    max_attempts: usize,
    empty_policy: EmptyResultPolicy,
    statement_timeout: Duration,
    error_classifier: ErrorClassifier,
}

impl ExecutionLoop {
    pub fn new(max_attempts: usize, empty_policy: EmptyResultPolicy, statement_timeout: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            empty_policy,
            statement_timeout,
            error_classifier: ErrorClassifier::new(),
        }
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    /// Execute `initial_statement`, repairing it on failure.
    ///
    /// Exhausting the attempt ceiling is an unsuccessful outcome, not an error.
    /// Errors are reserved for faults outside the repair protocol: the repair
    /// oracle failing, or the request deadline expiring.
    pub async fn execute_with_retry(
        &self,
        initial_statement: &str,
        question: &str,
        synthesizer: &QuerySynthesizer,
        store: &dyn DataStore,
        deadline: &Deadline,
    ) -> Result<ExecutionOutcome> {
        let mut statement = initial_statement.to_string();
        let mut originating_error: Option<String> = None;
        let mut attempts: Vec<QueryAttempt> = Vec::new();
        let mut last_error = String::new();

        for attempt_index in 0..self.max_attempts {
            info!("Execution attempt {} of {}", attempt_index + 1, self.max_attempts);
            info!("Executing query: {}", statement);

            let mut attempt = QueryAttempt::new(statement.clone(), attempt_index, originating_error.take());

            match self.run_attempt(&statement, store, deadline).await {
                Ok(rows) => {
                    info!("Query succeeded with {} rows on attempt {}", rows.row_count(), attempt_index + 1);
                    attempts.push(attempt);
                    return Ok(ExecutionOutcome::succeeded(rows, attempts));
                }
                Err(e) if e.is_repairable() => {
                    let message = error_text(&e);
                    warn!("Attempt {} failed: {}", attempt_index + 1, message);
                    attempt.failure = Some(message.clone());
                    attempts.push(attempt);
                    last_error = message.clone();

                    if attempt_index + 1 >= self.max_attempts {
                        break;
                    }

                    let error_class = self.error_classifier.classify(&e);
                    info!("Generating alternative query ({})", error_class);
                    statement = deadline
                        .run(
                            "query repair",
                            synthesizer.repair(&statement, &message, error_class, question),
                        )
                        .await?;
                    originating_error = Some(message);
                }
                Err(e) => return Err(e),
            }
        }

        let exhausted = PipelineError::RetryExhausted {
            attempts: attempts.len(),
            last_error,
        };
        warn!("{}", exhausted);
        Ok(ExecutionOutcome::failed(exhausted.to_string(), attempts))
    }

    async fn run_attempt(
        &self,
        statement: &str,
        store: &dyn DataStore,
        deadline: &Deadline,
    ) -> Result<QueryResult> {
        ensure_read_only(statement, store.dialect())?;

        let timeout = self.statement_timeout;
        let result = deadline
            .run("query execution", async {
                tokio::time::timeout(timeout, store.execute(statement))
                    .await
                    .map_err(|_| {
                        PipelineError::Execution(format!(
                            "Statement timed out after {}s",
                            timeout.as_secs_f64()
                        ))
                    })?
            })
            .await?;

        if result.is_empty() && self.empty_policy == EmptyResultPolicy::Retry {
            return Err(PipelineError::EmptyResult);
        }
        Ok(result)
    }
}

/// Error text as the store reported it, without our own variant prefix.
fn error_text(error: &PipelineError) -> String {
    match error {
        PipelineError::Execution(message) | PipelineError::Database(message) => message.clone(),
        other => other.to_string(),
    }
}
