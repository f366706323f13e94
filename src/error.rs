use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    /// Oracle output that could not be parsed as structured data. The raw
    /// payload is kept for diagnostics but never rendered in the message.
    #[error("Malformed oracle output: {reason}")]
    MalformedOracleOutput { reason: String, raw: String },

    #[error("Classification error: {0}")]
    Classification(String),

    #[error("Schema analysis error: {0}")]
    SchemaAnalysis(String),

    #[error("SQL synthesis error: {0}")]
    Synthesis(String),

    #[error("Answer composition error: {0}")]
    Composition(String),

    #[error("Answer validation error: {0}")]
    Validation(String),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Query returned no rows")]
    EmptyResult,

    #[error("Failed after {attempts} attempts. Last error: {last_error}")]
    RetryExhausted { attempts: usize, last_error: String },

    #[error("Unsafe statement: {0}")]
    UnsafeStatement(String),

    #[error("LLM error: {0}")]
    Oracle(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Catalog error: {0}")]
    Catalog(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Deadline exceeded during {0}")]
    DeadlineExceeded(String),

    #[error("Transcript error: {0}")]
    Transcript(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PipelineError {
    pub fn malformed(reason: impl Into<String>, raw: impl Into<String>) -> Self {
        PipelineError::MalformedOracleOutput {
            reason: reason.into(),
            raw: raw.into(),
        }
    }

    /// Failures the execution-repair loop feeds back into a repair cycle.
    pub fn is_repairable(&self) -> bool {
        matches!(
            self,
            PipelineError::Execution(_)
                | PipelineError::Database(_)
                | PipelineError::EmptyResult
                | PipelineError::UnsafeStatement(_)
        )
    }
}

impl From<sqlx::Error> for PipelineError {
    fn from(err: sqlx::Error) -> Self {
        PipelineError::Database(err.to_string())
    }
}

impl From<rusqlite::Error> for PipelineError {
    fn from(err: rusqlite::Error) -> Self {
        PipelineError::Database(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
