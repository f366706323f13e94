//! Assistant Configuration
//!
//! Runtime settings read from the environment (and an optional `.env` file).

use crate::error::{PipelineError, Result};
use crate::execution_loop::EmptyResultPolicy;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_MODEL: &str = "gpt-4";
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Debug, Clone)]
pub struct AssistantConfig {
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: String,
    pub database_url: Option<String>,
    pub catalog_path: Option<PathBuf>,
    pub max_attempts: usize,
    pub empty_result_policy: EmptyResultPolicy,
    pub answer_sample_rows: usize,
    pub oracle_timeout: Duration,
    pub store_timeout: Duration,
    pub pipeline_deadline: Duration,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            database_url: None,
            catalog_path: None,
            max_attempts: 3,
            empty_result_policy: EmptyResultPolicy::Retry,
            answer_sample_rows: 20,
            oracle_timeout: Duration::from_secs(60),
            store_timeout: Duration::from_secs(30),
            pipeline_deadline: Duration::from_secs(180),
        }
    }
}

impl AssistantConfig {
    /// Load `.env` (if present) and read settings from the process environment.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup. Unset keys keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let max_attempts = parse_or(get("QUERY_MAX_ATTEMPTS"), "QUERY_MAX_ATTEMPTS", defaults.max_attempts)?;
        if max_attempts == 0 {
            return Err(PipelineError::Config(
                "QUERY_MAX_ATTEMPTS must be at least 1".to_string(),
            ));
        }

        let retry_on_empty = parse_or(get("QUERY_RETRY_ON_EMPTY"), "QUERY_RETRY_ON_EMPTY", true)?;

        Ok(Self {
            api_key: get("OPENAI_API_KEY"),
            model: get("OPENAI_MODEL").unwrap_or(defaults.model),
            base_url: get("OPENAI_BASE_URL").unwrap_or(defaults.base_url),
            database_url: get("DATABASE_URL"),
            catalog_path: get("CRM_CATALOG_PATH").map(PathBuf::from),
            max_attempts,
            empty_result_policy: if retry_on_empty {
                EmptyResultPolicy::Retry
            } else {
                EmptyResultPolicy::Accept
            },
            answer_sample_rows: parse_or(get("ANSWER_SAMPLE_ROWS"), "ANSWER_SAMPLE_ROWS", defaults.answer_sample_rows)?,
            oracle_timeout: secs_or(get("ORACLE_TIMEOUT_SECS"), "ORACLE_TIMEOUT_SECS", defaults.oracle_timeout)?,
            store_timeout: secs_or(get("STORE_TIMEOUT_SECS"), "STORE_TIMEOUT_SECS", defaults.store_timeout)?,
            pipeline_deadline: secs_or(get("PIPELINE_DEADLINE_SECS"), "PIPELINE_DEADLINE_SECS", defaults.pipeline_deadline)?,
        })
    }

    pub fn require_api_key(&self) -> Result<&str> {
        self.api_key
            .as_deref()
            .ok_or_else(|| PipelineError::Config("OPENAI_API_KEY is not set".to_string()))
    }

    pub fn require_database_url(&self) -> Result<&str> {
        self.database_url
            .as_deref()
            .ok_or_else(|| PipelineError::Config("DATABASE_URL is not set".to_string()))
    }
}

fn parse_or<T: FromStr>(raw: Option<String>, key: &str, default: T) -> Result<T> {
    match raw {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| PipelineError::Config(format!("{} has invalid value '{}'", key, value))),
    }
}

fn secs_or(raw: Option<String>, key: &str, default: Duration) -> Result<Duration> {
    let secs: u64 = parse_or(raw, key, default.as_secs())?;
    Ok(Duration::from_secs(secs))
}
