//! Request Deadline
//!
//! Wall-clock budget threaded through every stage of one pipeline run.

use crate::error::{PipelineError, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    expires_at: Option<Instant>,
}

impl Deadline {
    /// A budget too large to represent as an instant is treated as unbounded.
    pub fn after(budget: Duration) -> Self {
        Self {
            expires_at: Instant::now().checked_add(budget),
        }
    }

    pub fn unbounded() -> Self {
        Self { expires_at: None }
    }

    pub fn remaining(&self) -> Option<Duration> {
        self.expires_at.map(|at| at.saturating_duration_since(Instant::now()))
    }

    pub fn is_expired(&self) -> bool {
        self.remaining().map(|r| r.is_zero()).unwrap_or(false)
    }

    /// Run `fut`, failing with `DeadlineExceeded` once the budget is spent.
    pub async fn run<F, T>(&self, stage: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match self.expires_at {
            None => fut.await,
            Some(at) => {
                if Instant::now() >= at {
                    return Err(PipelineError::DeadlineExceeded(stage.to_string()));
                }
                tokio::time::timeout_at(at, fut)
                    .await
                    .map_err(|_| PipelineError::DeadlineExceeded(stage.to_string()))?
            }
        }
    }
}
