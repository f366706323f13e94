pub mod catalog;
pub mod composer;
pub mod config;
pub mod deadline;
pub mod error;
pub mod execution;
pub mod execution_loop;
pub mod llm;
pub mod normalizer;
pub mod pipeline;
pub mod relevance;
pub mod synthesis;
pub mod transcript;
pub mod triage;
pub mod validator;

pub use catalog::SchemaCatalog;
pub use config::AssistantConfig;
pub use error::{PipelineError, Result};
pub use execution::{DataStore, QueryResult};
pub use llm::{LlmClient, TextOracle};
pub use pipeline::{PipelineResponse, QueryPipeline, QueryTag};
