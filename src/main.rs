use crm_insight::catalog::SchemaCatalog;
use crm_insight::config::AssistantConfig;
use crm_insight::execution_loop::EmptyResultPolicy;
use crm_insight::llm::{LlmClient, TextOracle};
use crm_insight::pipeline::{PipelineResponse, QueryPipeline};
use crm_insight::transcript::{
    AnalysisKind, TextFileTranscriber, TranscriptAnalyzer, TranscriptCache, TranscriptionOptions,
};

use anyhow::{Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "crm-insight")]
#[command(about = "Ask questions about CRM data in plain language")]
#[command(version)]
struct Args {
    #[command(flatten)]
    overrides: Overrides,

    #[command(subcommand)]
    command: Commands,
}

/// Settings that take precedence over the environment.
#[derive(ClapArgs)]
struct Overrides {
    /// Database URL (or set DATABASE_URL)
    #[arg(long, global = true)]
    database_url: Option<String>,

    /// Completion model (or set OPENAI_MODEL)
    #[arg(long, global = true)]
    model: Option<String>,

    /// Catalog file (or set CRM_CATALOG_PATH)
    #[arg(long, global = true)]
    catalog: Option<PathBuf>,

    /// Retry ceiling for query execution (or set QUERY_MAX_ATTEMPTS)
    #[arg(long, global = true)]
    max_attempts: Option<usize>,

    /// Accept empty results instead of repairing the query
    #[arg(long, global = true)]
    accept_empty: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Answer one question
    Ask {
        /// The question in natural language
        question: String,

        /// Write the result rows to a CSV file
        #[arg(long)]
        csv: Option<PathBuf>,

        /// Print the executed SQL and the attempt chain
        #[arg(long)]
        show_sql: bool,
    },
    /// Interactive question loop
    Repl {
        /// Print the executed SQL for each answer
        #[arg(long)]
        show_sql: bool,
    },
    /// Validate and print the schema catalog
    Catalog {
        /// Catalog file to check instead of the configured one
        #[arg(long)]
        path: Option<PathBuf>,
    },
    /// Analyze a call transcript
    AnalyzeCall {
        /// Transcript file (speaker-labelled utterances separated by blank lines)
        transcript: PathBuf,

        /// summary, objections, customer_sentiments, follow_up_tasks or use_cases
        #[arg(long, default_value = "summary")]
        kind: AnalysisKind,

        /// Treat the transcript as running text without speaker labels
        #[arg(long)]
        no_speaker_labels: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config = load_config(&args.overrides)?;

    match args.command {
        Commands::Ask { question, csv, show_sql } => ask(&config, &question, csv, show_sql).await,
        Commands::Repl { show_sql } => repl(&config, show_sql).await,
        Commands::Catalog { path } => print_catalog(path.or_else(|| config.catalog_path.clone())),
        Commands::AnalyzeCall { transcript, kind, no_speaker_labels } => {
            analyze_call(&config, transcript, kind, no_speaker_labels).await
        }
    }
}

fn load_config(overrides: &Overrides) -> Result<AssistantConfig> {
    let mut config = AssistantConfig::from_env().context("Failed to read configuration")?;
    if let Some(url) = &overrides.database_url {
        config.database_url = Some(url.clone());
    }
    if let Some(model) = &overrides.model {
        config.model = model.clone();
    }
    if let Some(path) = &overrides.catalog {
        config.catalog_path = Some(path.clone());
    }
    if let Some(max_attempts) = overrides.max_attempts {
        anyhow::ensure!(max_attempts > 0, "--max-attempts must be at least 1");
        config.max_attempts = max_attempts;
    }
    if overrides.accept_empty {
        config.empty_result_policy = EmptyResultPolicy::Accept;
    }
    Ok(config)
}

async fn ask(config: &AssistantConfig, question: &str, csv: Option<PathBuf>, show_sql: bool) -> Result<()> {
    let pipeline = QueryPipeline::from_config(config)?;
    let response = pipeline.process_query(question).await;
    print_response(&response, show_sql);

    if let (Some(path), Some(rows)) = (csv, response.rows.as_ref()) {
        std::fs::write(&path, rows.to_csv()?)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        println!("\nWrote {} rows to {}", rows.row_count(), path.display());
    }
    Ok(())
}

async fn repl(config: &AssistantConfig, show_sql: bool) -> Result<()> {
    let pipeline = QueryPipeline::from_config(config)?;
    println!("CRM insight assistant. Type a question, or 'exit' to quit.");

    let stdin = io::stdin();
    loop {
        print!("\n> ");
        io::stdout().flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let question = line.trim();
        if question.is_empty() {
            continue;
        }
        if question.eq_ignore_ascii_case("exit") || question.eq_ignore_ascii_case("quit") {
            break;
        }

        let response = pipeline.process_query(question).await;
        print_response(&response, show_sql);
    }
    Ok(())
}

fn print_response(response: &PipelineResponse, show_sql: bool) {
    println!("\n[{}]", response.tag);
    println!("{}", response.answer);

    if show_sql {
        for attempt in &response.trace.attempts {
            println!("\n-- attempt {}", attempt.attempt_index + 1);
            println!("{}", attempt.statement);
            if let Some(failure) = &attempt.failure {
                println!("-- failed: {}", failure);
            }
        }
        if let Some(explanation) = response.trace.explanation.as_deref().filter(|e| !e.is_empty()) {
            println!("\n-- {}", explanation);
        }
    }

    if let Some(rows) = &response.rows {
        println!("\n{}", rows.render_table(20));
    }
}

fn print_catalog(path: Option<PathBuf>) -> Result<()> {
    let catalog = SchemaCatalog::load_or_builtin(path.as_deref())?;
    println!("{}", catalog.describe());
    println!("{} tables, catalog is valid", catalog.tables().len());
    Ok(())
}

async fn analyze_call(
    config: &AssistantConfig,
    transcript: PathBuf,
    kind: AnalysisKind,
    no_speaker_labels: bool,
) -> Result<()> {
    let options = if no_speaker_labels {
        TranscriptionOptions::plain()
    } else {
        TranscriptionOptions::default()
    };
    let source = transcript.to_string_lossy().to_string();

    let cache = TranscriptCache::new();
    let text = cache
        .get_or_transcribe(&TextFileTranscriber, &source, options)
        .await?;

    let oracle: Arc<dyn TextOracle> = Arc::new(LlmClient::from_config(config)?);
    info!("Running {} analysis on {}", kind, source);
    let analysis = TranscriptAnalyzer::new(oracle).analyze(&text, kind).await?;

    println!("\n=== {} ===\n", kind);
    println!("{}", analysis);
    Ok(())
}
