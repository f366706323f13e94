use async_trait::async_trait;
use crm_insight::catalog::SchemaCatalog;
use crm_insight::config::AssistantConfig;
use crm_insight::error::{PipelineError, Result};
use crm_insight::execution::SqliteStore;
use crm_insight::execution_loop::EmptyResultPolicy;
use crm_insight::llm::TextOracle;
use crm_insight::pipeline::{QueryPipeline, QueryTag, NO_DATA_MESSAGE, OUT_OF_SCOPE_MESSAGE};
use rusqlite::Connection;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Oracle that replays canned completions in order and records every prompt.
struct ScriptedOracle {
    replies: Mutex<VecDeque<String>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedOracle {
    fn new(replies: &[&str]) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
            prompts: Mutex::new(Vec::new()),
        })
    }

    fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }
}

#[async_trait]
impl TextOracle for ScriptedOracle {
    async fn complete(&self, prompt: &str) -> Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| PipelineError::Oracle("no scripted reply left".to_string()))
    }
}

/// Oracle that never answers in time.
struct StalledOracle;

#[async_trait]
impl TextOracle for StalledOracle {
    async fn complete(&self, _prompt: &str) -> Result<String> {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok(r#"{"queryType": "DATA_QUESTION"}"#.to_string())
    }
}

fn crm_store() -> Arc<SqliteStore> {
    let conn = Connection::open_in_memory().unwrap();
    conn.execute_batch(
        "ATTACH DATABASE ':memory:' AS crm;
         CREATE TABLE crm.owner (ownerid TEXT, fullname TEXT);
         CREATE TABLE crm.lead (leadid TEXT, firstname TEXT, createdby TEXT, createdon TEXT);
         CREATE TABLE crm.opportunity (opportunityid TEXT, name TEXT, ownerid TEXT, actualclosedate TEXT);
         INSERT INTO crm.owner VALUES ('{O1}', 'Dana Reyes'), ('{O2}', 'Sam Ortiz');
         INSERT INTO crm.lead VALUES
            ('{L1}', 'Ada',  '{O1}', '2026-09-03'),
            ('{L2}', 'Bo',   '{O1}', '2026-09-17'),
            ('{L3}', 'Cy',   '{O2}', '2026-09-28'),
            ('{L4}', 'Di',   '{O2}', '2026-08-11');
         INSERT INTO crm.opportunity VALUES ('{P1}', 'Renewal', '{O1}', '2026-09-30');",
    )
    .unwrap();
    Arc::new(SqliteStore::from_connection(conn))
}

fn pipeline_with(oracle: Arc<dyn TextOracle>, config: AssistantConfig) -> QueryPipeline {
    QueryPipeline::new(
        oracle,
        crm_store(),
        Arc::new(SchemaCatalog::builtin().unwrap()),
        &config,
    )
}

fn pipeline(oracle: Arc<ScriptedOracle>) -> QueryPipeline {
    pipeline_with(oracle, AssistantConfig::default())
}

const DATA: &str = r#"{"queryType": "DATA_QUESTION"}"#;

const LEAD_PLAN: &str = r#"```json
{
  "isAnswerable": true,
  "outOfScopeReason": null,
  "relevantTables": [{"tableName": "crm.lead", "fields": ["leadid", "createdon"], "reason": "Lead creation dates"}],
  "relationships": [],
  "conditions": ["createdon within last month"]
}
```"#;

const LEADS_QUESTION: &str = "How many leads were created last month?";

const COUNT_SQL: &str = "SELECT COUNT(DISTINCT REPLACE(REPLACE(l.leadid, '{', ''), '}', '')) AS lead_count \
FROM crm.lead l WHERE l.createdon >= '2026-09-01' AND l.createdon < '2026-10-01'";

fn synthesized(sql: &str) -> String {
    json!({"query": sql, "explanation": "Counts distinct leads created in September"}).to_string()
}

fn composed(question: &str, answer: &str) -> String {
    json!({"user_query": question, "answer": answer}).to_string()
}

const VALID: &str = r#"{"isValid": true, "reason": "States the count", "suggestedFix": null}"#;

#[tokio::test]
async fn out_of_scope_question_gets_fixed_apology() {
    let oracle = ScriptedOracle::new(&[r#"{"queryType": "OUT_OF_SCOPE"}"#]);
    let response = pipeline(oracle.clone()).process_query("What's the weather like?").await;

    assert_eq!(response.tag, QueryTag::OutOfScope);
    assert_eq!(response.answer, OUT_OF_SCOPE_MESSAGE);
    assert!(response.rows.is_none());
    assert_eq!(oracle.calls(), 1);

    let (answer, rows, tag) = response.into_tuple();
    assert!(answer.starts_with("I apologize, but this question is outside the scope of our CRM system."));
    assert!(rows.is_none());
    assert_eq!(tag, "OUT_OF_SCOPE");
}

#[tokio::test]
async fn general_question_is_answered_without_rows() {
    let oracle = ScriptedOracle::new(&[
        r#"{"queryType": "GENERAL_QUESTION"}"#,
        "Pair new reps with a mentor and review calls weekly.",
    ]);
    let response = pipeline(oracle.clone()).process_query("How should we train new sales reps?").await;

    assert_eq!(response.tag, QueryTag::GeneralQuestion);
    assert_eq!(response.answer, "Pair new reps with a mentor and review calls weekly.");
    assert!(response.rows.is_none());
    assert!(oracle.prompts()[1].contains("You are a CRM expert."));
}

#[tokio::test]
async fn data_question_counts_leads() {
    let answer = "3 leads were created last month.";
    let oracle = ScriptedOracle::new(&[
        DATA,
        LEAD_PLAN,
        &synthesized(COUNT_SQL),
        &composed(LEADS_QUESTION, answer),
        VALID,
    ]);
    let response = pipeline(oracle.clone()).process_query(LEADS_QUESTION).await;

    assert_eq!(response.tag, QueryTag::DataQuestion);
    assert_eq!(response.answer, answer);

    let rows = response.rows.expect("rows");
    assert_eq!(rows.columns, vec!["lead_count"]);
    assert_eq!(rows.rows[0]["lead_count"], json!(3));

    let plan = response.trace.plan.as_ref().unwrap();
    assert!(plan.is_answerable);
    assert!(plan.relevant_tables[0].fields.contains("createdon"));
    assert_eq!(response.trace.final_sql(), Some(COUNT_SQL));
    assert_eq!(response.trace.final_attempt_index(), Some(0));
    assert!(!response.trace.recomposed);

    let prompts = oracle.prompts();
    assert_eq!(prompts.len(), 5);
    assert!(prompts[2].contains(r#""tableName": "crm.lead""#));
    assert!(prompts[3].contains(&format!("User Question: {}", LEADS_QUESTION)));
    assert!(prompts[3].contains("Total Records Found: 1"));
    assert!(prompts[3].contains(&format!(r#""user_query": "{}""#, LEADS_QUESTION)));
}

#[tokio::test]
async fn missing_column_is_repaired_on_second_attempt() {
    let broken = "SELECT COUNT(*) AS lead_count FROM crm.lead l WHERE l.createdate >= '2026-09-01'";
    let fixed = "SELECT COUNT(*) AS lead_count FROM crm.lead l WHERE l.createdon >= '2026-09-01'";
    let oracle = ScriptedOracle::new(&[
        DATA,
        LEAD_PLAN,
        &synthesized(broken),
        &format!("```sql\n{}\n```", fixed),
        &composed(LEADS_QUESTION, "3 leads were created last month."),
        VALID,
    ]);
    let response = pipeline(oracle.clone()).process_query(LEADS_QUESTION).await;

    assert_eq!(response.tag, QueryTag::DataQuestion);
    assert_eq!(response.rows.as_ref().unwrap().rows[0]["lead_count"], json!(3));
    assert_eq!(response.trace.final_attempt_index(), Some(1));
    assert_eq!(response.trace.final_sql(), Some(fixed));

    let first_error = response.trace.attempts[0].failure.clone().unwrap();
    assert!(first_error.contains("no such column"));
    assert_eq!(response.trace.attempts[1].originating_error.as_deref(), Some(first_error.as_str()));

    let repair_prompt = &oracle.prompts()[3];
    assert!(repair_prompt.contains(broken));
    assert!(repair_prompt.contains(&first_error));
}

#[tokio::test]
async fn exhausted_retries_report_failure() {
    let oracle = ScriptedOracle::new(&[
        DATA,
        LEAD_PLAN,
        &synthesized("SELECT l.created FROM crm.lead l"),
        "SELECT l.created_on FROM crm.lead l",
        "SELECT l.creation_date FROM crm.lead l",
    ]);
    let response = pipeline(oracle.clone()).process_query(LEADS_QUESTION).await;

    assert_eq!(response.tag, QueryTag::Error);
    assert!(response.rows.is_none());
    assert_eq!(
        response.answer,
        "Failed to execute query: Failed after 3 attempts. Last error: no such column: l.creation_date"
    );
    assert_eq!(response.trace.attempts.len(), 3);
    // Triage, analysis, synthesis and two repairs; no repair after the last attempt.
    assert_eq!(oracle.calls(), 5);
}

#[tokio::test]
async fn invalid_answer_is_recomposed_once() {
    let fix = "State the number of leads explicitly.";
    let oracle = ScriptedOracle::new(&[
        DATA,
        LEAD_PLAN,
        &synthesized(COUNT_SQL),
        &composed(LEADS_QUESTION, "Leads were created."),
        &json!({"isValid": false, "reason": "No count given", "suggestedFix": fix}).to_string(),
        &composed(LEADS_QUESTION, "Still vague."),
    ]);
    let response = pipeline(oracle.clone()).process_query(LEADS_QUESTION).await;

    assert_eq!(response.tag, QueryTag::DataQuestion);
    assert_eq!(response.answer, "Still vague.");
    assert!(response.trace.recomposed);
    assert!(!response.trace.verdict.as_ref().unwrap().is_valid);

    let prompts = oracle.prompts();
    // No second validation pass.
    assert_eq!(prompts.len(), 6);
    assert!(prompts[5].contains(&format!("User Question: {} {}", LEADS_QUESTION, fix)));
}

#[tokio::test]
async fn invalid_answer_without_fix_keeps_first_answer() {
    let oracle = ScriptedOracle::new(&[
        DATA,
        LEAD_PLAN,
        &synthesized(COUNT_SQL),
        &composed(LEADS_QUESTION, "3 leads."),
        r#"{"isValid": false, "reason": "Terse", "suggestedFix": null}"#,
    ]);
    let response = pipeline(oracle.clone()).process_query(LEADS_QUESTION).await;

    assert_eq!(response.answer, "3 leads.");
    assert!(!response.trace.recomposed);
    assert_eq!(oracle.calls(), 5);
}

#[tokio::test]
async fn unanswerable_plan_never_reaches_synthesis() {
    let oracle = ScriptedOracle::new(&[
        DATA,
        r#"{"isAnswerable": false, "outOfScopeReason": "Marketing spend is not stored in the CRM", "relevantTables": []}"#,
    ]);
    let response = pipeline(oracle.clone()).process_query("What is our marketing ROI?").await;

    assert_eq!(response.tag, QueryTag::OutOfScope);
    assert_eq!(
        response.answer,
        "This question cannot be answered using the available data: Marketing spend is not stored in the CRM"
    );
    assert!(response.rows.is_none());
    assert_eq!(oracle.calls(), 2);
    assert!(oracle.prompts().iter().all(|p| !p.contains("expert SQL query generator")));
}

#[tokio::test]
async fn empty_result_accepted_when_configured() {
    let empty_sql = "SELECT l.leadid FROM crm.lead l WHERE l.createdon >= '2030-01-01'";
    let oracle = ScriptedOracle::new(&[DATA, LEAD_PLAN, &synthesized(empty_sql)]);
    let config = AssistantConfig {
        empty_result_policy: EmptyResultPolicy::Accept,
        ..AssistantConfig::default()
    };
    let response = pipeline_with(oracle.clone(), config)
        .process_query("How many leads will be created in 2030?")
        .await;

    assert_eq!(response.tag, QueryTag::DataQuestion);
    assert_eq!(response.answer, NO_DATA_MESSAGE);
    assert!(response.rows.is_none());
    assert_eq!(oracle.calls(), 3);
}

#[tokio::test]
async fn malformed_triage_output_becomes_error_response() {
    let oracle = ScriptedOracle::new(&["Hmm, hard to say."]);
    let response = pipeline(oracle).process_query("How many leads?").await;

    assert_eq!(response.tag, QueryTag::Error);
    assert!(response.rows.is_none());
    assert!(response.answer.starts_with("Error processing query: Malformed oracle output"));
    assert!(!response.answer.contains("Hmm, hard to say."));
}

#[tokio::test]
async fn missing_required_field_becomes_error_response() {
    let oracle = ScriptedOracle::new(&[DATA, r#"{"relevantTables": []}"#]);
    let response = pipeline(oracle).process_query("How many leads?").await;

    assert_eq!(response.tag, QueryTag::Error);
    assert!(response.answer.starts_with("Error processing query: Schema analysis error"));
}

#[tokio::test]
async fn pipeline_deadline_bounds_the_request() {
    let config = AssistantConfig {
        pipeline_deadline: Duration::from_millis(50),
        ..AssistantConfig::default()
    };
    let response = pipeline_with(Arc::new(StalledOracle), config)
        .process_query(LEADS_QUESTION)
        .await;

    assert_eq!(response.tag, QueryTag::Error);
    assert_eq!(response.answer, "Error processing query: Deadline exceeded during triage");
}

#[tokio::test]
async fn oversized_deadline_setting_still_answers() {
    let max = u64::MAX.to_string();
    let config = AssistantConfig::from_lookup(|key| match key {
        "PIPELINE_DEADLINE_SECS" => Some(max.clone()),
        _ => None,
    })
    .unwrap();
    let oracle = ScriptedOracle::new(&[r#"{"queryType": "OUT_OF_SCOPE"}"#]);
    let response = pipeline_with(oracle, config)
        .process_query("What's the weather like?")
        .await;

    assert_eq!(response.tag, QueryTag::OutOfScope);
    assert_eq!(response.answer, OUT_OF_SCOPE_MESSAGE);
}
