//! Response Normalizer
//!
//! Oracle output is untrusted: it may be fenced, carry a prose preamble or
//! stray control bytes. Every stage that expects structured output routes the
//! raw completion through [`normalize`].

use crate::error::{PipelineError, Result};
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;
use tracing::debug;

lazy_static! {
    static ref CODE_FENCE: Regex = Regex::new(r"```[A-Za-z]*[ \t]*").unwrap();
    static ref CONTROL_CHARS: Regex = Regex::new(r"[\x00-\x08\x0B\x0C\x0E-\x1F\x7F-\x9F]").unwrap();
    static ref LINE_BREAKS: Regex = Regex::new(r"[\r\n\t]+").unwrap();
    static ref FENCED_BLOCK: Regex = Regex::new(r"(?s)```(?:[A-Za-z]*[ \t]*\r?\n)?(.*?)```").unwrap();
    static ref STATEMENT_START: Regex = Regex::new(r"(?i)^\s*\(*\s*(SELECT|WITH)\b").unwrap();
    static ref STATEMENT_KEYWORD: Regex = Regex::new(r"(?i)\b(SELECT|WITH)\b").unwrap();
}

/// Strip fence markers and control characters. Line breaks become spaces so
/// that raw newlines inside JSON strings do not break parsing.
pub fn clean(raw: &str) -> String {
    let without_fences = CODE_FENCE.replace_all(raw, "");
    let without_controls = CONTROL_CHARS.replace_all(&without_fences, "");
    LINE_BREAKS.replace_all(&without_controls, " ").trim().to_string()
}

/// Clean and parse an oracle completion as JSON.
pub fn normalize(raw: &str) -> Result<Value> {
    let cleaned = clean(raw);
    match serde_json::from_str::<Value>(&cleaned) {
        Ok(value) => Ok(value),
        Err(first_err) => match recover_payload(&cleaned) {
            Some(value) => {
                debug!("Recovered JSON payload from surrounding prose");
                Ok(value)
            }
            None => {
                debug!("Unparseable oracle output: {}", raw);
                Err(PipelineError::malformed(first_err.to_string(), raw))
            }
        },
    }
}

/// Try every balanced `{...}`/`[...]` block in order. The first object wins;
/// a bare array is kept only when no object parses.
fn recover_payload(text: &str) -> Option<Value> {
    let mut fallback = None;
    for (start, _) in text.match_indices(|c: char| c == '{' || c == '[') {
        let Some(span) = extract_json_span(&text[start..]) else {
            continue;
        };
        match serde_json::from_str::<Value>(span) {
            Ok(value @ Value::Object(_)) => return Some(value),
            Ok(value) => {
                fallback.get_or_insert(value);
            }
            Err(_) => {}
        }
    }
    fallback
}

/// Clean a plain SQL completion. A fenced block wins over surrounding prose;
/// otherwise a preamble ending in a colon before SELECT/WITH is dropped.
pub fn clean_statement(raw: &str) -> String {
    let body = match FENCED_BLOCK.captures(raw).and_then(|c| c.get(1)) {
        Some(block) if !block.as_str().trim().is_empty() => block.as_str(),
        _ => raw,
    };
    let without_fences = CODE_FENCE.replace_all(body, "");
    let without_controls = CONTROL_CHARS.replace_all(&without_fences, "");
    let statement = without_controls.trim().trim_matches('`').trim();
    strip_preamble(statement).to_string()
}

fn strip_preamble(statement: &str) -> &str {
    if STATEMENT_START.is_match(statement) {
        return statement;
    }
    // Only prose introducing the statement ("Corrected query: SELECT ...") is cut.
    STATEMENT_KEYWORD
        .find_iter(statement)
        .find(|m| statement[..m.start()].trim_end().ends_with(':'))
        .map(|m| &statement[m.start()..])
        .unwrap_or(statement)
}

/// Byte span of the first balanced `{...}` or `[...]` block, ignoring
/// delimiters inside string literals.
fn extract_json_span(text: &str) -> Option<&str> {
    let start = text.find(|c: char| c == '{' || c == '[')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' | '[' => depth += 1,
            '}' | ']' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(&text[start..start + offset + ch.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}

pub fn optional_str<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str).filter(|s| !s.trim().is_empty())
}

pub fn required_str<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str)
}

/// Boolean field, tolerating `"true"`/`"false"` strings.
pub fn required_bool(value: &Value, key: &str) -> Option<bool> {
    match value.get(key)? {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_strips_json_fence() {
        let raw = "```json\n{\"queryType\": \"DATA_QUESTION\"}\n```";
        assert_eq!(normalize(raw).unwrap(), json!({"queryType": "DATA_QUESTION"}));
    }

    #[test]
    fn test_strips_control_characters() {
        let raw = "{\"answer\": \"forty\u{0007}two\",\n\t\"ok\": true}";
        assert_eq!(normalize(raw).unwrap(), json!({"answer": "fortytwo", "ok": true}));
    }

    #[test]
    fn test_recovers_payload_after_preamble() {
        let raw = "Sure! Here is the result:\n```json\n{\"isValid\": true, \"reason\": \"uses {braces}\"}\n```\nHope it helps.";
        let value = normalize(raw).unwrap();
        assert_eq!(value["isValid"], json!(true));
        assert_eq!(value["reason"], json!("uses {braces}"));
    }

    #[test]
    fn test_malformed_output_keeps_raw_text() {
        match normalize("this is not json at all") {
            Err(PipelineError::MalformedOracleOutput { raw, .. }) => {
                assert_eq!(raw, "this is not json at all");
            }
            other => panic!("expected malformed output, got {:?}", other),
        }
    }

    #[test]
    fn test_normalize_is_idempotent_on_clean_input() {
        let raw = "```json\n{\"relevantTables\": [{\"tableName\": \"crm.lead\", \"fields\": [\"createdon\"]}], \"isAnswerable\": true}\n```";
        let first = normalize(raw).unwrap();
        let again = normalize(&serde_json::to_string(&first).unwrap()).unwrap();
        assert_eq!(first, again);
        assert_eq!(normalize(&serde_json::to_string_pretty(&first).unwrap()).unwrap(), first);
    }

    #[test]
    fn test_clean_statement() {
        assert_eq!(
            clean_statement("```sql\nSELECT COUNT(*) FROM lead;\n```"),
            "SELECT COUNT(*) FROM lead;"
        );
        assert_eq!(clean_statement("`SELECT 1`"), "SELECT 1");
    }

    #[test]
    fn test_clean_statement_drops_preamble() {
        assert_eq!(
            clean_statement("Here is the corrected query:\n```sql\nSELECT COUNT(*) FROM crm.lead\n```"),
            "SELECT COUNT(*) FROM crm.lead"
        );
        assert_eq!(
            clean_statement("Here is the query with fixed joins:\nWITH recent AS (SELECT * FROM crm.lead) SELECT COUNT(*) FROM recent"),
            "WITH recent AS (SELECT * FROM crm.lead) SELECT COUNT(*) FROM recent"
        );
        assert_eq!(
            clean_statement("Corrected: SELECT leadid FROM crm.lead"),
            "SELECT leadid FROM crm.lead"
        );
        assert_eq!(
            clean_statement("DELETE FROM crm.lead WHERE leadid IN (SELECT leadid FROM crm.lead)"),
            "DELETE FROM crm.lead WHERE leadid IN (SELECT leadid FROM crm.lead)"
        );
        assert_eq!(clean_statement("```SELECT 1```"), "SELECT 1");
        let multi_line = "SELECT leadid\nFROM crm.lead\nWHERE createdon >= '2026-09-01'";
        assert_eq!(clean_statement(multi_line), multi_line);
    }

    #[test]
    fn test_skips_leading_bracketed_prose() {
        let raw = "As noted in [1]: {\"isValid\": false, \"reason\": \"Wrong total\"}";
        let value = normalize(raw).unwrap();
        assert_eq!(value["isValid"], json!(false));

        assert_eq!(normalize("Tables: [\"crm.lead\"] only").unwrap(), json!(["crm.lead"]));
    }

    #[test]
    fn test_field_helpers() {
        let value = json!({"a": "x", "b": "false", "c": true, "d": ""});
        assert_eq!(required_str(&value, "a"), Some("x"));
        assert_eq!(required_bool(&value, "b"), Some(false));
        assert_eq!(required_bool(&value, "c"), Some(true));
        assert_eq!(optional_str(&value, "d"), None);
        assert_eq!(required_bool(&value, "missing"), None);
    }
}
