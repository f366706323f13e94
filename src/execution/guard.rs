//! Read-only Guard
//!
//! Rejects anything but a single query before it reaches the data store.

use crate::error::{PipelineError, Result};
use crate::execution::engine::SqlDialect;
use sqlparser::ast::Statement;
use sqlparser::parser::Parser;
use tracing::debug;

pub fn ensure_read_only(sql: &str, dialect: SqlDialect) -> Result<()> {
    let parser_dialect = dialect.parser_dialect();
    match Parser::parse_sql(parser_dialect.as_ref(), sql) {
        Ok(statements) => match statements.as_slice() {
            [Statement::Query(_)] => Ok(()),
            [] => Err(PipelineError::UnsafeStatement("empty statement".to_string())),
            [_] => Err(PipelineError::UnsafeStatement(
                "only SELECT queries are allowed".to_string(),
            )),
            many => Err(PipelineError::UnsafeStatement(format!(
                "exactly one statement is allowed, got {}",
                many.len()
            ))),
        },
        Err(e) => {
            // Unparseable SQL still goes to the store, whose error message is the
            // better repair signal, provided it at least looks like a query.
            debug!("SQL parsing failed: {}, using keyword check", e);
            let first_word = sql
                .trim_start()
                .split(|c: char| c.is_whitespace() || c == '(')
                .next()
                .unwrap_or("")
                .to_uppercase();
            if first_word == "SELECT" || first_word == "WITH" {
                Ok(())
            } else {
                Err(PipelineError::UnsafeStatement(
                    "only SELECT queries are allowed".to_string(),
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_select_and_cte() {
        assert!(ensure_read_only("SELECT COUNT(DISTINCT l.leadid) FROM crm.lead l", SqlDialect::Postgres).is_ok());
        assert!(ensure_read_only(
            "WITH x AS (SELECT 1 AS n) SELECT n FROM x ORDER BY n DESC LIMIT 100",
            SqlDialect::Sqlite
        )
        .is_ok());
        assert!(ensure_read_only("SELECT TOP 100 name FROM opportunity", SqlDialect::MsSql).is_ok());
    }

    #[test]
    fn test_rejects_mutations() {
        for sql in [
            "DELETE FROM crm.lead",
            "UPDATE crm.lead SET firstname = 'x'",
            "DROP TABLE crm.lead",
            "INSERT INTO crm.lead (leadid) VALUES ('1')",
        ] {
            assert!(
                matches!(ensure_read_only(sql, SqlDialect::Postgres), Err(PipelineError::UnsafeStatement(_))),
                "accepted {}",
                sql
            );
        }
    }

    #[test]
    fn test_rejects_multiple_statements() {
        let err = ensure_read_only("SELECT 1; DROP TABLE crm.lead", SqlDialect::Postgres).unwrap_err();
        assert!(err.to_string().contains("exactly one statement"));
    }

    #[test]
    fn test_unparseable_select_passes_through() {
        assert!(ensure_read_only("SELECT FROM WHERE", SqlDialect::Sqlite).is_ok());
        assert!(ensure_read_only("TRUNCATE lead garbage (", SqlDialect::Sqlite).is_err());
    }
}
