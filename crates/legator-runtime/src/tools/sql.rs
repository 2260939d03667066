//! sql.query tool — guardrailed SQL against Postgres with dynamic
//! credentials.
//!
//! Queries are classified by leading keyword. Multi-statement queries and
//! comment fragments are treated as injection indicators: classified
//! data-mutation and blocked before dispatch.

use crate::error::{RuntimeError, RuntimeResult};
use crate::tools::{str_arg, truncate_output, Classification, Tool, ToolCapability, ToolContext};
use async_trait::async_trait;
use legator_types::run::ActionTier;
use std::time::Duration;

const QUERY_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_ROWS: usize = 200;
const MAX_OUTPUT: usize = 8192;

/// Classify a SQL query by its leading keyword. Fail-closed: unknown
/// statements are destructive.
pub fn classify_sql_query(query: &str) -> ActionTier {
    let keyword = query
        .trim_start()
        .split_whitespace()
        .next()
        .unwrap_or("")
        .to_ascii_uppercase();

    match keyword.as_str() {
        "SELECT" | "SHOW" | "DESCRIBE" | "DESC" | "EXPLAIN" | "WITH" => ActionTier::Read,
        "INSERT" | "UPDATE" | "DELETE" | "MERGE" | "UPSERT" | "COPY" | "REPLACE" => {
            ActionTier::DataMutation
        }
        "DROP" | "TRUNCATE" | "CREATE" | "ALTER" | "RENAME" => {
            // CREATE INDEX is operational, the rest reshapes schema.
            if keyword == "CREATE" && is_create_index(query) {
                ActionTier::ServiceMutation
            } else {
                ActionTier::DestructiveMutation
            }
        }
        "ANALYZE" | "VACUUM" | "GRANT" | "REVOKE" | "SET" | "REINDEX" => {
            ActionTier::ServiceMutation
        }
        _ => ActionTier::DestructiveMutation,
    }
}

fn is_create_index(query: &str) -> bool {
    let upper = query.trim_start().to_ascii_uppercase();
    upper.starts_with("CREATE INDEX") || upper.starts_with("CREATE UNIQUE INDEX")
}

/// Simple injection heuristics: multiple statements, SQL comments.
/// Matches are blocked before dispatch regardless of autonomy.
pub fn contains_sql_injection(query: &str) -> bool {
    let trimmed = query.trim_end();
    // A trailing semicolon alone is harmless; one in the middle chains
    // statements.
    let body = trimmed.strip_suffix(';').unwrap_or(trimmed);
    body.contains(';') || body.contains("--") || body.contains("/*")
}

pub struct SqlTool;

impl SqlTool {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SqlTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for SqlTool {
    fn name(&self) -> &'static str {
        "sql.query"
    }

    fn description(&self) -> &'static str {
        "Run a single SQL statement against the bound database. SELECTs are \
         permitted; data mutations are blocked by policy."
    }

    fn parameters(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {"type": "string", "description": "one SQL statement"},
                "endpoint": {"type": "string", "description": "database endpoint name"},
                "credential": {"type": "string", "description": "credential handle name"}
            },
            "required": ["query"]
        })
    }

    fn capability(&self) -> ToolCapability {
        ToolCapability {
            domain: "sql",
            tiers: &[
                ActionTier::Read,
                ActionTier::ServiceMutation,
                ActionTier::DestructiveMutation,
                ActionTier::DataMutation,
            ],
            requires_credentials: true,
        }
    }

    fn classify(&self, args: &serde_json::Value) -> Classification {
        let query = str_arg(args, "query");
        let keyword = query
            .trim_start()
            .split_whitespace()
            .next()
            .unwrap_or("")
            .to_ascii_lowercase();
        let action = format!("sql.{keyword}");

        if contains_sql_injection(query) {
            return Classification::blocked(
                ActionTier::DataMutation,
                action,
                "injection indicators (multiple statements or comment fragments)",
            );
        }
        let tier = classify_sql_query(query);
        Classification::allowed(tier, action).with_target(str_arg(args, "endpoint").to_string())
    }

    async fn execute(
        &self,
        ctx: &ToolContext<'_>,
        args: &serde_json::Value,
    ) -> RuntimeResult<String> {
        let query = str_arg(args, "query");
        if query.is_empty() {
            return Err(RuntimeError::tool("sql.query", "query is required"));
        }
        let endpoint = str_arg(args, "endpoint");
        let handle = str_arg(args, "credential");

        let db = ctx
            .credentials
            .database_credentials(handle)
            .ok_or_else(|| RuntimeError::Credential {
                handle: handle.to_string(),
                message: "no database credentials issued for this run".to_string(),
            })?;

        let conn_str = format!(
            "host={} user={} password={} connect_timeout=5",
            endpoint,
            db.username,
            db.password.as_str()
        );

        let connect = tokio_postgres::connect(&conn_str, tokio_postgres::NoTls);
        let (client, connection) = tokio::select! {
            _ = ctx.cancel.cancelled() => return Err(RuntimeError::Cancelled),
            res = tokio::time::timeout(QUERY_TIMEOUT, connect) => match res {
                Err(_) => return Err(RuntimeError::tool_transient("sql.query", "connect timed out")),
                Ok(Err(e)) => {
                    return Err(RuntimeError::tool_transient("sql.query", format!("connect: {e}")))
                }
                Ok(Ok(pair)) => pair,
            },
        };
        // The connection task terminates when the client drops.
        tokio::spawn(async move {
            let _ = connection.await;
        });

        let rows = tokio::select! {
            _ = ctx.cancel.cancelled() => return Err(RuntimeError::Cancelled),
            res = tokio::time::timeout(QUERY_TIMEOUT, client.simple_query(query)) => match res {
                Err(_) => return Err(RuntimeError::tool_transient("sql.query", "query timed out")),
                Ok(Err(e)) => return Err(RuntimeError::tool("sql.query", format!("query: {e}"))),
                Ok(Ok(rows)) => rows,
            },
        };

        let mut out = String::new();
        let mut count = 0usize;
        for msg in rows {
            match msg {
                tokio_postgres::SimpleQueryMessage::Row(row) => {
                    if count >= MAX_ROWS {
                        out.push_str("... (row limit reached)\n");
                        break;
                    }
                    let mut fields = Vec::with_capacity(row.len());
                    for i in 0..row.len() {
                        fields.push(row.get(i).unwrap_or(""));
                    }
                    out.push_str(&fields.join(" | "));
                    out.push('\n');
                    count += 1;
                }
                tokio_postgres::SimpleQueryMessage::CommandComplete(n) => {
                    out.push_str(&format!("({n} rows affected)\n"));
                }
                _ => {}
            }
        }
        Ok(truncate_output(out, MAX_OUTPUT))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads() {
        for q in [
            "SELECT * FROM users",
            "select count(*) from orders",
            "SHOW TABLES",
            "DESCRIBE users",
            "DESC users",
            "EXPLAIN SELECT * FROM users",
            "  SELECT 1",
        ] {
            assert_eq!(classify_sql_query(q), ActionTier::Read, "{q}");
        }
    }

    #[test]
    fn data_mutations() {
        for q in [
            "INSERT INTO users VALUES (1, 'test')",
            "UPDATE users SET name='test' WHERE id=1",
            "DELETE FROM users WHERE id=1",
            "MERGE INTO target USING source",
            "UPSERT INTO users VALUES (1, 'test')",
            "COPY users FROM '/tmp/data.csv'",
        ] {
            assert_eq!(classify_sql_query(q), ActionTier::DataMutation, "{q}");
        }
    }

    #[test]
    fn destructive_mutations() {
        for q in [
            "DROP TABLE users",
            "DROP DATABASE production",
            "TRUNCATE TABLE users",
            "CREATE TABLE new_table (id INT)",
            "ALTER TABLE users ADD COLUMN email VARCHAR(255)",
        ] {
            assert_eq!(classify_sql_query(q), ActionTier::DestructiveMutation, "{q}");
        }
    }

    #[test]
    fn service_mutations() {
        for q in [
            "CREATE INDEX idx_users_email ON users(email)",
            "ANALYZE users",
            "VACUUM FULL",
            "GRANT SELECT ON users TO readonly_user",
            "SET search_path TO public",
        ] {
            assert_eq!(classify_sql_query(q), ActionTier::ServiceMutation, "{q}");
        }
    }

    #[test]
    fn unknown_is_fail_closed() {
        assert_eq!(
            classify_sql_query("CALL some_procedure()"),
            ActionTier::DestructiveMutation
        );
    }

    #[test]
    fn injection_detection() {
        assert!(!contains_sql_injection("SELECT * FROM users"));
        assert!(contains_sql_injection("SELECT * FROM users; DROP TABLE users"));
        assert!(contains_sql_injection("SELECT * FROM users -- comment"));
        assert!(contains_sql_injection("SELECT * FROM users /* inline */"));
        assert!(!contains_sql_injection("SELECT 1"));
        // A single trailing semicolon is not chaining.
        assert!(!contains_sql_injection("SELECT 1;"));
    }

    #[test]
    fn injection_classifies_blocked_data_mutation() {
        let tool = SqlTool::new();
        let c = tool.classify(&serde_json::json!({
            "query": "SELECT * FROM users; DROP TABLE users"
        }));
        assert!(c.blocked);
        assert_eq!(c.tier, ActionTier::DataMutation);
        assert_eq!(c.action, "sql.select");
    }
}
