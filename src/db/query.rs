use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use deadpool_postgres::{Pool, PoolError};
use serde_json::Value;
use std::error::Error as StdError;
use std::fmt;
use std::time::Instant;
use tokio_postgres::{types::Type, Row};
use tracing::debug;

use crate::error::BackendError;
use crate::query::Record;

/// Categorized error types for SQL query failures.
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorCategory {
    /// Syntax errors (SQLSTATE class 42 - syntax_error, etc.)
    Syntax,
    /// Semantic errors (missing table/column, ambiguous reference)
    Semantic,
    /// Execution/runtime errors (division by zero, invalid regex)
    Execution,
    /// Transaction state errors (e.g., transaction aborted)
    Transaction,
    /// Connection/communication errors
    Connection,
    /// Unknown or unclassified errors
    Unknown,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Syntax => write!(f, "Syntax Error"),
            ErrorCategory::Semantic => write!(f, "Semantic Error"),
            ErrorCategory::Execution => write!(f, "Execution Error"),
            ErrorCategory::Transaction => write!(f, "Transaction Error"),
            ErrorCategory::Connection => write!(f, "Connection Error"),
            ErrorCategory::Unknown => write!(f, "Error"),
        }
    }
}

/// Structured error with context from PostgreSQL error responses.
#[derive(Debug, Clone)]
pub struct StructuredError {
    pub category: ErrorCategory,
    /// SQLSTATE error code (e.g., "42601" for syntax_error)
    pub code: String,
    pub message: String,
    pub detail: Option<String>,
    pub hint: Option<String>,
    /// Table associated with the error
    pub table: Option<String>,
    /// Column associated with the error
    pub column: Option<String>,
    /// Computed line number (1-based) from position, if available
    pub line: Option<usize>,
    /// Computed column number (1-based) from position, if available
    pub col: Option<usize>,
}

impl StructuredError {
    /// Create a StructuredError from a tokio_postgres error, using the query text
    /// to compute line/column from the byte position.
    pub fn from_pg_error(err: &tokio_postgres::Error, query: &str) -> Self {
        if let Some(db_err) = err.as_db_error() {
            let code_str = db_err.code().code().to_string();
            let category = categorize_sqlstate(&code_str);
            let position = db_err.position().and_then(|p| match p {
                tokio_postgres::error::ErrorPosition::Original(pos) => Some(*pos),
                tokio_postgres::error::ErrorPosition::Internal { .. } => None,
            });

            let (line, col) = match position {
                Some(pos) => byte_offset_to_line_col(query, pos as usize),
                None => (None, None),
            };

            StructuredError {
                category,
                code: code_str,
                message: db_err.message().to_string(),
                detail: db_err.detail().map(|s| s.to_string()),
                hint: db_err.hint().map(|s| s.to_string()),
                table: db_err.table().map(|s| s.to_string()),
                column: db_err.column().map(|s| s.to_string()),
                line,
                col,
            }
        } else {
            // Non-database error (connection, protocol, etc.)
            let category = if err.source().is_some() {
                ErrorCategory::Connection
            } else {
                ErrorCategory::Unknown
            };
            StructuredError {
                detail: err.source().map(|e| e.to_string()),
                category,
                ..StructuredError::from_string(err.to_string())
            }
        }
    }

    /// Create a simple error from a plain string (for non-database errors).
    pub fn from_string(msg: String) -> Self {
        StructuredError {
            category: ErrorCategory::Unknown,
            code: String::new(),
            message: msg,
            detail: None,
            hint: None,
            table: None,
            column: None,
            line: None,
            col: None,
        }
    }

    /// Single-line rendering with code, detail and hint.
    pub fn display_full(&self) -> String {
        let mut parts = vec![format!("{}: {}", self.category, self.message)];

        if let (Some(line), Some(col)) = (self.line, self.col) {
            parts.push(format!("at line {}, column {}", line, col));
        }
        if !self.code.is_empty() {
            parts.push(format!("SQLSTATE {}", self.code));
        }
        match (&self.table, &self.column) {
            (Some(table), Some(column)) => parts.push(format!("object {}.{}", table, column)),
            (Some(table), None) => parts.push(format!("table {}", table)),
            _ => {}
        }
        if let Some(detail) = &self.detail {
            parts.push(format!("detail: {}", detail));
        }
        if let Some(hint) = &self.hint {
            parts.push(format!("hint: {}", hint));
        }

        parts.join("; ")
    }
}

impl fmt::Display for StructuredError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Convert a 1-based byte offset in a query string to (line, column) both 1-based.
fn byte_offset_to_line_col(query: &str, byte_pos: usize) -> (Option<usize>, Option<usize>) {
    if byte_pos == 0 || query.is_empty() {
        return (Some(1), Some(1));
    }
    let target = (byte_pos - 1).min(query.len()); // PostgreSQL positions are 1-based
    let mut line = 1usize;
    let mut col = 1usize;
    for (i, ch) in query.char_indices() {
        if i >= target {
            break;
        }
        if ch == '\n' {
            line += 1;
            col = 1;
        } else {
            col += 1;
        }
    }
    (Some(line), Some(col))
}

/// Categorize a SQLSTATE code into an ErrorCategory.
fn categorize_sqlstate(code: &str) -> ErrorCategory {
    if code.len() < 2 {
        return ErrorCategory::Unknown;
    }
    match &code[..2] {
        // Class 42: Syntax Error or Access Rule Violation
        "42" => {
            if code == "42601" || code == "42000" {
                ErrorCategory::Syntax
            } else {
                // 42P01 = undefined_table, 42703 = undefined_column, etc.
                ErrorCategory::Semantic
            }
        }
        // Class 22: Data Exception (invalid regular expression, overflow, ...)
        "22" | "23" | "53" | "54" | "55" | "57" => ErrorCategory::Execution,
        "25" | "40" => ErrorCategory::Transaction,
        "08" => ErrorCategory::Connection,
        _ => ErrorCategory::Unknown,
    }
}

/// Runs compiled list queries. Implemented for the connection pool; tests
/// substitute an in-memory fake.
#[async_trait]
pub trait RelationalExecutor: Send + Sync {
    /// Rows as JSON objects keyed by column name (or alias).
    async fn fetch_records(&self, sql: &str) -> Result<Vec<Record>, BackendError>;

    /// First column of the single row returned by a `COUNT(*)` query.
    async fn fetch_count(&self, sql: &str) -> Result<i64, BackendError>;
}

fn pool_error(err: PoolError) -> BackendError {
    match err {
        PoolError::Backend(e) => BackendError::Relational(StructuredError::from_pg_error(&e, "")),
        other => BackendError::Pool(other.to_string()),
    }
}

#[async_trait]
impl RelationalExecutor for Pool {
    async fn fetch_records(&self, sql: &str) -> Result<Vec<Record>, BackendError> {
        let client = self.get().await.map_err(pool_error)?;
        let start = Instant::now();
        let rows = client
            .query(sql, &[])
            .await
            .map_err(|e| BackendError::Relational(StructuredError::from_pg_error(&e, sql)))?;
        debug!(
            rows = rows.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "relational query finished"
        );
        Ok(rows.iter().map(row_to_record).collect())
    }

    async fn fetch_count(&self, sql: &str) -> Result<i64, BackendError> {
        let client = self.get().await.map_err(pool_error)?;
        let row = client
            .query_one(sql, &[])
            .await
            .map_err(|e| BackendError::Relational(StructuredError::from_pg_error(&e, sql)))?;
        row.try_get::<_, i64>(0)
            .map_err(|e| BackendError::Relational(StructuredError::from_pg_error(&e, sql)))
    }
}

pub fn row_to_record(row: &Row) -> Record {
    row.columns()
        .iter()
        .enumerate()
        .map(|(i, col)| (col.name().to_string(), extract_value(row, i, col.type_())))
        .collect()
}

fn extract_value(row: &Row, idx: usize, pg_type: &Type) -> Value {
    fn get<'a, T>(row: &'a Row, idx: usize) -> Option<T>
    where
        T: tokio_postgres::types::FromSql<'a>,
    {
        row.try_get::<_, Option<T>>(idx).ok().flatten()
    }

    let value = match *pg_type {
        Type::BOOL => get::<bool>(row, idx).map(Value::Bool),
        Type::INT2 => get::<i16>(row, idx).map(Value::from),
        Type::INT4 => get::<i32>(row, idx).map(Value::from),
        Type::INT8 => get::<i64>(row, idx).map(Value::from),
        Type::FLOAT4 => get::<f32>(row, idx).map(|f| Value::from(f as f64)),
        Type::FLOAT8 => get::<f64>(row, idx).map(Value::from),
        Type::DATE => get::<NaiveDate>(row, idx).map(|d| Value::String(d.to_string())),
        Type::TIME => get::<NaiveTime>(row, idx).map(|t| Value::String(t.to_string())),
        Type::TIMESTAMP => get::<NaiveDateTime>(row, idx)
            .map(|dt| Value::String(Utc.from_utc_datetime(&dt).to_rfc3339())),
        Type::TIMESTAMPTZ => {
            get::<DateTime<Utc>>(row, idx).map(|dt| Value::String(dt.to_rfc3339()))
        }
        Type::JSON | Type::JSONB => get::<Value>(row, idx),
        // Fallback: try to get as string
        _ => get::<String>(row, idx).map(Value::String),
    };
    value.unwrap_or(Value::Null)
}
