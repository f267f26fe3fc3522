//! Error taxonomy for the query engine.
//!
//! Parsing and validation problems are the caller's fault and map to a
//! bad-request status; backend failures map to an internal error. Validation
//! and compilation errors always carry every offending command, never just
//! the first one.
use std::fmt;

use thiserror::Error;

use crate::db::StructuredError;

/// Malformed query-string structure (bad brackets, unknown keys, ...).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed query key '{key}': {message}")]
pub struct ParseError {
    pub key: String,
    pub message: String,
}

impl ParseError {
    pub fn new(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            message: message.into(),
        }
    }
}

/// One rejected command together with the query-string text it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandFailure {
    pub source: String,
    pub message: String,
}

impl CommandFailure {
    pub fn new(source: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for CommandFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.source.is_empty() {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{}: {}", self.source, self.message)
        }
    }
}

fn join_failures(failures: &[CommandFailure]) -> String {
    failures
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Commands that reference unknown fields, use operators the field type does
/// not support, or carry values that cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid query: {}", join_failures(.failures))]
pub struct QueryValidationError {
    failures: Vec<CommandFailure>,
}

impl QueryValidationError {
    /// Returns `Ok(())` when there is nothing to report.
    pub fn check(failures: Vec<CommandFailure>) -> Result<(), Self> {
        if failures.is_empty() {
            Ok(())
        } else {
            Err(Self { failures })
        }
    }

    pub fn failures(&self) -> &[CommandFailure] {
        &self.failures
    }
}

/// A structurally valid command that could not be compiled for the selected
/// backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("query compilation failed: {}", join_failures(.failures))]
pub struct QueryException {
    failures: Vec<CommandFailure>,
}

impl QueryException {
    pub fn check(failures: Vec<CommandFailure>) -> Result<(), Self> {
        if failures.is_empty() {
            Ok(())
        } else {
            Err(Self { failures })
        }
    }

    pub fn single(source: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            failures: vec![CommandFailure::new(source, message)],
        }
    }

    pub fn failures(&self) -> &[CommandFailure] {
        &self.failures
    }
}

/// Failures reported by (or while talking to) one of the two stores.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("relational store error: {}", .0.display_full())]
    Relational(StructuredError),

    #[error("relational connection pool error: {0}")]
    Pool(String),

    #[error("search backend returned {status}: {body}")]
    Search { status: u16, body: String },

    #[error("search backend request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("unexpected search backend response: {0}")]
    Response(String),
}

/// How a caller should surface an error to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorStatus {
    BadRequest,
    NotFound,
    Internal,
}

impl ErrorStatus {
    pub fn http_code(self) -> u16 {
        match self {
            ErrorStatus::BadRequest => 400,
            ErrorStatus::NotFound => 404,
            ErrorStatus::Internal => 500,
        }
    }
}

#[derive(Debug, Error)]
pub enum QueryError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Validation(#[from] QueryValidationError),

    #[error(transparent)]
    Compile(#[from] QueryException),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("unknown entity '{0}'")]
    UnknownEntity(String),

    #[error("failed to decode record: {0}")]
    Decode(#[from] serde_json::Error),
}

impl QueryError {
    pub fn status(&self) -> ErrorStatus {
        match self {
            QueryError::Parse(_) | QueryError::Validation(_) | QueryError::Compile(_) => {
                ErrorStatus::BadRequest
            }
            QueryError::UnknownEntity(_) => ErrorStatus::NotFound,
            QueryError::Backend(_) | QueryError::Decode(_) => ErrorStatus::Internal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_check_empty_is_ok() {
        assert!(QueryValidationError::check(vec![]).is_ok());
        assert!(QueryException::check(vec![]).is_ok());
    }

    #[test]
    fn test_validation_error_lists_every_failure() {
        let err = QueryValidationError::check(vec![
            CommandFailure::new("filter[where][Foo]=1", "unknown field 'Foo'"),
            CommandFailure::new("filter[where][Id][gt]=x", "'x' is not a valid integer"),
        ])
        .unwrap_err();
        assert_eq!(err.failures().len(), 2);
        let msg = err.to_string();
        assert!(msg.contains("unknown field 'Foo'"));
        assert!(msg.contains("filter[where][Id][gt]=x"));
    }

    #[test]
    fn test_failure_display_without_source() {
        let failure = CommandFailure::new("", "something broke");
        assert_eq!(failure.to_string(), "something broke");
    }

    #[test]
    fn test_status_mapping() {
        let parse: QueryError = ParseError::new("bogus", "unknown key").into();
        assert_eq!(parse.status(), ErrorStatus::BadRequest);

        let compile: QueryError = QueryException::single("x=1", "nope").into();
        assert_eq!(compile.status(), ErrorStatus::BadRequest);

        let backend: QueryError = BackendError::Search {
            status: 500,
            body: "boom".into(),
        }
        .into();
        assert_eq!(backend.status(), ErrorStatus::Internal);
        assert_eq!(backend.status().http_code(), 500);

        let unknown = QueryError::UnknownEntity("widgets".into());
        assert_eq!(unknown.status(), ErrorStatus::NotFound);
    }
}
