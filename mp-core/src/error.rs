//! Error taxonomy exposed at every library boundary.
//!
//! Each variant maps to a stable machine-readable code and serializes to a
//! `{code, message, details}` payload that is safe to emit: constructors
//! never receive secret material, and [`crate::Secret`] redacts itself in
//! every string form, so nothing built from these types can leak it.

use serde_json::{Value, json};
use thiserror::Error;

/// Result type alias used across the workspace.
pub type Result<T> = std::result::Result<T, Error>;

/// All failures surfaced by the library.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration could not be loaded, parsed, or resolved.
    #[error("configuration error: {message}")]
    Config { message: String },

    /// A named account does not exist in the config store.
    #[error("account '{name}' not found; add it first or check the account list")]
    AccountNotFound { name: String },

    /// An account with this name already exists.
    #[error("account '{name}' already exists; remove it first or pick another name")]
    AccountExists { name: String },

    /// The API rejected the credentials (401/403). Never retried.
    #[error("authentication failed: {message}")]
    AuthFailed { message: String },

    /// Rate limit budget exhausted. `retry_after` is seconds, when the
    /// server told us.
    #[error("rate limited by the Mixpanel API{}", retry_after_suffix(.retry_after))]
    RateLimited { retry_after: Option<u64> },

    /// A query (remote or local) failed. Carries the offending query text
    /// or request parameters when known.
    #[error("query failed: {message}")]
    QueryFailed {
        message: String,
        query: Option<String>,
        status: Option<u16>,
    },

    /// The JQL endpoint rejected the script with a syntax error.
    #[error("JQL syntax error: {message}")]
    JqlSyntax { message: String },

    /// A 5xx that survived the retry budget, or a malformed server reply.
    #[error("server error (HTTP {status}): {message}")]
    Server { status: u16, message: String },

    /// Target table already exists and append was not requested.
    #[error("table '{table}' already exists; drop it first or pass append")]
    TableExists { table: String },

    /// Target table does not exist.
    #[error("table '{table}' not found")]
    TableNotFound { table: String },

    /// The store file is held by another writer.
    #[error("database '{path}' is locked by another process")]
    DatabaseLocked { path: String },

    /// The store file does not exist (read-only open).
    #[error("database '{path}' does not exist")]
    DatabaseNotFound { path: String },

    /// The caller's cancellation token fired. Partial effects documented
    /// per operation remain in place.
    #[error("operation cancelled")]
    Cancelled,
}

fn retry_after_suffix(retry_after: &Option<u64>) -> String {
    match retry_after {
        Some(s) => format!("; retry after {s}s"),
        None => String::new(),
    }
}

impl Error {
    pub fn config(message: impl Into<String>) -> Self {
        Error::Config { message: message.into() }
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Error::AuthFailed { message: message.into() }
    }

    pub fn query(message: impl Into<String>) -> Self {
        Error::QueryFailed { message: message.into(), query: None, status: None }
    }

    /// Query failure with the query text (SQL or request parameters) attached.
    pub fn query_with(message: impl Into<String>, query: impl Into<String>) -> Self {
        Error::QueryFailed { message: message.into(), query: Some(query.into()), status: None }
    }

    pub fn server(status: u16, message: impl Into<String>) -> Self {
        Error::Server { status, message: message.into() }
    }

    pub fn table_exists(table: impl Into<String>) -> Self {
        Error::TableExists { table: table.into() }
    }

    pub fn table_not_found(table: impl Into<String>) -> Self {
        Error::TableNotFound { table: table.into() }
    }

    /// Stable machine-readable code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Config { .. } => "CONFIG_ERROR",
            Error::AccountNotFound { .. } => "ACCOUNT_NOT_FOUND",
            Error::AccountExists { .. } => "ACCOUNT_EXISTS",
            Error::AuthFailed { .. } => "AUTH_FAILED",
            Error::RateLimited { .. } => "RATE_LIMITED",
            Error::QueryFailed { .. } => "QUERY_FAILED",
            Error::JqlSyntax { .. } => "JQL_SYNTAX",
            Error::Server { .. } => "SERVER_ERROR",
            Error::TableExists { .. } => "TABLE_EXISTS",
            Error::TableNotFound { .. } => "TABLE_NOT_FOUND",
            Error::DatabaseLocked { .. } => "DATABASE_LOCKED",
            Error::DatabaseNotFound { .. } => "DATABASE_NOT_FOUND",
            Error::Cancelled => "CANCELLED",
        }
    }

    /// Whether the client may retry the operation internally.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::RateLimited { .. } | Error::Server { .. })
    }

    /// Serializable `{code, message, details}` representation.
    ///
    /// Safe to log or hand across a process boundary: messages are built
    /// without secret material and [`crate::Secret`] cannot render itself.
    pub fn to_payload(&self) -> Value {
        let mut details = serde_json::Map::new();
        match self {
            Error::AccountNotFound { name } | Error::AccountExists { name } => {
                details.insert("name".into(), json!(name));
            }
            Error::RateLimited { retry_after } => {
                if let Some(s) = retry_after {
                    details.insert("retry_after".into(), json!(s));
                }
            }
            Error::QueryFailed { query, status, .. } => {
                if let Some(q) = query {
                    details.insert("query".into(), json!(q));
                }
                if let Some(s) = status {
                    details.insert("status".into(), json!(s));
                }
            }
            Error::Server { status, .. } => {
                details.insert("status".into(), json!(status));
            }
            Error::TableExists { table } | Error::TableNotFound { table } => {
                details.insert("table".into(), json!(table));
            }
            Error::DatabaseLocked { path } | Error::DatabaseNotFound { path } => {
                details.insert("path".into(), json!(path));
            }
            _ => {}
        }
        json!({
            "code": self.code(),
            "message": self.to_string(),
            "details": Value::Object(details),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(Error::config("x").code(), "CONFIG_ERROR");
        assert_eq!(Error::table_exists("t").code(), "TABLE_EXISTS");
        assert_eq!(Error::RateLimited { retry_after: Some(3) }.code(), "RATE_LIMITED");
        assert_eq!(Error::Cancelled.code(), "CANCELLED");
    }

    #[test]
    fn payload_carries_code_message_details() {
        let err = Error::query_with("boom", "SELECT 1");
        let payload = err.to_payload();
        assert_eq!(payload["code"], "QUERY_FAILED");
        assert!(payload["message"].as_str().unwrap().contains("boom"));
        assert_eq!(payload["details"]["query"], "SELECT 1");
    }

    #[test]
    fn precondition_messages_suggest_remediation() {
        let msg = Error::table_exists("events_jan").to_string();
        assert!(msg.contains("events_jan"));
        assert!(msg.contains("append"));
    }

    #[test]
    fn retryable_classification() {
        assert!(Error::server(503, "unavailable").is_retryable());
        assert!(Error::RateLimited { retry_after: None }.is_retryable());
        assert!(!Error::auth("nope").is_retryable());
        assert!(!Error::table_not_found("t").is_retryable());
    }
}
