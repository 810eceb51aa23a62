use std::collections::BTreeMap;
use std::fmt;

use thiserror::Error;

use crate::value::Value;

/// Boxed driver error carried by [`QuarryError::Persistence`].
pub type DriverError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The kind of statement that was being executed when the storage driver failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatementKind {
    Select,
    Insert,
    Update,
    Delete,
    Raw,
    Transaction,
}

impl StatementKind {
    /// Infers the kind from the leading keyword of a statement.
    pub fn of(sql: &str) -> Self {
        let head = sql.trim_start();
        let keyword = head
            .split(|c: char| c.is_whitespace() || c == '(')
            .next()
            .unwrap_or_default();
        if keyword.eq_ignore_ascii_case("select") {
            StatementKind::Select
        } else if keyword.eq_ignore_ascii_case("insert") || keyword.eq_ignore_ascii_case("replace")
        {
            StatementKind::Insert
        } else if keyword.eq_ignore_ascii_case("update") {
            StatementKind::Update
        } else if keyword.eq_ignore_ascii_case("delete") {
            StatementKind::Delete
        } else {
            StatementKind::Raw
        }
    }
}

impl fmt::Display for StatementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            StatementKind::Select => "select",
            StatementKind::Insert => "insert",
            StatementKind::Update => "update",
            StatementKind::Delete => "delete",
            StatementKind::Raw => "raw",
            StatementKind::Transaction => "transaction",
        })
    }
}

/// Field name to messages. Populated by validators; never raised on its own
/// by `save`, which reports validation softly.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorBag {
    messages: BTreeMap<String, Vec<String>>,
}

impl ErrorBag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.messages
            .entry(field.into())
            .or_default()
            .push(message.into());
    }

    pub fn has(&self, field: &str) -> bool {
        self.messages.contains_key(field)
    }

    pub fn get(&self, field: &str) -> &[String] {
        self.messages.get(field).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn first(&self, field: &str) -> Option<&str> {
        self.get(field).first().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn len(&self) -> usize {
        self.messages.values().map(Vec::len).sum()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.messages
            .iter()
            .map(|(field, messages)| (field.as_str(), messages.as_slice()))
    }
}

impl fmt::Display for ErrorBag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (field, messages) in &self.messages {
            for message in messages {
                if !first {
                    f.write_str("; ")?;
                }
                first = false;
                write!(f, "{field}: {message}")?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum QuarryError {
    /// A required single-row fetch returned nothing
    #[error("No {model} found for key {key}")]
    NotFound { model: String, key: Value },

    /// Validation failed; only raised by the `*_or_fail` helpers
    #[error("Validation failed: {0}")]
    ValidationFailed(ErrorBag),

    /// A guarded attribute moved to a value not reachable from its current one
    #[error("Illegal transition of `{attribute}` from {from} to {to}")]
    IllegalStateTransition {
        attribute: String,
        from: Value,
        to: Value,
    },

    /// A versioned update matched no row
    #[error("Concurrency conflict updating {model} {key}: expected version {version}")]
    ConcurrencyConflict {
        model: String,
        key: Value,
        version: Value,
    },

    /// Update or delete attempted on an immutable entity type
    #[error("{model} is immutable and cannot be {operation}")]
    ImmutableEntity {
        model: String,
        operation: &'static str,
    },

    /// The storage driver rejected a statement
    #[error("Persistence error during {statement} `{sql}`: {source}")]
    Persistence {
        statement: StatementKind,
        sql: String,
        #[source]
        source: DriverError,
    },

    /// An encrypted cast was used without a configured key
    #[error("No encryption key has been configured")]
    MissingEncryptionKey,

    /// A ciphertext could not be decrypted or decoded
    #[error("Decryption failed: {0}")]
    Decryption(String),

    /// Malformed cast declaration
    #[error("Invalid cast `{cast}` for attribute `{attribute}`")]
    InvalidCast { attribute: String, cast: String },

    /// A value could not be cast to the declared type
    #[error("Cannot cast `{attribute}`: {message}")]
    CastFormat { attribute: String, message: String },

    #[error("Call to undefined relation `{relation}` on model {model}")]
    UnknownRelation { model: String, relation: String },

    #[error("Model `{0}` has not been registered")]
    UnknownModel(String),

    #[error("No model registered for morph type `{0}`")]
    UnknownMorphType(String),

    /// Builder misuse detected while constructing a query
    #[error("Invalid predicate: {0}")]
    InvalidPredicate(String),

    /// A write statement could not be compiled from its inputs
    #[error("Invalid statement: {0}")]
    InvalidStatement(String),

    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Generic configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl QuarryError {
    /// Wraps a driver error with the statement that triggered it.
    pub fn persistence(sql: &str, source: impl Into<DriverError>) -> Self {
        QuarryError::Persistence {
            statement: StatementKind::of(sql),
            sql: sql.to_string(),
            source: source.into(),
        }
    }

    /// `true` for errors raised because of how the application is configured.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            QuarryError::MissingEncryptionKey
                | QuarryError::InvalidCast { .. }
                | QuarryError::UnknownRelation { .. }
                | QuarryError::UnknownModel(_)
                | QuarryError::UnknownMorphType(_)
                | QuarryError::Configuration(_)
        )
    }
}

/// Result type for database operations
pub type Result<T> = std::result::Result<T, QuarryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statement_kind_of() {
        assert_eq!(StatementKind::of("SELECT * FROM `posts`"), StatementKind::Select);
        assert_eq!(StatementKind::of("  insert into t"), StatementKind::Insert);
        assert_eq!(StatementKind::of("UPDATE t SET a = ?"), StatementKind::Update);
        assert_eq!(StatementKind::of("DELETE FROM t"), StatementKind::Delete);
        assert_eq!(StatementKind::of("SAVEPOINT trans2"), StatementKind::Raw);
    }

    #[test]
    fn test_error_bag() {
        let mut bag = ErrorBag::new();
        assert!(bag.is_empty());
        bag.add("title", "is required");
        bag.add("title", "is too short");
        bag.add("body", "is required");
        assert_eq!(bag.len(), 3);
        assert_eq!(bag.first("title"), Some("is required"));
        assert!(bag.has("body"));
        assert!(!bag.has("slug"));
        assert_eq!(
            bag.to_string(),
            "body: is required; title: is required; title: is too short"
        );
    }

    #[test]
    fn test_persistence_wraps_statement_kind() {
        let err = QuarryError::persistence("DELETE FROM `t`", "disk full");
        match &err {
            QuarryError::Persistence { statement, .. } => {
                assert_eq!(*statement, StatementKind::Delete)
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(std::error::Error::source(&err).is_some());
        assert!(!err.is_configuration());
        assert!(QuarryError::MissingEncryptionKey.is_configuration());
    }
}
