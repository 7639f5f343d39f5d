//! Audit ingestion and policy generation errors.

use std::fmt;

use thiserror::Error;

use pkg_types::document::DocumentError;

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("Failed to open source {source_name}: {message}")]
    Source { source_name: String, message: String },

    #[error("Failed to decode record from {source_name}: {error}")]
    Decode {
        source_name: String,
        #[source]
        error: DocumentError,
    },

    #[error("Failed to read {source_name}: {error}")]
    Read {
        source_name: String,
        #[source]
        error: std::io::Error,
    },

    #[error("Unknown object kind {api_version}/{kind}")]
    UnknownKind { api_version: String, kind: String },

    #[error("Failed to convert {api_version} {kind}: {message}")]
    Conversion {
        api_version: String,
        kind: String,
        message: String,
    },

    #[error("Failed to flatten {kind}: {message}")]
    ListFlatten { kind: String, message: String },

    #[error("No audit events matched the filters")]
    NoMatchingEvents,

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Per-item failures collected while the rest of the work carried on.
#[derive(Debug, Default)]
pub struct ErrorAggregate(pub Vec<AuditError>);

impl ErrorAggregate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, error: AuditError) {
        self.0.push(error);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &AuditError> {
        self.0.iter()
    }
}

impl From<Vec<AuditError>> for ErrorAggregate {
    fn from(errors: Vec<AuditError>) -> Self {
        Self(errors)
    }
}

impl fmt::Display for ErrorAggregate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.as_slice() {
            [] => write!(f, "no errors"),
            [only] => write!(f, "{}", only),
            errors => {
                write!(f, "[")?;
                for (i, e) in errors.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", e)?;
                }
                write!(f, "]")
            }
        }
    }
}

impl std::error::Error for ErrorAggregate {}
