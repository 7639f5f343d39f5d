use thiserror::Error;

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("{owner}: invalid {field} pattern '{pattern}': {source}")]
    Pattern {
        owner: String,
        field: &'static str,
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("{owner}: invalid uuid '{value}': {source}")]
    Uuid {
        owner: String,
        value: String,
        #[source]
        source: uuid::Error,
    },

    #[error("rule '{rule}' reuses uuid {uuid}")]
    DuplicateUuid { rule: String, uuid: String },

    #[error("failed to load analysis config {path}: {message}")]
    Load { path: String, message: String },

    #[error("failed to encode analysis config: {0}")]
    Encode(String),
}
