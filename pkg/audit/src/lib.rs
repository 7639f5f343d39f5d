//! Audit log ingestion and audit-driven RBAC policy generation.

pub mod attributes;
pub mod compact;
pub mod error;
pub mod filter;
pub mod generate;
pub mod output;
pub mod pipeline;
pub mod scheme;
pub mod source;

pub use error::{AuditError, ErrorAggregate};
pub use pipeline::{AuditEventStream, AuditPipeline, read_audit_events};
