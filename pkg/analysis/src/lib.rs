//! Rule-based risk analysis over flattened subject policies.

pub mod analyzer;
pub mod config;
pub mod defaults;
pub mod error;
pub mod types;

pub use analyzer::Analyzer;
pub use config::{export_analysis_config, load_analysis_config};
pub use error::AnalysisError;
pub use types::{AnalysisConfig, AnalysisReport, Severity};
