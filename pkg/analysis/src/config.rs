use pkg_types::config::load_config_file;
use pkg_types::document::DocumentFormat;

use crate::error::AnalysisError;
use crate::types::AnalysisConfig;

/// Load analysis rules from a YAML (or JSON) file. A missing file yields the
/// default rule set.
pub fn load_analysis_config(path: &str) -> Result<AnalysisConfig, AnalysisError> {
    load_config_file(path).map_err(|e| AnalysisError::Load {
        path: path.to_string(),
        message: e.to_string(),
    })
}

pub fn export_analysis_config(
    config: &AnalysisConfig,
    format: DocumentFormat,
) -> Result<String, AnalysisError> {
    match format {
        DocumentFormat::Yaml => {
            serde_yaml::to_string(config).map_err(|e| AnalysisError::Encode(e.to_string()))
        }
        DocumentFormat::Json => serde_json::to_string_pretty(config)
            .map(|s| s + "\n")
            .map_err(|e| AnalysisError::Encode(e.to_string())),
    }
}
