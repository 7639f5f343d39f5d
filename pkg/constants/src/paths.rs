//! Filesystem path constants.

/// Default config file for `rbactl auditgen`.
pub const DEFAULT_AUDITGEN_CONFIG: &str = "/etc/rbactl/auditgen.yaml";

/// Default analysis rules file for `rbactl analysis`.
pub const DEFAULT_ANALYSIS_CONFIG: &str = "/etc/rbactl/analysis.yaml";
