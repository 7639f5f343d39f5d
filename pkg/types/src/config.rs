use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Audit-driven role generation settings (YAML).
///
/// Example `auditgen.yaml`:
/// ```yaml
/// user-filter: "^system:serviceaccount:ci:"
/// namespace-filter: "^team-"
/// output: yaml
/// expand-multi-namespace: true
/// expand-multi-name: false
/// expand-verbs: true
/// name-prefix: audit
/// annotations:
///   owner: platform
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditGenConfigFile {
    #[serde(default, alias = "user-filter")]
    pub user_filter: Option<String>,
    /// Keep users that do NOT match `user_filter`.
    #[serde(default)]
    pub not: Option<bool>,
    #[serde(default, alias = "namespace-filter")]
    pub namespace_filter: Option<String>,
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default, alias = "expand-multi-namespace")]
    pub expand_multi_namespace: Option<bool>,
    #[serde(default, alias = "expand-multi-name")]
    pub expand_multi_name: Option<bool>,
    /// Turn on the conventional verb expansions (watch implies get/list, ...).
    #[serde(default, alias = "expand-verbs")]
    pub expand_verbs: Option<bool>,
    #[serde(default, alias = "name-prefix")]
    pub name_prefix: Option<String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Explicit verb expansions; merged over the conventional ones.
    #[serde(default, alias = "verb-expansions")]
    pub verb_expansions: BTreeMap<String, Vec<String>>,
}

/// Load a YAML config file, returning the default if the file doesn't exist.
pub fn load_config_file<T: serde::de::DeserializeOwned + Default>(path: &str) -> anyhow::Result<T> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("config file {} not found, using defaults", path);
            return Ok(T::default());
        }
        Err(e) => return Err(e.into()),
    };
    let config: T = serde_yaml::from_str(&content)?;
    Ok(config)
}
