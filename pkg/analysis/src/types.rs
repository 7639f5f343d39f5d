use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use pkg_types::rbac::{Subject, SubjectKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Info,
}

/// Access a rule looks for. Every list is "any of"; an empty list matches
/// anything. A `*` on the granted side always matches.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessPattern {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub verbs: Vec<String>,
    /// The core group is spelled `core`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub api_groups: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<String>,
    #[serde(
        default,
        rename = "nonResourceURLs",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub non_resource_urls: Vec<String>,
    /// `*` selects cluster-wide grants only.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub namespaces: Vec<String>,
}

impl AccessPattern {
    pub fn new(verbs: &[&str]) -> Self {
        Self {
            verbs: to_strings(verbs),
            ..Default::default()
        }
    }

    pub fn groups(mut self, groups: &[&str]) -> Self {
        self.api_groups = to_strings(groups);
        self
    }

    pub fn resources(mut self, resources: &[&str]) -> Self {
        self.resources = to_strings(resources);
        self
    }

    pub fn urls(mut self, urls: &[&str]) -> Self {
        self.non_resource_urls = to_strings(urls);
        self
    }

    pub fn namespaces(mut self, namespaces: &[&str]) -> Self {
        self.namespaces = to_strings(namespaces);
        self
    }
}

/// Selects subjects. Unset fields match anything; `name` and `namespace` are
/// regular expressions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectPattern {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<SubjectKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Exclusion {
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub comment: String,
    #[serde(default)]
    pub added_by: String,
    #[serde(default)]
    pub last_modified: String,
    /// The exclusion stops applying at this instant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub valid_before: Option<DateTime<Utc>>,
    pub subject: SubjectPattern,
}

impl Exclusion {
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        if self.disabled {
            return false;
        }
        match self.valid_before {
            Some(t) => now < t,
            None => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Template; `{{kind}}`, `{{name}}`, `{{namespace}}` and `{{subject}}`
    /// are replaced per finding.
    #[serde(default)]
    pub recommendation: String,
    pub uuid: String,
    pub severity: Severity,
    #[serde(default)]
    pub references: Vec<String>,
    /// A subject matches when any of its grants matches any pattern.
    #[serde(default)]
    pub access: Vec<AccessPattern>,
    #[serde(default)]
    pub exclusions: Vec<Exclusion>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisConfigInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub uuid: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisConfig {
    #[serde(flatten)]
    pub info: AnalysisConfigInfo,
    #[serde(default)]
    pub rules: Vec<Rule>,
    #[serde(default)]
    pub global_exclusions: Vec<Exclusion>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        crate::defaults::default_config()
    }
}

// ─── Report ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisStats {
    pub rule_count: usize,
    pub exclusion_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisFinding {
    pub severity: Severity,
    pub message: String,
    pub recommendation: String,
    pub rule_name: String,
    pub rule_uuid: String,
    #[serde(default)]
    pub references: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisReportFinding {
    pub subject: Subject,
    pub finding: AnalysisFinding,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExclusionInfo {
    pub subject: Subject,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisReport {
    pub analysis_config_info: AnalysisConfigInfo,
    pub stats: AnalysisStats,
    /// RFC 3339.
    pub created_on: String,
    pub findings: Vec<AnalysisReportFinding>,
    pub exclusions_info: Vec<ExclusionInfo>,
}

fn to_strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn exclusion_activity() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let mut e = Exclusion::default();
        assert!(e.is_active(now));

        e.valid_before = Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        assert!(!e.is_active(now));

        e.valid_before = Some(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap());
        assert!(e.is_active(now));

        e.disabled = true;
        assert!(!e.is_active(now));
    }

    #[test]
    fn rule_from_yaml() {
        let yaml = r#"
name: Node Proxy
uuid: 6a0f6f35-7f3a-4d0e-9a39-0a5c1f6a2b11
severity: HIGH
access:
  - verbs: [get, create]
    apiGroups: [core]
    resources: [nodes/proxy]
exclusions:
  - comment: monitoring
    subject:
      kind: ServiceAccount
      namespace: "^monitoring$"
"#;
        let rule: Rule = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(rule.severity, Severity::High);
        assert_eq!(rule.access[0].resources, vec!["nodes/proxy"]);
        assert_eq!(rule.exclusions[0].subject.kind, Some(SubjectKind::ServiceAccount));
        assert!(!rule.exclusions[0].disabled);
    }
}
