use std::collections::HashSet;

use chrono::{DateTime, Utc};
use regex::Regex;
use tracing::{debug, info};

use pkg_constants::rbac::WILDCARD;
use pkg_rbac::describe::describe_subject;
use pkg_rbac::{NamespacedPolicyRule, SubjectPolicyList};
use pkg_types::rbac::{Subject, SubjectKind};

use crate::error::AnalysisError;
use crate::types::{
    AccessPattern, AnalysisConfig, AnalysisFinding, AnalysisReport, AnalysisReportFinding,
    AnalysisStats, Exclusion, ExclusionInfo, Rule, SubjectPattern,
};

fn granted(value: &str, wanted: &[String]) -> bool {
    wanted.is_empty() || value == WILDCARD || wanted.iter().any(|w| w == value)
}

fn granted_opt(value: Option<&str>, wanted: &[String]) -> bool {
    match value {
        Some(v) => granted(v, wanted),
        None => wanted.is_empty(),
    }
}

/// A granted URL covers `wanted` if equal, or if it ends in `*` and `wanted`
/// starts with the rest.
fn url_granted(granted_url: &str, wanted: &str) -> bool {
    match granted_url.strip_suffix('*') {
        Some(prefix) => wanted.starts_with(prefix),
        None => granted_url == wanted,
    }
}

/// Whether one flattened grant satisfies the pattern.
pub fn pattern_matches(pattern: &AccessPattern, rule: &NamespacedPolicyRule) -> bool {
    if !granted(&rule.verb, &pattern.verbs) || !granted(&rule.namespace, &pattern.namespaces) {
        return false;
    }
    if !granted_opt(rule.api_group.as_deref(), &pattern.api_groups)
        || !granted_opt(rule.resource.as_deref(), &pattern.resources)
    {
        return false;
    }
    if pattern.non_resource_urls.is_empty() {
        return true;
    }
    pattern.non_resource_urls.iter().any(|wanted| {
        rule.non_resource_urls
            .iter()
            .any(|g| url_granted(g, wanted))
    })
}

struct CompiledSubjectPattern {
    kind: Option<SubjectKind>,
    name: Option<Regex>,
    namespace: Option<Regex>,
}

impl CompiledSubjectPattern {
    fn compile(owner: &str, pattern: &SubjectPattern) -> Result<Self, AnalysisError> {
        let compile = |field: &'static str, value: &Option<String>| {
            value
                .as_deref()
                .map(|p| {
                    Regex::new(p).map_err(|source| AnalysisError::Pattern {
                        owner: owner.to_string(),
                        field,
                        pattern: p.to_string(),
                        source,
                    })
                })
                .transpose()
        };
        Ok(Self {
            kind: pattern.kind,
            name: compile("name", &pattern.name)?,
            namespace: compile("namespace", &pattern.namespace)?,
        })
    }

    fn matches(&self, subject: &Subject) -> bool {
        if self.kind.is_some_and(|k| k != subject.kind) {
            return false;
        }
        if self.name.as_ref().is_some_and(|r| !r.is_match(&subject.name)) {
            return false;
        }
        if self
            .namespace
            .as_ref()
            .is_some_and(|r| !r.is_match(&subject.namespace))
        {
            return false;
        }
        true
    }
}

struct CompiledExclusion {
    exclusion: Exclusion,
    subject: CompiledSubjectPattern,
}

impl CompiledExclusion {
    fn compile(owner: &str, exclusion: &Exclusion) -> Result<Self, AnalysisError> {
        Ok(Self {
            exclusion: exclusion.clone(),
            subject: CompiledSubjectPattern::compile(owner, &exclusion.subject)?,
        })
    }
}

/// Index and exclusion of the first active exclusion that covers `subject`.
fn first_exclusion<'a>(
    exclusions: &'a [CompiledExclusion],
    subject: &Subject,
    now: DateTime<Utc>,
) -> Option<(usize, &'a Exclusion)> {
    exclusions.iter().enumerate().find_map(|(i, e)| {
        if !e.exclusion.is_active(now) {
            debug!("exclusion '{}' is inactive, skipping", e.exclusion.comment);
            return None;
        }
        e.subject.matches(subject).then_some((i, &e.exclusion))
    })
}

fn validate_uuid(owner: &str, value: &str) -> Result<(), AnalysisError> {
    uuid::Uuid::parse_str(value)
        .map(|_| ())
        .map_err(|source| AnalysisError::Uuid {
            owner: owner.to_string(),
            value: value.to_string(),
            source,
        })
}

/// Fill a recommendation template for one subject.
pub fn render_recommendation(template: &str, subject: &Subject) -> String {
    template
        .replace("{{kind}}", &subject.kind.to_string())
        .replace("{{name}}", &subject.name)
        .replace("{{namespace}}", &subject.namespace)
        .replace("{{subject}}", &describe_subject(subject, ""))
}

struct CompiledRule {
    rule: Rule,
    exclusions: Vec<CompiledExclusion>,
}

impl CompiledRule {
    fn matches(&self, policy: &SubjectPolicyList) -> bool {
        policy.allowed_to.iter().any(|granted| {
            self.rule
                .access
                .iter()
                .any(|pattern| pattern_matches(pattern, granted))
        })
    }
}

/// Evaluates analysis rules against flattened subject policies.
pub struct Analyzer {
    config: AnalysisConfig,
    policies: Vec<SubjectPolicyList>,
    rules: Vec<CompiledRule>,
    global_exclusions: Vec<CompiledExclusion>,
}

impl Analyzer {
    pub fn new(
        config: AnalysisConfig,
        policies: Vec<SubjectPolicyList>,
    ) -> Result<Self, AnalysisError> {
        if !config.info.uuid.is_empty() {
            validate_uuid(&config.info.name, &config.info.uuid)?;
        }

        let mut global_exclusions = Vec::with_capacity(config.global_exclusions.len());
        for (i, e) in config.global_exclusions.iter().enumerate() {
            global_exclusions.push(CompiledExclusion::compile(
                &format!("global exclusion #{}", i + 1),
                e,
            )?);
        }

        let mut seen = HashSet::new();
        let mut rules = Vec::with_capacity(config.rules.len());
        for rule in &config.rules {
            let owner = format!("rule '{}'", rule.name);
            validate_uuid(&owner, &rule.uuid)?;
            if !seen.insert(rule.uuid.clone()) {
                return Err(AnalysisError::DuplicateUuid {
                    rule: rule.name.clone(),
                    uuid: rule.uuid.clone(),
                });
            }
            let exclusions = rule
                .exclusions
                .iter()
                .map(|e| CompiledExclusion::compile(&owner, e))
                .collect::<Result<Vec<_>, _>>()?;
            debug!("initialized rule '{}'", rule.name);
            rules.push(CompiledRule {
                rule: rule.clone(),
                exclusions,
            });
        }

        Ok(Self {
            config,
            policies,
            rules,
            global_exclusions,
        })
    }

    pub fn analyze(&self) -> AnalysisReport {
        self.analyze_at(Utc::now())
    }

    /// Run every rule, treating `now` as the current time for exclusion
    /// expiry.
    pub fn analyze_at(&self, now: DateTime<Utc>) -> AnalysisReport {
        let mut stats = AnalysisStats {
            rule_count: self.rules.len(),
            exclusion_count: 0,
        };
        let mut findings = Vec::new();
        let mut exclusions_info = Vec::new();

        for compiled in &self.rules {
            let rule = &compiled.rule;
            for policy in self.policies.iter().filter(|p| compiled.matches(p)) {
                let subject = &policy.subject;

                if let Some((i, e)) = first_exclusion(&compiled.exclusions, subject, now) {
                    stats.exclusion_count += 1;
                    exclusions_info.push(ExclusionInfo {
                        subject: subject.clone(),
                        message: format!(
                            "For rule \"{}\", subject excluded by rule-level exclusion #{} - \"{}\"",
                            rule.name,
                            i + 1,
                            e.comment
                        ),
                    });
                    continue;
                }

                if let Some((i, e)) = first_exclusion(&self.global_exclusions, subject, now) {
                    stats.exclusion_count += 1;
                    exclusions_info.push(ExclusionInfo {
                        subject: subject.clone(),
                        message: format!(
                            "For rule \"{}\", subject excluded by global exclusion #{} - \"{}\"",
                            rule.name,
                            i + 1,
                            e.comment
                        ),
                    });
                    continue;
                }

                findings.push(AnalysisReportFinding {
                    subject: subject.clone(),
                    finding: AnalysisFinding {
                        severity: rule.severity,
                        message: rule.description.clone(),
                        recommendation: render_recommendation(&rule.recommendation, subject),
                        rule_name: rule.name.clone(),
                        rule_uuid: rule.uuid.clone(),
                        references: rule.references.clone(),
                    },
                });
            }
        }

        info!(
            "analysis '{}': {} findings, {} exclusions",
            self.config.info.name,
            findings.len(),
            stats.exclusion_count
        );

        AnalysisReport {
            analysis_config_info: self.config.info.clone(),
            stats,
            created_on: now.to_rfc3339(),
            findings,
            exclusions_info,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pkg_rbac::{Permissions, flatten, resolve};
    use pkg_types::rbac::{
        ClusterRole, ClusterRoleBinding, ObjectMeta, PolicyRule, RbacObjects, Role, RoleBinding,
        RoleRef, RoleRefKind,
    };

    use crate::defaults::default_config;
    use crate::types::Severity;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn policies() -> Vec<SubjectPolicyList> {
        let objects = RbacObjects {
            cluster_roles: vec![
                ClusterRole::new(
                    ObjectMeta::named("admin-all"),
                    vec![PolicyRule::new(&["*"]).groups(&["*"]).resources(&["*"])],
                ),
                ClusterRole::new(
                    ObjectMeta::named("secret-reader"),
                    vec![PolicyRule::new(&["get"]).groups(&[""]).resources(&["secrets"])],
                ),
            ],
            roles: vec![Role::new(
                ObjectMeta::namespaced("team-a", "deployer"),
                vec![
                    PolicyRule::new(&["create", "patch"])
                        .groups(&["apps"])
                        .resources(&["deployments"]),
                ],
            )],
            cluster_role_bindings: vec![
                ClusterRoleBinding::new(
                    ObjectMeta::named("admins"),
                    RoleRef::new(RoleRefKind::ClusterRole, "admin-all"),
                    vec![Subject::user("root-user"), Subject::user("system:kube-controller")],
                ),
                ClusterRoleBinding::new(
                    ObjectMeta::named("secrets"),
                    RoleRef::new(RoleRefKind::ClusterRole, "secret-reader"),
                    vec![
                        Subject::service_account("kube-system", "vault"),
                        Subject::group("auditors"),
                    ],
                ),
            ],
            role_bindings: vec![RoleBinding::new(
                ObjectMeta::namespaced("team-a", "deployers"),
                RoleRef::new(RoleRefKind::Role, "deployer"),
                vec![Subject::user("ci")],
            )],
            ..Default::default()
        };
        let permissions = Permissions::from_rbac_objects(objects);
        flatten(&resolve(&permissions))
    }

    fn flagged(report: &AnalysisReport, rule: &str) -> Vec<String> {
        report
            .findings
            .iter()
            .filter(|f| f.finding.rule_name == rule)
            .map(|f| f.subject.name.clone())
            .collect()
    }

    #[test]
    fn default_rules_produce_findings() {
        let analyzer = Analyzer::new(default_config(), policies()).unwrap();
        let report = analyzer.analyze_at(now());

        assert_eq!(report.stats.rule_count, 5);
        assert_eq!(flagged(&report, "Cluster Admins"), vec!["root-user"]);

        let mut secret_readers = flagged(&report, "Secret Readers");
        secret_readers.sort();
        assert_eq!(secret_readers, vec!["auditors", "root-user"]);

        let mut workload = flagged(&report, "Workload Creators");
        workload.sort();
        assert_eq!(workload, vec!["ci", "root-user"]);

        let admin = report
            .findings
            .iter()
            .find(|f| f.finding.rule_name == "Cluster Admins")
            .unwrap();
        assert_eq!(admin.finding.severity, Severity::Critical);
        assert!(admin.finding.recommendation.contains("\"^root-user$\""));
        assert!(!admin.finding.recommendation.contains("{{"));
        assert_eq!(report.created_on, now().to_rfc3339());
    }

    #[test]
    fn global_exclusions_skip_system_subjects() {
        let analyzer = Analyzer::new(default_config(), policies()).unwrap();
        let report = analyzer.analyze_at(now());

        assert!(report.findings.iter().all(|f| f.subject.name != "system:kube-controller"));
        assert!(report.findings.iter().all(|f| f.subject.name != "vault"));
        assert!(report.stats.exclusion_count > 0);
        assert_eq!(report.stats.exclusion_count, report.exclusions_info.len());
        assert!(
            report
                .exclusions_info
                .iter()
                .any(|e| e.subject.name == "vault" && e.message.contains("global exclusion #1"))
        );
    }

    #[test]
    fn rule_exclusion_checked_before_global() {
        let mut config = default_config();
        let readers = config
            .rules
            .iter_mut()
            .find(|r| r.name == "Secret Readers")
            .unwrap();
        readers.exclusions.push(Exclusion {
            comment: "vault reads secrets".to_string(),
            subject: SubjectPattern {
                kind: Some(SubjectKind::ServiceAccount),
                name: Some("^vault$".to_string()),
                ..Default::default()
            },
            ..Default::default()
        });

        let report = Analyzer::new(config, policies()).unwrap().analyze_at(now());
        let vault: Vec<&ExclusionInfo> = report
            .exclusions_info
            .iter()
            .filter(|e| e.subject.name == "vault")
            .collect();
        assert_eq!(vault.len(), 1);
        assert!(vault[0].message.contains("rule-level exclusion #1"));
    }

    #[test]
    fn inactive_exclusions_are_ignored() {
        let mut config = default_config();
        config.global_exclusions = vec![
            Exclusion {
                disabled: true,
                subject: SubjectPattern {
                    name: Some("^root-user$".to_string()),
                    ..Default::default()
                },
                ..Default::default()
            },
            Exclusion {
                valid_before: Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()),
                subject: SubjectPattern {
                    name: Some("^auditors$".to_string()),
                    ..Default::default()
                },
                ..Default::default()
            },
        ];
        let report = Analyzer::new(config, policies()).unwrap().analyze_at(now());
        assert!(report.exclusions_info.is_empty());
        assert_eq!(flagged(&report, "Cluster Admins"), vec!["root-user", "system:kube-controller"]);
        assert!(flagged(&report, "Secret Readers").contains(&"auditors".to_string()));
    }

    #[test]
    fn invalid_config_is_rejected() {
        let mut config = default_config();
        config.rules[0].uuid = "not-a-uuid".to_string();
        assert!(matches!(
            Analyzer::new(config, Vec::new()),
            Err(AnalysisError::Uuid { .. })
        ));

        let mut config = default_config();
        config.rules[1].uuid = config.rules[0].uuid.clone();
        assert!(matches!(
            Analyzer::new(config, Vec::new()),
            Err(AnalysisError::DuplicateUuid { .. })
        ));

        let mut config = default_config();
        config.global_exclusions[0].subject.name = Some("(".to_string());
        assert!(matches!(
            Analyzer::new(config, Vec::new()),
            Err(AnalysisError::Pattern { field: "name", .. })
        ));
    }

    #[test]
    fn url_patterns() {
        let grant = NamespacedPolicyRule {
            namespace: WILDCARD.to_string(),
            verb: "get".to_string(),
            api_group: None,
            resource: None,
            resource_names: Vec::new(),
            non_resource_urls: vec!["/metrics*".to_string()],
            originated_from: Vec::new(),
        };
        assert!(pattern_matches(&AccessPattern::new(&["get"]).urls(&["/metrics/cadvisor"]), &grant));
        assert!(!pattern_matches(&AccessPattern::new(&["get"]).urls(&["/healthz"]), &grant));
        assert!(!pattern_matches(&AccessPattern::new(&["get"]).resources(&["pods"]), &grant));
    }
}
