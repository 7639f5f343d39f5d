use pkg_constants::rbac::{RBAC_API_GROUP, WILDCARD};

use crate::types::{
    AccessPattern, AnalysisConfig, AnalysisConfigInfo, Exclusion, Rule, Severity, SubjectPattern,
};

const DEFAULT_ADDED_BY: &str = "rbactl";

const REVIEW_HINT: &str = "Review the policy rules of {{subject}} by running \
'rbactl policy-rules -e \"^{{name}}$\" -f <manifests>'";

fn rule(
    name: &str,
    description: &str,
    uuid: &str,
    severity: Severity,
    access: Vec<AccessPattern>,
) -> Rule {
    Rule {
        name: name.to_string(),
        description: description.to_string(),
        recommendation: REVIEW_HINT.to_string(),
        uuid: uuid.to_string(),
        severity,
        references: Vec::new(),
        access,
        exclusions: Vec::new(),
    }
}

pub fn default_rules() -> Vec<Rule> {
    vec![
        rule(
            "Secret Readers",
            "Capture principals that can read secrets",
            "3c942117-f4ff-423a-83d4-f7d6b75a6b78",
            Severity::High,
            vec![
                AccessPattern::new(&["get", "list", "watch"])
                    .groups(&["core"])
                    .resources(&["secrets"]),
            ],
        ),
        rule(
            "Cluster Admins",
            "Capture principals that can perform any action on any resource cluster-wide",
            "a1f3c0d2-6b7e-4c59-8e21-3f4d5b6a7c80",
            Severity::Critical,
            vec![
                AccessPattern::new(&[WILDCARD])
                    .groups(&[WILDCARD])
                    .resources(&[WILDCARD])
                    .namespaces(&[WILDCARD]),
            ],
        ),
        rule(
            "Workload Creators",
            "Capture principals that can create or modify workloads",
            "5e8b2f14-9c3d-4a7e-b061-2d9f8e7c6b54",
            Severity::Medium,
            vec![
                AccessPattern::new(&["create", "update", "patch"])
                    .groups(&["core", "apps", "batch"])
                    .resources(&[
                        "pods",
                        "deployments",
                        "daemonsets",
                        "statefulsets",
                        "replicasets",
                        "jobs",
                        "cronjobs",
                    ]),
            ],
        ),
        rule(
            "Impersonators",
            "Capture principals that can impersonate users, groups or service accounts",
            "c7d4e9a0-2b1f-4e86-9a35-8f0b1c2d3e47",
            Severity::High,
            vec![
                AccessPattern::new(&["impersonate"])
                    .groups(&["core", "authentication.k8s.io"])
                    .resources(&["users", "groups", "serviceaccounts", "userextras"]),
            ],
        ),
        rule(
            "RBAC Escalators",
            "Capture principals that can grant themselves or others additional permissions",
            "e2b6a8c1-4d3f-4f90-8b27-6c5d4e3f2a19",
            Severity::Critical,
            vec![
                AccessPattern::new(&["escalate", "bind"])
                    .groups(&[RBAC_API_GROUP])
                    .resources(&["roles", "clusterroles"]),
                AccessPattern::new(&["create", "update", "patch"])
                    .groups(&[RBAC_API_GROUP])
                    .resources(&["rolebindings", "clusterrolebindings"]),
            ],
        ),
    ]
}

pub fn default_global_exclusions() -> Vec<Exclusion> {
    vec![
        Exclusion {
            comment: "Exclude kube-system from analysis".to_string(),
            added_by: DEFAULT_ADDED_BY.to_string(),
            subject: SubjectPattern {
                namespace: Some("^kube-system$".to_string()),
                ..Default::default()
            },
            ..Default::default()
        },
        Exclusion {
            comment: "Exclude system roles from analysis".to_string(),
            added_by: DEFAULT_ADDED_BY.to_string(),
            subject: SubjectPattern {
                name: Some("^system:".to_string()),
                ..Default::default()
            },
            ..Default::default()
        },
    ]
}

pub fn default_config() -> AnalysisConfig {
    AnalysisConfig {
        info: AnalysisConfigInfo {
            name: "rbactl-default".to_string(),
            description: "Default RBAC analysis rules".to_string(),
            uuid: "9d4c2e71-58a3-4b6f-a0e9-7c1b3d5f8e26".to_string(),
        },
        rules: default_rules(),
        global_exclusions: default_global_exclusions(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn rule_uuids_are_unique_and_valid() {
        let rules = default_rules();
        let uuids: HashSet<&str> = rules.iter().map(|r| r.uuid.as_str()).collect();
        assert_eq!(uuids.len(), rules.len());
        for r in &rules {
            assert!(uuid::Uuid::parse_str(&r.uuid).is_ok(), "{}", r.name);
        }
    }

    #[test]
    fn default_rule_names() {
        let names: Vec<String> = default_rules().into_iter().map(|r| r.name).collect();
        assert_eq!(
            names,
            vec![
                "Secret Readers",
                "Cluster Admins",
                "Workload Creators",
                "Impersonators",
                "RBAC Escalators"
            ]
        );
    }
}
