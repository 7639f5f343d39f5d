use serde::{Deserialize, Serialize};

use pkg_constants::rbac::{CORE_GROUP_DISPLAY, WILDCARD};
use pkg_types::rbac::{RoleRef, Subject};

use crate::resolver::SubjectPermissions;

/// One atomic grant: a single verb on a single (group, resource) pair, or a
/// single verb on a set of non-resource URLs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NamespacedPolicyRule {
    /// `*` for cluster scope.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    pub verb: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_group: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resource_names: Vec<String>,
    #[serde(
        default,
        rename = "nonResourceURLs",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub non_resource_urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub originated_from: Vec<RoleRef>,
}

/// Display and query form of a subject's permissions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectPolicyList {
    #[serde(flatten)]
    pub subject: Subject,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_to: Vec<NamespacedPolicyRule>,
}

fn normalize(values: &[String], empty_as: &str) -> Vec<String> {
    let mut out: Vec<String> = values
        .iter()
        .map(|v| {
            if v.is_empty() {
                empty_as.to_string()
            } else {
                v.clone()
            }
        })
        .collect();
    out.sort();
    out
}

/// Explode every subject's rules into atomic [`NamespacedPolicyRule`]s.
///
/// Empty API groups become `core`, other empty elements become `*`, and every
/// field is sorted. Resource rules expand to verb x group x resource;
/// non-resource rules expand per verb only.
pub fn flatten(policies: &[SubjectPermissions]) -> Vec<SubjectPolicyList> {
    policies
        .iter()
        .map(|p| {
            let mut allowed_to = Vec::new();
            for (scope, rules) in &p.rules {
                let namespace = if scope.is_cluster() {
                    WILDCARD.to_string()
                } else {
                    scope.namespace().to_string()
                };

                for sourced in rules {
                    let rule = &sourced.rule;
                    let api_groups = normalize(&rule.api_groups, CORE_GROUP_DISPLAY);
                    let resources = normalize(&rule.resources, WILDCARD);
                    let resource_names = normalize(&rule.resource_names, WILDCARD);
                    let verbs = normalize(&rule.verbs, WILDCARD);
                    let non_resource_urls = normalize(&rule.non_resource_urls, WILDCARD);

                    for verb in &verbs {
                        if non_resource_urls.is_empty() {
                            for api_group in &api_groups {
                                for resource in &resources {
                                    allowed_to.push(NamespacedPolicyRule {
                                        namespace: namespace.clone(),
                                        verb: verb.clone(),
                                        api_group: Some(api_group.clone()),
                                        resource: Some(resource.clone()),
                                        resource_names: resource_names.clone(),
                                        non_resource_urls: Vec::new(),
                                        originated_from: sourced.originated_from.clone(),
                                    });
                                }
                            }
                        } else {
                            allowed_to.push(NamespacedPolicyRule {
                                namespace: namespace.clone(),
                                verb: verb.clone(),
                                api_group: None,
                                resource: None,
                                resource_names: Vec::new(),
                                non_resource_urls: non_resource_urls.clone(),
                                originated_from: sourced.originated_from.clone(),
                            });
                        }
                    }
                }
            }
            SubjectPolicyList {
                subject: p.subject.clone(),
                allowed_to,
            }
        })
        .collect()
}
