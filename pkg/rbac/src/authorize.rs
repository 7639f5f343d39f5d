//! RBAC rule evaluation with Kubernetes authorizer semantics.

use pkg_constants::rbac::{SERVICE_ACCOUNT_USERNAME_PREFIX, WILDCARD};
use pkg_types::attributes::{AttributesRecord, RequestUser};
use pkg_types::rbac::{PolicyRule, Subject, SubjectKind};

use crate::store::{Permissions, Scope, ScopedBinding};

fn has(values: &[String], wanted: &str) -> bool {
    values.iter().any(|v| v == WILDCARD || v == wanted)
}

fn resource_matches(rule: &PolicyRule, attrs: &AttributesRecord) -> bool {
    let combined = attrs.combined_resource();
    rule.resources.iter().any(|r| {
        r == WILDCARD
            || *r == combined
            || (!attrs.subresource.is_empty() && *r == format!("*/{}", attrs.subresource))
    })
}

fn url_matches(rule: &PolicyRule, path: &str) -> bool {
    rule.non_resource_urls.iter().any(|u| {
        if u == WILDCARD || u == path {
            return true;
        }
        match u.strip_suffix('*') {
            Some(prefix) => path.starts_with(prefix),
            None => false,
        }
    })
}

/// Does `rule` permit the request described by `attrs`?
pub fn rule_allows(rule: &PolicyRule, attrs: &AttributesRecord) -> bool {
    if !has(&rule.verbs, &attrs.verb) {
        return false;
    }
    if attrs.resource_request {
        has(&rule.api_groups, &attrs.api_group)
            && resource_matches(rule, attrs)
            && (rule.resource_names.is_empty() || rule.resource_names.contains(&attrs.name))
    } else {
        url_matches(rule, &attrs.path)
    }
}

/// Does `subject` name the requesting user (directly, by group, or as a
/// service account identity)?
pub fn subject_matches(subject: &Subject, user: &RequestUser, binding_namespace: &str) -> bool {
    match subject.kind {
        SubjectKind::User => subject.name == user.name,
        SubjectKind::Group => user.groups.iter().any(|g| *g == subject.name),
        SubjectKind::ServiceAccount => {
            let ns = if subject.namespace.is_empty() {
                binding_namespace
            } else {
                &subject.namespace
            };
            user.name == format!("{}{}:{}", SERVICE_ACCOUNT_USERNAME_PREFIX, ns, subject.name)
        }
    }
}

fn binding_applies(binding: &ScopedBinding, attrs: &AttributesRecord) -> bool {
    match &binding.scope {
        Scope::Cluster => true,
        Scope::Namespaced(ns) => attrs.resource_request && *ns == attrs.namespace,
    }
}

impl Permissions {
    /// Would any binding in this snapshot authorize `attrs`?
    pub fn allows(&self, attrs: &AttributesRecord) -> bool {
        self.bindings()
            .filter(|b| binding_applies(b, attrs))
            .filter(|b| {
                b.subjects
                    .iter()
                    .any(|s| subject_matches(s, &attrs.user, b.scope.namespace()))
            })
            .filter_map(|b| self.role_for(b))
            .any(|role| role.rules.iter().any(|rule| rule_allows(rule, attrs)))
    }
}
