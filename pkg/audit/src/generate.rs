//! Role synthesis from observed requests.
//!
//! Requests are grouped per user. For each user the generator walks the
//! requests in a fixed order, skips anything already allowed (by the
//! built-in discovery roles or by rules generated so far), widens scope
//! where the options allow, and finally compacts the collected rules into
//! one ClusterRole plus one Role per namespace, each with a binding.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, SecondsFormat, Utc};
use tracing::{debug, trace};

use pkg_constants::audit::{ANNOTATION_GENERATED_AT, ANNOTATION_GENERATED_BY, GENERATOR_NAME};
use pkg_constants::rbac::{
    DISCOVERY_ROLE_NAME, DISCOVERY_URLS, GROUP_AUTHENTICATED, GROUP_UNAUTHENTICATED,
    SERVICE_ACCOUNT_USERNAME_PREFIX,
};
use pkg_rbac::Permissions;
use pkg_rbac::authorize::rule_allows;
use pkg_types::attributes::AttributesRecord;
use pkg_types::rbac::{
    ClusterRole, ClusterRoleBinding, ObjectMeta, PolicyRule, RbacObjects, Role, RoleBinding,
    RoleRef, RoleRefKind, Subject,
};
use pkg_types::validate::{sanitize_name, validate_generated_name};

use crate::compact::compact_rules;
use crate::error::AuditError;

#[derive(Debug, Clone)]
pub struct GenerateOptions {
    /// Name of every generated object.
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    /// Extra verbs granted alongside an observed verb. Empty unless opted in.
    pub verb_expansions: BTreeMap<String, Vec<String>>,
    /// A (verb, group, resource, subresource) seen in more than one namespace
    /// is granted cluster-wide.
    pub expand_multiple_namespaces_to_cluster_scoped: bool,
    /// A (verb, group, resource, subresource) seen on more than one object
    /// name in the same scope is granted without a name restriction.
    pub expand_multiple_names_to_unnamed: bool,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            name: String::new(),
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
            verb_expansions: BTreeMap::new(),
            expand_multiple_namespaces_to_cluster_scoped: true,
            expand_multiple_names_to_unnamed: true,
        }
    }
}

impl GenerateOptions {
    /// The conventional read/write pairings: watch and list imply each other
    /// plus get; update and patch imply each other plus get.
    pub fn standard_verb_expansions() -> BTreeMap<String, Vec<String>> {
        let pairs: [(&str, &[&str]); 4] = [
            ("watch", &["get", "list"]),
            ("list", &["get", "watch"]),
            ("update", &["get", "patch"]),
            ("patch", &["get", "update"]),
        ];
        pairs
            .iter()
            .map(|(verb, extra)| {
                (
                    verb.to_string(),
                    extra.iter().map(|v| v.to_string()).collect(),
                )
            })
            .collect()
    }
}

/// Annotations recording the generator and the generation time.
pub fn generation_annotations(now: DateTime<Utc>) -> BTreeMap<String, String> {
    BTreeMap::from([
        (ANNOTATION_GENERATED_BY.to_string(), GENERATOR_NAME.to_string()),
        (
            ANNOTATION_GENERATED_AT.to_string(),
            now.to_rfc3339_opts(SecondsFormat::Secs, true),
        ),
    ])
}

/// The roles every cluster grants for API discovery.
pub fn discovery_roles() -> RbacObjects {
    RbacObjects {
        cluster_roles: vec![ClusterRole::new(
            ObjectMeta::named(DISCOVERY_ROLE_NAME),
            vec![PolicyRule::new(&["get"]).urls(DISCOVERY_URLS)],
        )],
        cluster_role_bindings: vec![ClusterRoleBinding::new(
            ObjectMeta::named(DISCOVERY_ROLE_NAME),
            RoleRef::new(RoleRefKind::ClusterRole, DISCOVERY_ROLE_NAME),
            vec![
                Subject::group(GROUP_AUTHENTICATED),
                Subject::group(GROUP_UNAUTHENTICATED),
            ],
        )],
        ..Default::default()
    }
}

/// `system:serviceaccount:<ns>:<name>` becomes a ServiceAccount subject;
/// anything else is a User.
pub fn user_to_subject(username: &str) -> Subject {
    if let Some(rest) = username.strip_prefix(SERVICE_ACCOUNT_USERNAME_PREFIX) {
        if let Some((ns, name)) = rest.split_once(':') {
            if !ns.is_empty() && !name.is_empty() && !name.contains(':') {
                return Subject::service_account(ns, name);
            }
        }
    }
    Subject::user(username)
}

fn compare_requests(a: &AttributesRecord, b: &AttributesRecord) -> Ordering {
    // non-resource < resource
    if a.resource_request != b.resource_request {
        return if a.resource_request {
            Ordering::Greater
        } else {
            Ordering::Less
        };
    }

    if !a.resource_request {
        return a.verb.cmp(&b.verb).then_with(|| a.path.cmp(&b.path));
    }

    // cluster-scoped < namespaced, then unnamed < named
    let by_scope = b.namespace.is_empty().cmp(&a.namespace.is_empty());
    let by_name = b.name.is_empty().cmp(&a.name.is_empty());
    let by_verb = match (a.verb.as_str(), b.verb.as_str()) {
        ("list", "get") => Ordering::Less,
        ("get", "list") => Ordering::Greater,
        _ => Ordering::Equal,
    };
    by_scope
        .then(by_name)
        .then(by_verb)
        .then_with(|| a.api_group.cmp(&b.api_group))
        .then_with(|| a.resource.cmp(&b.resource))
        .then_with(|| a.subresource.cmp(&b.subresource))
        .then_with(|| a.namespace.cmp(&b.namespace))
        .then_with(|| a.name.cmp(&b.name))
        .then_with(|| a.verb.cmp(&b.verb))
}

/// Order requests so broad grants are considered before the narrow ones
/// they would cover.
pub fn sort_requests(requests: &mut [AttributesRecord]) {
    requests.sort_by(compare_requests);
}

/// One atomic rule granting exactly `request` (plus configured verb
/// expansions).
pub fn attributes_to_resource_rule(
    request: &AttributesRecord,
    options: &GenerateOptions,
) -> PolicyRule {
    let mut verbs = vec![request.verb.clone()];
    if let Some(extra) = options.verb_expansions.get(&request.verb) {
        verbs.extend(extra.iter().cloned());
    }
    let mut rule = PolicyRule::new(&verbs)
        .groups(&[&request.api_group])
        .resources(&[request.combined_resource()]);
    if !request.name.is_empty() {
        rule.resource_names = vec![request.name.clone()];
    }
    rule
}

/// Same (verb, group, resource, subresource).
fn same_operation(a: &AttributesRecord, b: &AttributesRecord) -> bool {
    a.resource_request
        && b.resource_request
        && a.verb == b.verb
        && a.api_group == b.api_group
        && a.resource == b.resource
        && a.subresource == b.subresource
}

/// Synthesizes the roles for one user's requests.
pub struct Generator {
    existing: Permissions,
    requests: Vec<AttributesRecord>,
    options: GenerateOptions,
    cluster_rules: Vec<PolicyRule>,
    namespaced_rules: BTreeMap<String, Vec<PolicyRule>>,
}

impl Generator {
    /// `existing` is policy already in force (usually [`discovery_roles`]);
    /// requests it allows produce nothing.
    pub fn new(
        existing: RbacObjects,
        requests: Vec<AttributesRecord>,
        options: GenerateOptions,
    ) -> Self {
        Self {
            existing: Permissions::from_rbac_objects(existing),
            requests,
            options,
            cluster_rules: Vec::new(),
            namespaced_rules: BTreeMap::new(),
        }
    }

    fn allowed(&self, request: &AttributesRecord) -> bool {
        if self.existing.allows(request) {
            return true;
        }
        if self.cluster_rules.iter().any(|r| rule_allows(r, request)) {
            return true;
        }
        request.resource_request
            && self
                .namespaced_rules
                .get(&request.namespace)
                .is_some_and(|rules| rules.iter().any(|r| rule_allows(r, request)))
    }

    fn distinct_namespaces(&self, request: &AttributesRecord) -> usize {
        self.requests
            .iter()
            .filter(|r| same_operation(r, request))
            .map(|r| r.namespace.as_str())
            .collect::<BTreeSet<_>>()
            .len()
    }

    /// Distinct names for the operation within `request`'s scope. A
    /// cluster-scoped request counts names across every namespace.
    fn distinct_names(&self, request: &AttributesRecord) -> usize {
        self.requests
            .iter()
            .filter(|r| same_operation(r, request))
            .filter(|r| request.namespace.is_empty() || r.namespace == request.namespace)
            .map(|r| r.name.as_str())
            .collect::<BTreeSet<_>>()
            .len()
    }

    pub fn generate(mut self) -> RbacObjects {
        let mut requests = std::mem::take(&mut self.requests);
        sort_requests(&mut requests);
        self.requests = requests.clone();

        for original in &requests {
            if self.allowed(original) {
                trace!("already allowed: {} {:?}", original.verb, original);
                continue;
            }

            if !original.resource_request {
                self.cluster_rules
                    .push(PolicyRule::new(&[&original.verb]).urls(&[&original.path]));
                continue;
            }

            let mut request = original.clone();
            if self.options.expand_multiple_namespaces_to_cluster_scoped
                && !request.namespace.is_empty()
                && self.distinct_namespaces(&request) > 1
            {
                request.namespace.clear();
                if self.allowed(&request) {
                    continue;
                }
            }
            if self.options.expand_multiple_names_to_unnamed
                && !request.name.is_empty()
                && self.distinct_names(&request) > 1
            {
                request.name.clear();
                if self.allowed(&request) {
                    continue;
                }
            }

            let rule = attributes_to_resource_rule(&request, &self.options);
            if request.namespace.is_empty() {
                self.cluster_rules.push(rule);
            } else {
                self.namespaced_rules
                    .entry(request.namespace.clone())
                    .or_default()
                    .push(rule);
            }
        }

        self.build_objects()
    }

    fn meta(&self, namespace: &str) -> ObjectMeta {
        ObjectMeta {
            name: self.options.name.clone(),
            namespace: namespace.to_string(),
            labels: self.options.labels.clone(),
            annotations: self.options.annotations.clone(),
        }
    }

    fn build_objects(&self) -> RbacObjects {
        let mut objects = RbacObjects::default();
        let Some(username) = self.requests.first().map(|r| r.user.name.clone()) else {
            return objects;
        };
        let subject = user_to_subject(&username);

        if !self.cluster_rules.is_empty() {
            objects.cluster_roles.push(ClusterRole::new(
                self.meta(""),
                compact_rules(&self.cluster_rules),
            ));
            objects.cluster_role_bindings.push(ClusterRoleBinding::new(
                self.meta(""),
                RoleRef::new(RoleRefKind::ClusterRole, &self.options.name),
                vec![subject.clone()],
            ));
        }

        for (namespace, rules) in &self.namespaced_rules {
            objects
                .roles
                .push(Role::new(self.meta(namespace), compact_rules(rules)));
            objects.role_bindings.push(RoleBinding::new(
                self.meta(namespace),
                RoleRef::new(RoleRefKind::Role, &self.options.name),
                vec![subject.clone()],
            ));
        }

        objects
    }
}

/// Objects generated for one observed user.
#[derive(Debug, Clone, PartialEq)]
pub struct UserObjects {
    pub user: String,
    pub objects: RbacObjects,
}

/// Generate roles for every user in `requests`, one object set per user in
/// username order. Objects are named `<name_prefix>:<sanitized user>`.
pub fn synthesize(
    requests: Vec<AttributesRecord>,
    name_prefix: &str,
    options: &GenerateOptions,
) -> Result<Vec<UserObjects>, AuditError> {
    let mut by_user: BTreeMap<String, Vec<AttributesRecord>> = BTreeMap::new();
    for request in requests {
        by_user
            .entry(request.user.name.clone())
            .or_default()
            .push(request);
    }

    if by_user.is_empty() {
        return Err(AuditError::NoMatchingEvents);
    }

    let mut generated = Vec::with_capacity(by_user.len());
    for (user, requests) in by_user {
        let name = format!("{}:{}", name_prefix, sanitize_name(&user));
        validate_generated_name(&name).map_err(|e| AuditError::Config(e.to_string()))?;
        debug!("Generating roles for {} from {} request(s)", user, requests.len());

        let user_options = GenerateOptions {
            name,
            ..options.clone()
        };
        let objects = Generator::new(discovery_roles(), requests, user_options).generate();
        generated.push(UserObjects { user, objects });
    }
    Ok(generated)
}
