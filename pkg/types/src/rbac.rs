use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use pkg_constants::rbac::{
    CORE_API_VERSION, KIND_CLUSTER_ROLE, KIND_CLUSTER_ROLE_BINDING, KIND_GROUP, KIND_ROLE,
    KIND_ROLE_BINDING, KIND_SERVICE_ACCOUNT, KIND_USER, RBAC_API_GROUP, RBAC_API_VERSION,
};

// --- Object metadata ---

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
}

impl ObjectMeta {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn namespaced(namespace: &str, name: &str) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
            ..Default::default()
        }
    }
}

// --- Policy rules ---

/// A single access grant. Empty lists mean "unrestricted" for resource names
/// and "nothing" for the other fields; the empty string in `api_groups` is
/// the core group.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyRule {
    #[serde(default)]
    pub verbs: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub api_groups: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resource_names: Vec<String>,
    #[serde(
        default,
        rename = "nonResourceURLs",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub non_resource_urls: Vec<String>,
}

impl PolicyRule {
    /// Start a rule granting `verbs`; chain the other setters to fill it in.
    pub fn new<S: AsRef<str>>(verbs: &[S]) -> Self {
        Self {
            verbs: to_strings(verbs),
            ..Default::default()
        }
    }

    pub fn groups<S: AsRef<str>>(mut self, groups: &[S]) -> Self {
        self.api_groups = to_strings(groups);
        self
    }

    pub fn resources<S: AsRef<str>>(mut self, resources: &[S]) -> Self {
        self.resources = to_strings(resources);
        self
    }

    pub fn names<S: AsRef<str>>(mut self, names: &[S]) -> Self {
        self.resource_names = to_strings(names);
        self
    }

    pub fn urls<S: AsRef<str>>(mut self, urls: &[S]) -> Self {
        self.non_resource_urls = to_strings(urls);
        self
    }

    pub fn is_non_resource(&self) -> bool {
        !self.non_resource_urls.is_empty()
    }

    /// Short human-readable form listing only the populated fields, e.g.
    /// `{APIGroups:["apps"], Resources:["deployments"], Verbs:["get"]}`.
    pub fn compact_string(&self) -> String {
        let fields = [
            ("APIGroups", &self.api_groups),
            ("Resources", &self.resources),
            ("NonResourceURLs", &self.non_resource_urls),
            ("ResourceNames", &self.resource_names),
            ("Verbs", &self.verbs),
        ];
        let parts: Vec<String> = fields
            .iter()
            .filter(|(_, values)| !values.is_empty())
            .map(|(label, values)| {
                let quoted: Vec<String> = values.iter().map(|v| format!("{:?}", v)).collect();
                format!("{}:[{}]", label, quoted.join(" "))
            })
            .collect();
        format!("{{{}}}", parts.join(", "))
    }
}

fn to_strings<S: AsRef<str>>(values: &[S]) -> Vec<String> {
    values.iter().map(|v| v.as_ref().to_string()).collect()
}

// --- Subject ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SubjectKind {
    User,
    Group,
    ServiceAccount,
}

impl fmt::Display for SubjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubjectKind::User => write!(f, "{}", KIND_USER),
            SubjectKind::Group => write!(f, "{}", KIND_GROUP),
            SubjectKind::ServiceAccount => write!(f, "{}", KIND_SERVICE_ACCOUNT),
        }
    }
}

/// Identity being granted access. Two subjects are equal when kind, name and
/// namespace agree; `api_group` is carried for output only.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subject {
    pub kind: SubjectKind,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_group: String,
    pub name: String,
    /// Meaningful only for service accounts.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
}

impl Subject {
    pub fn user(name: &str) -> Self {
        Self {
            kind: SubjectKind::User,
            api_group: RBAC_API_GROUP.to_string(),
            name: name.to_string(),
            namespace: String::new(),
        }
    }

    pub fn group(name: &str) -> Self {
        Self {
            kind: SubjectKind::Group,
            api_group: RBAC_API_GROUP.to_string(),
            name: name.to_string(),
            namespace: String::new(),
        }
    }

    pub fn service_account(namespace: &str, name: &str) -> Self {
        Self {
            kind: SubjectKind::ServiceAccount,
            api_group: String::new(),
            name: name.to_string(),
            namespace: namespace.to_string(),
        }
    }

    /// Full identity string used to group permissions per subject.
    pub fn identity(&self) -> String {
        format!(
            "{}|{}|{}|{}",
            self.kind, self.api_group, self.namespace, self.name
        )
    }
}

impl PartialEq for Subject {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.name == other.name && self.namespace == other.namespace
    }
}

impl Eq for Subject {}

impl Hash for Subject {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.kind.hash(state);
        self.name.hash(state);
        self.namespace.hash(state);
    }
}

// --- RoleRef ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RoleRefKind {
    Role,
    ClusterRole,
}

impl fmt::Display for RoleRefKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoleRefKind::Role => write!(f, "{}", KIND_ROLE),
            RoleRefKind::ClusterRole => write!(f, "{}", KIND_CLUSTER_ROLE),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleRef {
    #[serde(default)]
    pub api_group: String,
    pub kind: RoleRefKind,
    pub name: String,
}

impl RoleRef {
    pub fn new(kind: RoleRefKind, name: &str) -> Self {
        Self {
            api_group: RBAC_API_GROUP.to_string(),
            kind,
            name: name.to_string(),
        }
    }
}

// --- ServiceAccount ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceAccount {
    #[serde(default)]
    pub api_version: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub metadata: ObjectMeta,
}

impl ServiceAccount {
    pub fn new(namespace: &str, name: &str) -> Self {
        Self {
            api_version: CORE_API_VERSION.to_string(),
            kind: KIND_SERVICE_ACCOUNT.to_string(),
            metadata: ObjectMeta::namespaced(namespace, name),
        }
    }
}

// --- Role / ClusterRole ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Role {
    #[serde(default)]
    pub api_version: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub rules: Vec<PolicyRule>,
}

impl Role {
    pub fn new(metadata: ObjectMeta, rules: Vec<PolicyRule>) -> Self {
        Self {
            api_version: RBAC_API_VERSION.to_string(),
            kind: KIND_ROLE.to_string(),
            metadata,
            rules,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterRole {
    #[serde(default)]
    pub api_version: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub rules: Vec<PolicyRule>,
}

impl ClusterRole {
    pub fn new(metadata: ObjectMeta, rules: Vec<PolicyRule>) -> Self {
        Self {
            api_version: RBAC_API_VERSION.to_string(),
            kind: KIND_CLUSTER_ROLE.to_string(),
            metadata,
            rules,
        }
    }
}

// --- RoleBinding / ClusterRoleBinding ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleBinding {
    #[serde(default)]
    pub api_version: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub subjects: Vec<Subject>,
    pub role_ref: RoleRef,
}

impl RoleBinding {
    pub fn new(metadata: ObjectMeta, role_ref: RoleRef, subjects: Vec<Subject>) -> Self {
        Self {
            api_version: RBAC_API_VERSION.to_string(),
            kind: KIND_ROLE_BINDING.to_string(),
            metadata,
            subjects,
            role_ref,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterRoleBinding {
    #[serde(default)]
    pub api_version: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub subjects: Vec<Subject>,
    pub role_ref: RoleRef,
}

impl ClusterRoleBinding {
    pub fn new(metadata: ObjectMeta, role_ref: RoleRef, subjects: Vec<Subject>) -> Self {
        Self {
            api_version: RBAC_API_VERSION.to_string(),
            kind: KIND_CLUSTER_ROLE_BINDING.to_string(),
            metadata,
            subjects,
            role_ref,
        }
    }
}

// --- Object sets ---

/// One of the five object kinds RBAC analysis cares about.
#[derive(Debug, Clone, PartialEq)]
pub enum KubeObject {
    ServiceAccount(ServiceAccount),
    Role(Role),
    ClusterRole(ClusterRole),
    RoleBinding(RoleBinding),
    ClusterRoleBinding(ClusterRoleBinding),
}

impl KubeObject {
    /// Decode a generic object by its `apiVersion`/`kind`.
    /// Returns `Ok(None)` for kinds that carry no RBAC meaning.
    pub fn from_value(value: Value) -> Result<Option<Self>> {
        let api_version = value
            .get("apiVersion")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let kind = value
            .get("kind")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        if kind.is_empty() {
            bail!("object has no kind");
        }

        let group = api_version
            .split_once('/')
            .map(|(group, _)| group)
            .unwrap_or_default();

        let object = match (group, kind.as_str()) {
            ("", KIND_SERVICE_ACCOUNT) => KubeObject::ServiceAccount(serde_json::from_value(value)?),
            (RBAC_API_GROUP, KIND_ROLE) => KubeObject::Role(serde_json::from_value(value)?),
            (RBAC_API_GROUP, KIND_CLUSTER_ROLE) => {
                KubeObject::ClusterRole(serde_json::from_value(value)?)
            }
            (RBAC_API_GROUP, KIND_ROLE_BINDING) => {
                KubeObject::RoleBinding(serde_json::from_value(value)?)
            }
            (RBAC_API_GROUP, KIND_CLUSTER_ROLE_BINDING) => {
                KubeObject::ClusterRoleBinding(serde_json::from_value(value)?)
            }
            _ => return Ok(None),
        };
        Ok(Some(object))
    }
}

/// Generated or loaded RBAC objects, grouped by kind.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RbacObjects {
    pub roles: Vec<Role>,
    pub cluster_roles: Vec<ClusterRole>,
    pub role_bindings: Vec<RoleBinding>,
    pub cluster_role_bindings: Vec<ClusterRoleBinding>,
}

impl RbacObjects {
    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
            && self.cluster_roles.is_empty()
            && self.role_bindings.is_empty()
            && self.cluster_role_bindings.is_empty()
    }

    pub fn into_objects(self) -> Vec<KubeObject> {
        let mut objects = Vec::new();
        objects.extend(self.roles.into_iter().map(KubeObject::Role));
        objects.extend(self.cluster_roles.into_iter().map(KubeObject::ClusterRole));
        objects.extend(self.role_bindings.into_iter().map(KubeObject::RoleBinding));
        objects.extend(
            self.cluster_role_bindings
                .into_iter()
                .map(KubeObject::ClusterRoleBinding),
        );
        objects
    }
}
