use std::collections::BTreeMap;
use std::fmt;

use tracing::{debug, info};

use pkg_types::rbac::{
    ClusterRole, ClusterRoleBinding, KubeObject, PolicyRule, RbacObjects, Role, RoleBinding,
    RoleRef, RoleRefKind, ServiceAccount, Subject,
};

use crate::source::ClusterSource;

/// Where a role or binding applies: the whole cluster, or one namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Scope {
    Cluster,
    Namespaced(String),
}

impl Scope {
    /// An empty namespace means cluster scope.
    pub fn from_namespace(namespace: &str) -> Self {
        if namespace.is_empty() {
            Scope::Cluster
        } else {
            Scope::Namespaced(namespace.to_string())
        }
    }

    /// Namespace name, or `""` for cluster scope.
    pub fn namespace(&self) -> &str {
        match self {
            Scope::Cluster => "",
            Scope::Namespaced(ns) => ns,
        }
    }

    pub fn is_cluster(&self) -> bool {
        matches!(self, Scope::Cluster)
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Cluster => write!(f, "<cluster>"),
            Scope::Namespaced(ns) => write!(f, "{}", ns),
        }
    }
}

/// A Role (namespaced) or ClusterRole (cluster scope).
#[derive(Debug, Clone, PartialEq)]
pub struct ScopedRole {
    pub scope: Scope,
    pub name: String,
    pub rules: Vec<PolicyRule>,
}

/// A RoleBinding (namespaced) or ClusterRoleBinding (cluster scope).
#[derive(Debug, Clone, PartialEq)]
pub struct ScopedBinding {
    pub scope: Scope,
    pub name: String,
    pub role_ref: RoleRef,
    pub subjects: Vec<Subject>,
}

impl From<Role> for ScopedRole {
    fn from(role: Role) -> Self {
        Self {
            scope: Scope::from_namespace(&role.metadata.namespace),
            name: role.metadata.name,
            rules: role.rules,
        }
    }
}

impl From<ClusterRole> for ScopedRole {
    fn from(role: ClusterRole) -> Self {
        Self {
            scope: Scope::Cluster,
            name: role.metadata.name,
            rules: role.rules,
        }
    }
}

impl From<RoleBinding> for ScopedBinding {
    fn from(binding: RoleBinding) -> Self {
        Self {
            scope: Scope::from_namespace(&binding.metadata.namespace),
            name: binding.metadata.name,
            role_ref: binding.role_ref,
            subjects: binding.subjects,
        }
    }
}

impl From<ClusterRoleBinding> for ScopedBinding {
    fn from(binding: ClusterRoleBinding) -> Self {
        Self {
            scope: Scope::Cluster,
            name: binding.metadata.name,
            role_ref: binding.role_ref,
            subjects: binding.subjects,
        }
    }
}

/// Snapshot of the RBAC object graph of one cluster.
///
/// Built once per analysis run and only read afterwards. Cluster roles and
/// cluster bindings live under [`Scope::Cluster`].
#[derive(Debug, Clone, Default)]
pub struct Permissions {
    /// namespace -> name -> ServiceAccount
    pub service_accounts: BTreeMap<String, BTreeMap<String, ServiceAccount>>,
    pub roles: BTreeMap<Scope, BTreeMap<String, ScopedRole>>,
    pub role_bindings: BTreeMap<Scope, BTreeMap<String, ScopedBinding>>,
}

impl Permissions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the snapshot from already decoded objects.
    pub fn from_objects(objects: impl IntoIterator<Item = KubeObject>) -> Self {
        let mut permissions = Self::new();
        for object in objects {
            permissions.insert(object);
        }
        permissions
    }

    pub fn from_rbac_objects(objects: RbacObjects) -> Self {
        Self::from_objects(objects.into_objects())
    }

    /// Build the snapshot by listing every relevant kind from `source`.
    pub async fn from_source(source: &dyn ClusterSource) -> anyhow::Result<Self> {
        let service_accounts = source.list_service_accounts().await?;
        let roles = source.list_roles().await?;
        let cluster_roles = source.list_cluster_roles().await?;
        let role_bindings = source.list_role_bindings().await?;
        let cluster_role_bindings = source.list_cluster_role_bindings().await?;

        info!(
            "Loaded {} service accounts, {} roles, {} cluster roles, {} role bindings, {} cluster role bindings",
            service_accounts.len(),
            roles.len(),
            cluster_roles.len(),
            role_bindings.len(),
            cluster_role_bindings.len()
        );

        let objects = service_accounts
            .into_iter()
            .map(KubeObject::ServiceAccount)
            .chain(roles.into_iter().map(KubeObject::Role))
            .chain(cluster_roles.into_iter().map(KubeObject::ClusterRole))
            .chain(role_bindings.into_iter().map(KubeObject::RoleBinding))
            .chain(
                cluster_role_bindings
                    .into_iter()
                    .map(KubeObject::ClusterRoleBinding),
            );
        Ok(Self::from_objects(objects))
    }

    /// Add one object. A later object with the same scope and name replaces
    /// the earlier one.
    pub fn insert(&mut self, object: KubeObject) {
        match object {
            KubeObject::ServiceAccount(sa) => {
                debug!(
                    "ServiceAccount {}/{}",
                    sa.metadata.namespace, sa.metadata.name
                );
                self.service_accounts
                    .entry(sa.metadata.namespace.clone())
                    .or_default()
                    .insert(sa.metadata.name.clone(), sa);
            }
            KubeObject::Role(role) => self.insert_role(role.into()),
            KubeObject::ClusterRole(role) => self.insert_role(role.into()),
            KubeObject::RoleBinding(binding) => self.insert_binding(binding.into()),
            KubeObject::ClusterRoleBinding(binding) => self.insert_binding(binding.into()),
        }
    }

    pub fn insert_role(&mut self, role: ScopedRole) {
        debug!("Role {}/{}", role.scope, role.name);
        self.roles
            .entry(role.scope.clone())
            .or_default()
            .insert(role.name.clone(), role);
    }

    pub fn insert_binding(&mut self, binding: ScopedBinding) {
        debug!("RoleBinding {}/{}", binding.scope, binding.name);
        self.role_bindings
            .entry(binding.scope.clone())
            .or_default()
            .insert(binding.name.clone(), binding);
    }

    /// Resolve a binding's role reference.
    ///
    /// A ClusterRole reference always resolves against the cluster scope, a
    /// Role reference against the binding's own scope. Returns `None` for a
    /// dangling reference.
    pub fn role_for(&self, binding: &ScopedBinding) -> Option<&ScopedRole> {
        let scope = match binding.role_ref.kind {
            RoleRefKind::ClusterRole => &Scope::Cluster,
            RoleRefKind::Role => &binding.scope,
        };
        self.roles.get(scope)?.get(&binding.role_ref.name)
    }

    /// Every binding, cluster scope first, then namespaces in order.
    pub fn bindings(&self) -> impl Iterator<Item = &ScopedBinding> {
        self.role_bindings.values().flat_map(|by_name| by_name.values())
    }

    pub fn service_account(&self, namespace: &str, name: &str) -> Option<&ServiceAccount> {
        self.service_accounts.get(namespace)?.get(name)
    }

    pub fn is_empty(&self) -> bool {
        self.service_accounts.is_empty() && self.roles.is_empty() && self.role_bindings.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pkg_types::rbac::ObjectMeta;

    fn view_role() -> ClusterRole {
        ClusterRole::new(
            ObjectMeta::named("view"),
            vec![PolicyRule::new(&["get"]).groups(&[""]).resources(&["pods"])],
        )
    }

    #[test]
    fn cluster_role_ref_resolves_against_cluster_scope() {
        let local = Role::new(
            ObjectMeta::namespaced("ns1", "view"),
            vec![PolicyRule::new(&["delete"]).resources(&["pods"])],
        );
        let binding = RoleBinding::new(
            ObjectMeta::namespaced("ns1", "rb"),
            RoleRef::new(RoleRefKind::ClusterRole, "view"),
            vec![Subject::user("alice")],
        );
        let perms = Permissions::from_objects(vec![
            KubeObject::ClusterRole(view_role()),
            KubeObject::Role(local),
            KubeObject::RoleBinding(binding.clone()),
        ]);

        let scoped: ScopedBinding = binding.into();
        let role = perms.role_for(&scoped).unwrap();
        assert_eq!(role.scope, Scope::Cluster);
        assert_eq!(role.rules[0].verbs, vec!["get".to_string()]);
    }

    #[test]
    fn role_ref_resolves_against_binding_namespace() {
        let role = Role::new(ObjectMeta::namespaced("ns1", "editor"), vec![]);
        let perms = Permissions::from_objects(vec![KubeObject::Role(role)]);

        let in_ns1 = ScopedBinding {
            scope: Scope::from_namespace("ns1"),
            name: "rb".to_string(),
            role_ref: RoleRef::new(RoleRefKind::Role, "editor"),
            subjects: vec![],
        };
        assert!(perms.role_for(&in_ns1).is_some());

        let in_ns2 = ScopedBinding {
            scope: Scope::from_namespace("ns2"),
            ..in_ns1
        };
        assert!(perms.role_for(&in_ns2).is_none());
    }

    #[test]
    fn cluster_bindings_come_first() {
        let crb = ClusterRoleBinding::new(
            ObjectMeta::named("z"),
            RoleRef::new(RoleRefKind::ClusterRole, "view"),
            vec![],
        );
        let rb = RoleBinding::new(
            ObjectMeta::namespaced("a", "a"),
            RoleRef::new(RoleRefKind::ClusterRole, "view"),
            vec![],
        );
        let perms = Permissions::from_objects(vec![
            KubeObject::RoleBinding(rb),
            KubeObject::ClusterRoleBinding(crb),
        ]);
        let scopes: Vec<&Scope> = perms.bindings().map(|b| &b.scope).collect();
        assert_eq!(scopes, vec![&Scope::Cluster, &Scope::from_namespace("a")]);
    }
}
