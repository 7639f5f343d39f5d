use std::io::Read;
use std::ops::ControlFlow;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use pkg_constants::audit::STDIN_SOURCE;
use pkg_constants::rbac::KIND_LIST;
use pkg_types::document::decode_documents;
use pkg_types::rbac::{
    ClusterRole, ClusterRoleBinding, KubeObject, Role, RoleBinding, ServiceAccount,
};

/// Lists the RBAC object graph of a cluster across all namespaces.
///
/// A live API client implements this outside the workspace; [`StaticObjects`]
/// implements it over manifests.
#[async_trait]
pub trait ClusterSource: Send + Sync {
    async fn list_service_accounts(&self) -> anyhow::Result<Vec<ServiceAccount>>;
    async fn list_roles(&self) -> anyhow::Result<Vec<Role>>;
    async fn list_cluster_roles(&self) -> anyhow::Result<Vec<ClusterRole>>;
    async fn list_role_bindings(&self) -> anyhow::Result<Vec<RoleBinding>>;
    async fn list_cluster_role_bindings(&self) -> anyhow::Result<Vec<ClusterRoleBinding>>;
}

/// RBAC objects loaded from manifest files.
#[derive(Debug, Clone, Default)]
pub struct StaticObjects {
    pub service_accounts: Vec<ServiceAccount>,
    pub roles: Vec<Role>,
    pub cluster_roles: Vec<ClusterRole>,
    pub role_bindings: Vec<RoleBinding>,
    pub cluster_role_bindings: Vec<ClusterRoleBinding>,
}

impl StaticObjects {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, object: KubeObject) {
        match object {
            KubeObject::ServiceAccount(o) => self.service_accounts.push(o),
            KubeObject::Role(o) => self.roles.push(o),
            KubeObject::ClusterRole(o) => self.cluster_roles.push(o),
            KubeObject::RoleBinding(o) => self.role_bindings.push(o),
            KubeObject::ClusterRoleBinding(o) => self.cluster_role_bindings.push(o),
        }
    }

    /// Decode a `List` object, a JSON stream or a YAML multi-document
    /// manifest. Only the RBAC-relevant kinds are kept; everything else,
    /// malformed documents included, is skipped. Returns how many objects
    /// were kept.
    pub fn read_objects(&mut self, buf: &[u8]) -> usize {
        let mut kept = 0;
        decode_documents(buf, |result| {
            match result {
                Ok(value) => kept += self.push_value(value),
                Err(e) => debug!("Skipping undecodable document: {}", e),
            }
            ControlFlow::Continue(())
        });
        kept
    }

    /// Read a manifest from a file path, or from stdin for `-`.
    pub fn read_path(&mut self, path: &str) -> anyhow::Result<usize> {
        let buf = if path == STDIN_SOURCE {
            let mut buf = Vec::new();
            std::io::stdin().read_to_end(&mut buf)?;
            buf
        } else {
            std::fs::read(path)
                .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", path, e))?
        };
        let kept = self.read_objects(&buf);
        debug!("Loaded {} RBAC objects from {}", kept, path);
        Ok(kept)
    }

    pub fn len(&self) -> usize {
        self.service_accounts.len()
            + self.roles.len()
            + self.cluster_roles.len()
            + self.role_bindings.len()
            + self.cluster_role_bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn push_value(&mut self, value: Value) -> usize {
        if value.get("kind").and_then(Value::as_str) == Some(KIND_LIST) {
            let items = match value {
                Value::Object(mut map) => match map.remove("items") {
                    Some(Value::Array(items)) => items,
                    _ => Vec::new(),
                },
                _ => Vec::new(),
            };
            return items.into_iter().map(|item| self.push_value(item)).sum();
        }

        match KubeObject::from_value(value) {
            Ok(Some(object)) => {
                self.push(object);
                1
            }
            Ok(None) => 0,
            Err(e) => {
                debug!("Skipping object: {}", e);
                0
            }
        }
    }
}

#[async_trait]
impl ClusterSource for StaticObjects {
    async fn list_service_accounts(&self) -> anyhow::Result<Vec<ServiceAccount>> {
        Ok(self.service_accounts.clone())
    }

    async fn list_roles(&self) -> anyhow::Result<Vec<Role>> {
        Ok(self.roles.clone())
    }

    async fn list_cluster_roles(&self) -> anyhow::Result<Vec<ClusterRole>> {
        Ok(self.cluster_roles.clone())
    }

    async fn list_role_bindings(&self) -> anyhow::Result<Vec<RoleBinding>> {
        Ok(self.role_bindings.clone())
    }

    async fn list_cluster_role_bindings(&self) -> anyhow::Result<Vec<ClusterRoleBinding>> {
        Ok(self.cluster_role_bindings.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Permissions;

    const MANIFEST: &str = r#"
apiVersion: v1
kind: ServiceAccount
metadata:
  name: sa1
  namespace: ns1
---
apiVersion: v1
kind: Pod
metadata:
  name: ignored
---
apiVersion: rbac.authorization.k8s.io/v1
kind: ClusterRole
metadata:
  name: view
rules:
- apiGroups: [""]
  resources: ["pods"]
  verbs: ["get"]
---
apiVersion: rbac.authorization.k8s.io/v1
kind: RoleBinding
metadata:
  name: view-pods
  namespace: ns1
subjects:
- kind: ServiceAccount
  name: sa1
roleRef:
  apiGroup: rbac.authorization.k8s.io
  kind: ClusterRole
  name: view
"#;

    #[test]
    fn yaml_manifest_keeps_rbac_kinds() {
        let mut objects = StaticObjects::new();
        assert_eq!(objects.read_objects(MANIFEST.as_bytes()), 3);
        assert_eq!(objects.service_accounts.len(), 1);
        assert_eq!(objects.cluster_roles.len(), 1);
        assert_eq!(objects.role_bindings.len(), 1);
    }

    #[test]
    fn list_wrapper_is_unrolled() {
        let list = serde_json::json!({
            "apiVersion": "v1",
            "kind": "List",
            "items": [
                {"apiVersion": "rbac.authorization.k8s.io/v1", "kind": "ClusterRole", "metadata": {"name": "a"}},
                {"apiVersion": "rbac.authorization.k8s.io/v1", "kind": "ClusterRole", "metadata": {"name": "b"}},
                {"apiVersion": "v1", "kind": "ConfigMap", "metadata": {"name": "c"}}
            ]
        });
        let mut objects = StaticObjects::new();
        assert_eq!(objects.read_objects(list.to_string().as_bytes()), 2);
        assert_eq!(objects.cluster_roles[1].metadata.name, "b");
    }

    #[tokio::test]
    async fn permissions_from_static_source() {
        let mut objects = StaticObjects::new();
        objects.read_objects(MANIFEST.as_bytes());
        let perms = Permissions::from_source(&objects).await.unwrap();
        assert!(perms.service_account("ns1", "sa1").is_some());
        let binding = perms.bindings().next().unwrap();
        assert!(perms.role_for(binding).is_some());
    }
}
