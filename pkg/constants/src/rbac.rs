//! Kubernetes RBAC API constants.

/// API group of every RBAC object.
pub const RBAC_API_GROUP: &str = "rbac.authorization.k8s.io";

/// `apiVersion` written on generated RBAC objects.
pub const RBAC_API_VERSION: &str = "rbac.authorization.k8s.io/v1";

/// `apiVersion` of core objects (ServiceAccount, List).
pub const CORE_API_VERSION: &str = "v1";

pub const KIND_SERVICE_ACCOUNT: &str = "ServiceAccount";
pub const KIND_USER: &str = "User";
pub const KIND_GROUP: &str = "Group";
pub const KIND_ROLE: &str = "Role";
pub const KIND_CLUSTER_ROLE: &str = "ClusterRole";
pub const KIND_ROLE_BINDING: &str = "RoleBinding";
pub const KIND_CLUSTER_ROLE_BINDING: &str = "ClusterRoleBinding";
pub const KIND_LIST: &str = "List";

/// Matches every verb, group, resource or URL in a policy rule.
pub const WILDCARD: &str = "*";

/// Display name for the empty ("core") API group once a rule is flattened.
pub const CORE_GROUP_DISPLAY: &str = "core";

/// Username prefix of service-account identities: `system:serviceaccount:<ns>:<name>`.
pub const SERVICE_ACCOUNT_USERNAME_PREFIX: &str = "system:serviceaccount:";

/// Group every authenticated request belongs to.
pub const GROUP_AUTHENTICATED: &str = "system:authenticated";

/// Group every anonymous request belongs to.
pub const GROUP_UNAUTHENTICATED: &str = "system:unauthenticated";

/// Name of the built-in discovery ClusterRole and its binding.
pub const DISCOVERY_ROLE_NAME: &str = "system:discovery";

/// Non-resource URLs granted by the discovery role.
pub const DISCOVERY_URLS: &[&str] = &["/healthz", "/version", "/swagger*", "/openapi*", "/api*"];
