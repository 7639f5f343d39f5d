use serde::{Deserialize, Serialize};

/// The user an access attempt was made as.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestUser {
    pub name: String,
    #[serde(default)]
    pub groups: Vec<String>,
}

/// One observed access attempt, in authorizer terms.
///
/// `resource_request` separates resource-style calls (verb on
/// group/resource/name) from raw non-resource URL calls (verb on `path`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttributesRecord {
    pub user: RequestUser,
    pub verb: String,
    pub namespace: String,
    pub api_group: String,
    pub api_version: String,
    pub resource: String,
    pub subresource: String,
    pub name: String,
    pub resource_request: bool,
    pub path: String,
}

impl AttributesRecord {
    pub fn resource(user: &str, verb: &str, api_group: &str, resource: &str) -> Self {
        Self {
            user: RequestUser {
                name: user.to_string(),
                groups: Vec::new(),
            },
            verb: verb.to_string(),
            api_group: api_group.to_string(),
            resource: resource.to_string(),
            resource_request: true,
            ..Default::default()
        }
    }

    pub fn non_resource(user: &str, verb: &str, path: &str) -> Self {
        Self {
            user: RequestUser {
                name: user.to_string(),
                groups: Vec::new(),
            },
            verb: verb.to_string(),
            path: path.to_string(),
            resource_request: false,
            ..Default::default()
        }
    }

    pub fn in_namespace(mut self, namespace: &str) -> Self {
        self.namespace = namespace.to_string();
        self
    }

    pub fn named(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn with_subresource(mut self, subresource: &str) -> Self {
        self.subresource = subresource.to_string();
        self
    }

    pub fn with_groups(mut self, groups: &[&str]) -> Self {
        self.user.groups = groups.iter().map(|g| g.to_string()).collect();
        self
    }

    /// `resource` or `resource/subresource`, the form RBAC rules list.
    pub fn combined_resource(&self) -> String {
        if self.subresource.is_empty() {
            self.resource.clone()
        } else {
            format!("{}/{}", self.resource, self.subresource)
        }
    }
}
