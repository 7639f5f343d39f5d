//! Versioned audit schemas and their conversion to [`AuditEvent`].
//!
//! [`EventScheme`] is a plain table from group/version/kind to a converter.
//! The pipeline receives one explicitly, so callers may register additional
//! shapes or strip versions they do not trust.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use pkg_constants::audit::{AUDIT_API_GROUP, INTERNAL_VERSION, KIND_EVENT};
use pkg_types::audit::{AuditEvent, ObjectReference, UserInfo};

use crate::error::AuditError;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupVersionKind {
    pub group: String,
    pub version: String,
    pub kind: String,
}

impl GroupVersionKind {
    pub fn new(group: &str, version: &str, kind: &str) -> Self {
        Self {
            group: group.to_string(),
            version: version.to_string(),
            kind: kind.to_string(),
        }
    }

    /// Read `apiVersion` (`group/version` or bare `version`) and `kind`.
    pub fn of(value: &Value) -> Self {
        let api_version = value
            .get("apiVersion")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let kind = value.get("kind").and_then(Value::as_str).unwrap_or_default();
        let (group, version) = split_api_version(api_version);
        Self::new(group, version, kind)
    }

    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }
}

impl fmt::Display for GroupVersionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, Kind={}", self.api_version(), self.kind)
    }
}

/// `apps/v1` -> (`apps`, `v1`); `v1` -> (``, `v1`).
pub fn split_api_version(api_version: &str) -> (&str, &str) {
    match api_version.split_once('/') {
        Some((group, version)) => (group, version),
        None => ("", api_version),
    }
}

pub type Converter = fn(Value) -> Result<AuditEvent, String>;

/// Table of known event schemas.
#[derive(Clone)]
pub struct EventScheme {
    converters: HashMap<GroupVersionKind, Converter>,
}

impl fmt::Debug for EventScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut known: Vec<String> = self.converters.keys().map(|k| k.to_string()).collect();
        known.sort();
        f.debug_struct("EventScheme").field("known", &known).finish()
    }
}

impl Default for EventScheme {
    fn default() -> Self {
        Self::audit_events()
    }
}

impl EventScheme {
    /// An empty table; every record is an unknown kind.
    pub fn empty() -> Self {
        Self {
            converters: HashMap::new(),
        }
    }

    /// `audit.k8s.io` Event in `v1`, `v1beta1`, `v1alpha1` and the internal form.
    pub fn audit_events() -> Self {
        let mut scheme = Self::empty();
        scheme.register(
            GroupVersionKind::new(AUDIT_API_GROUP, INTERNAL_VERSION, KIND_EVENT),
            convert_internal,
        );
        scheme.register(
            GroupVersionKind::new(AUDIT_API_GROUP, "v1", KIND_EVENT),
            convert_v1,
        );
        scheme.register(
            GroupVersionKind::new(AUDIT_API_GROUP, "v1beta1", KIND_EVENT),
            convert_v1beta1,
        );
        scheme.register(
            GroupVersionKind::new(AUDIT_API_GROUP, "v1alpha1", KIND_EVENT),
            convert_v1alpha1,
        );
        scheme
    }

    pub fn register(&mut self, gvk: GroupVersionKind, converter: Converter) {
        self.converters.insert(gvk, converter);
    }

    pub fn recognizes(&self, gvk: &GroupVersionKind) -> bool {
        self.converters.contains_key(gvk)
    }

    /// Instantiate a generic record as its declared kind and convert it to
    /// the canonical event form.
    pub fn convert(&self, value: Value) -> Result<AuditEvent, AuditError> {
        let gvk = GroupVersionKind::of(&value);
        let converter = self
            .converters
            .get(&gvk)
            .ok_or_else(|| AuditError::UnknownKind {
                api_version: gvk.api_version(),
                kind: gvk.kind.clone(),
            })?;
        converter(value).map_err(|message| AuditError::Conversion {
            api_version: gvk.api_version(),
            kind: gvk.kind.clone(),
            message,
        })
    }
}

// ─── Versioned wire shapes ──────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ResponseStatus {
    code: Option<i32>,
}

/// `objectRef` in v1alpha1 carries `apiVersion` as `group/version`.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct WireObjectReference {
    resource: String,
    namespace: String,
    name: String,
    uid: String,
    api_group: String,
    api_version: String,
    resource_version: String,
    subresource: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct WireEvent {
    level: String,
    #[serde(rename = "auditID")]
    audit_id: String,
    stage: String,
    #[serde(rename = "requestURI")]
    request_uri: String,
    verb: String,
    user: UserInfo,
    impersonated_user: Option<UserInfo>,
    #[serde(rename = "sourceIPs")]
    source_ips: Vec<String>,
    user_agent: String,
    object_ref: Option<WireObjectReference>,
    response_status: Option<ResponseStatus>,
    request_received_timestamp: Option<DateTime<Utc>>,
    stage_timestamp: Option<DateTime<Utc>>,
    /// Only in v1alpha1/v1beta1.
    timestamp: Option<DateTime<Utc>>,
    annotations: BTreeMap<String, String>,
}

impl WireEvent {
    fn decode(value: Value) -> Result<Self, String> {
        serde_json::from_value(value).map_err(|e| e.to_string())
    }

    fn into_event(self, split_ref_api_version: bool) -> AuditEvent {
        let object_ref = self.object_ref.map(|r| {
            let (api_group, api_version) = if split_ref_api_version {
                let (group, version) = split_api_version(&r.api_version);
                (group.to_string(), version.to_string())
            } else {
                (r.api_group, r.api_version)
            };
            ObjectReference {
                resource: r.resource,
                namespace: r.namespace,
                name: r.name,
                uid: r.uid,
                api_group,
                api_version,
                resource_version: r.resource_version,
                subresource: r.subresource,
            }
        });

        AuditEvent {
            level: self.level,
            audit_id: self.audit_id,
            stage: self.stage,
            request_uri: self.request_uri,
            verb: self.verb,
            user: self.user,
            impersonated_user: self.impersonated_user,
            source_ips: self.source_ips,
            user_agent: self.user_agent,
            object_ref,
            response_code: self.response_status.and_then(|s| s.code),
            request_received_timestamp: self.request_received_timestamp.or(self.timestamp),
            stage_timestamp: self.stage_timestamp.or(self.timestamp),
            annotations: self.annotations,
        }
    }
}

fn convert_internal(value: Value) -> Result<AuditEvent, String> {
    serde_json::from_value(value).map_err(|e| e.to_string())
}

fn convert_v1(value: Value) -> Result<AuditEvent, String> {
    Ok(WireEvent::decode(value)?.into_event(false))
}

fn convert_v1beta1(value: Value) -> Result<AuditEvent, String> {
    Ok(WireEvent::decode(value)?.into_event(false))
}

fn convert_v1alpha1(value: Value) -> Result<AuditEvent, String> {
    Ok(WireEvent::decode(value)?.into_event(true))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn converts_v1_event() {
        let event = EventScheme::default()
            .convert(json!({
                "apiVersion": "audit.k8s.io/v1",
                "kind": "Event",
                "auditID": "1",
                "verb": "get",
                "requestURI": "/api/v1/namespaces/ns1/pods/p",
                "user": {"username": "alice", "groups": ["devs"]},
                "objectRef": {"resource": "pods", "namespace": "ns1", "name": "p", "apiVersion": "v1"},
                "responseStatus": {"code": 200},
                "requestReceivedTimestamp": "2024-01-02T03:04:05.000001Z"
            }))
            .unwrap();
        assert_eq!(event.audit_id, "1");
        assert_eq!(event.user.groups, vec!["devs".to_string()]);
        assert_eq!(event.response_code, Some(200));
        let r = event.object_ref.unwrap();
        assert_eq!(r.api_group, "");
        assert_eq!(r.api_version, "v1");
        assert!(event.request_received_timestamp.is_some());
    }

    #[test]
    fn v1alpha1_splits_object_ref_api_version() {
        let event = EventScheme::default()
            .convert(json!({
                "apiVersion": "audit.k8s.io/v1alpha1",
                "kind": "Event",
                "verb": "list",
                "timestamp": "2018-01-02T03:04:05Z",
                "user": {"username": "bob"},
                "objectRef": {"resource": "deployments", "namespace": "ns1", "apiVersion": "apps/v1beta1"}
            }))
            .unwrap();
        let r = event.object_ref.as_ref().unwrap();
        assert_eq!(r.api_group, "apps");
        assert_eq!(r.api_version, "v1beta1");
        assert_eq!(event.request_received_timestamp, event.stage_timestamp);
        assert!(event.request_received_timestamp.is_some());
    }

    #[test]
    fn unknown_kind_and_bad_shape_are_errors() {
        let scheme = EventScheme::default();
        let err = scheme
            .convert(json!({"apiVersion": "v1", "kind": "Pod"}))
            .unwrap_err();
        assert!(matches!(err, AuditError::UnknownKind { .. }));

        let err = scheme
            .convert(json!({"apiVersion": "audit.k8s.io/v1", "kind": "Event", "user": "not-an-object"}))
            .unwrap_err();
        assert!(matches!(err, AuditError::Conversion { .. }));

        assert!(EventScheme::empty()
            .convert(json!({"apiVersion": "audit.k8s.io/v1", "kind": "Event"}))
            .is_err());
    }
}
