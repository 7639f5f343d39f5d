//! Audit ingestion and policy generation constants.

/// API group of Kubernetes audit events.
pub const AUDIT_API_GROUP: &str = "audit.k8s.io";

/// Versioned audit schemas understood by the decoder.
pub const AUDIT_VERSIONS: &[&str] = &["v1", "v1beta1", "v1alpha1"];

/// Pseudo-version of the canonical in-memory event form.
pub const INTERNAL_VERSION: &str = "__internal";

pub const KIND_EVENT: &str = "Event";
pub const KIND_EVENT_LIST: &str = "EventList";

/// Literal source name that selects standard input.
pub const STDIN_SOURCE: &str = "-";

/// Capacity of every channel between pipeline stages.
pub const PIPELINE_CHANNEL_CAPACITY: usize = 256;

/// User-Agent sent when fetching audit logs over HTTP(S).
pub const HTTP_USER_AGENT: &str = concat!("rbactl/", env!("CARGO_PKG_VERSION"));

/// Prefix of generated Role/ClusterRole/binding names.
pub const DEFAULT_GENERATED_NAME_PREFIX: &str = "rbactl";

/// Annotation recording which tool generated an object.
pub const ANNOTATION_GENERATED_BY: &str = "rbactl.dev/generated-by";

/// Annotation recording when an object was generated (RFC3339).
pub const ANNOTATION_GENERATED_AT: &str = "rbactl.dev/generated";

/// Value of [`ANNOTATION_GENERATED_BY`].
pub const GENERATOR_NAME: &str = "rbactl";
