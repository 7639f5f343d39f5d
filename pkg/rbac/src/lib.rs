//! RBAC object graph analysis: snapshot store, permission resolution,
//! flattening and queries.

pub mod authorize;
pub mod describe;
pub mod flatten;
pub mod lookup;
pub mod query;
pub mod resolver;
pub mod source;
pub mod store;

pub use flatten::{NamespacedPolicyRule, SubjectPolicyList, flatten};
pub use lookup::{SubjectBinding, lookup_bindings};
pub use resolver::{SourcedRule, SubjectPermissions, resolve};
pub use source::{ClusterSource, StaticObjects};
pub use store::{Permissions, Scope, ScopedBinding, ScopedRole};
