use regex::Regex;
use tracing::trace;

use pkg_types::audit::AuditEvent;

/// A predicate deciding whether an event continues down the pipeline.
pub trait EventFilter: Send + Sync {
    fn keep(&self, event: &AuditEvent) -> bool;
}

impl<F> EventFilter for F
where
    F: Fn(&AuditEvent) -> bool + Send + Sync,
{
    fn keep(&self, event: &AuditEvent) -> bool {
        self(event)
    }
}

/// Keeps events whose effective user matches `pattern`; with `inverse`,
/// keeps the ones that do not.
#[derive(Debug, Clone)]
pub struct UserFilter {
    pub pattern: Regex,
    pub inverse: bool,
}

impl UserFilter {
    pub fn new(pattern: Regex, inverse: bool) -> Self {
        Self { pattern, inverse }
    }
}

impl EventFilter for UserFilter {
    fn keep(&self, event: &AuditEvent) -> bool {
        let user = &event.effective_user().username;
        let keep = self.pattern.is_match(user) != self.inverse;
        if !keep {
            trace!("skip user {}", user);
        }
        keep
    }
}

/// Keeps events on objects in a namespace matching `pattern`. Events with no
/// namespaced object reference always pass.
#[derive(Debug, Clone)]
pub struct NamespaceFilter {
    pub pattern: Regex,
}

impl NamespaceFilter {
    pub fn new(pattern: Regex) -> Self {
        Self { pattern }
    }
}

impl EventFilter for NamespaceFilter {
    fn keep(&self, event: &AuditEvent) -> bool {
        match event.object_namespace() {
            Some(ns) if !self.pattern.is_match(ns) => {
                trace!("skip namespace {}", ns);
                false
            }
            _ => true,
        }
    }
}

/// Short-circuit AND over `filters`.
pub fn keep_event(filters: &[Box<dyn EventFilter>], event: &AuditEvent) -> bool {
    filters.iter().all(|f| f.keep(event))
}
