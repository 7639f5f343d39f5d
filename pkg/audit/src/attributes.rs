use reqwest::Url;
use tracing::debug;

use pkg_types::attributes::{AttributesRecord, RequestUser};
use pkg_types::audit::AuditEvent;

/// Base for resolving the relative request URIs the API server records.
const REQUEST_URI_BASE: &str = "https://kubernetes.default.svc/";

/// Path component of a request URI: query and fragment removed, and the
/// scheme and authority removed from absolute URLs.
fn request_path(uri: &str) -> String {
    if uri.is_empty() {
        return String::new();
    }
    let parsed = Url::parse(uri)
        .or_else(|_| Url::parse(REQUEST_URI_BASE).and_then(|base| base.join(uri)));
    match parsed {
        Ok(url) => url.path().to_string(),
        Err(e) => {
            debug!("Keeping unparsable request URI {}: {}", uri, e);
            uri.to_string()
        }
    }
}

/// Describe an audited request the way an authorizer would have seen it.
pub fn event_to_attributes(event: &AuditEvent) -> AttributesRecord {
    let user = event.effective_user();
    let mut attrs = AttributesRecord {
        user: RequestUser {
            name: user.username.clone(),
            groups: user.groups.clone(),
        },
        verb: event.verb.clone(),
        path: request_path(&event.request_uri),
        ..Default::default()
    };

    if let Some(r) = &event.object_ref {
        attrs.resource_request = true;
        attrs.namespace = r.namespace.clone();
        attrs.name = r.name.clone();
        attrs.resource = r.resource.clone();
        attrs.subresource = r.subresource.clone();
        attrs.api_group = r.api_group.clone();
        attrs.api_version = r.api_version.clone();
    }

    attrs
}
