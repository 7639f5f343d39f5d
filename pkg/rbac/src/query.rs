//! Queries over flattened subject policies.

use anyhow::{Result, bail};
use regex::Regex;

use pkg_constants::rbac::{CORE_GROUP_DISPLAY, WILDCARD};

use crate::flatten::{NamespacedPolicyRule, SubjectPolicyList};

/// "Who can `<verb>` `<target>`?"
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WhoCanQuery {
    Resource {
        verb: String,
        api_group: String,
        resource: String,
        name: String,
    },
    NonResource {
        verb: String,
        url: String,
    },
}

impl WhoCanQuery {
    /// Parse a target of the form `/url`, `resource`, `resource.group`,
    /// `resource/name` or `resource.group/name`. The group defaults to
    /// `core` and the name to `*`.
    ///
    /// Resource shortnames (`po`, `deploy`) are not expanded here.
    pub fn parse(verb: &str, target: &str) -> Result<Self> {
        if verb.is_empty() {
            bail!("verb must not be empty");
        }
        if target.is_empty() {
            bail!("target must not be empty");
        }
        if target.starts_with('/') {
            return Ok(WhoCanQuery::NonResource {
                verb: verb.to_string(),
                url: target.to_string(),
            });
        }

        let (kind, name) = match target.split_once('/') {
            Some((kind, name)) => (kind, name),
            None => (target, WILDCARD),
        };
        if kind.is_empty() || name.is_empty() {
            bail!("invalid target '{}', expected KIND or KIND/NAME", target);
        }
        let (resource, api_group) = match kind.split_once('.') {
            Some((resource, group)) if !group.is_empty() => (resource, group),
            _ => (kind, CORE_GROUP_DISPLAY),
        };

        Ok(WhoCanQuery::Resource {
            verb: verb.to_string(),
            api_group: api_group.to_string(),
            resource: resource.to_string(),
            name: name.to_string(),
        })
    }

    fn rule_matches(&self, rule: &NamespacedPolicyRule) -> bool {
        let in_or_wildcard = |value: Option<&str>, wanted: &str| -> bool {
            matches!(value, Some(v) if v == wanted || v == WILDCARD)
        };
        match self {
            WhoCanQuery::Resource {
                verb,
                api_group,
                resource,
                name,
            } => {
                in_or_wildcard(Some(rule.verb.as_str()), verb)
                    && in_or_wildcard(rule.resource.as_deref(), resource)
                    && in_or_wildcard(rule.api_group.as_deref(), api_group)
                    && (name == WILDCARD
                        || rule.resource_names.is_empty()
                        || rule.resource_names.contains(name))
            }
            WhoCanQuery::NonResource { verb, url } => {
                in_or_wildcard(Some(rule.verb.as_str()), verb)
                    && (rule.non_resource_urls.contains(url)
                        || (rule.non_resource_urls.len() == 1
                            && rule.non_resource_urls[0] == WILDCARD))
            }
        }
    }

    /// Does any of the subject's flattened rules satisfy the query?
    pub fn matches(&self, policy: &SubjectPolicyList) -> bool {
        policy.allowed_to.iter().any(|rule| self.rule_matches(rule))
    }

    pub fn filter<'a>(&self, policies: &'a [SubjectPolicyList]) -> Vec<&'a SubjectPolicyList> {
        policies.iter().filter(|p| self.matches(p)).collect()
    }
}

/// Keep subjects whose name matches `pattern`, or with `inverse`, those that
/// do not.
pub fn filter_subjects(
    policies: Vec<SubjectPolicyList>,
    pattern: &Regex,
    inverse: bool,
) -> Vec<SubjectPolicyList> {
    policies
        .into_iter()
        .filter(|p| pattern.is_match(&p.subject.name) != inverse)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pkg_types::rbac::Subject;

    fn resource_rule(verb: &str, group: &str, resource: &str, names: &[&str]) -> NamespacedPolicyRule {
        NamespacedPolicyRule {
            namespace: "*".to_string(),
            verb: verb.to_string(),
            api_group: Some(group.to_string()),
            resource: Some(resource.to_string()),
            resource_names: names.iter().map(|n| n.to_string()).collect(),
            non_resource_urls: vec![],
            originated_from: vec![],
        }
    }

    fn policy(name: &str, allowed_to: Vec<NamespacedPolicyRule>) -> SubjectPolicyList {
        SubjectPolicyList {
            subject: Subject::user(name),
            allowed_to,
        }
    }

    #[test]
    fn parses_targets() {
        assert_eq!(
            WhoCanQuery::parse("get", "/apis").unwrap(),
            WhoCanQuery::NonResource {
                verb: "get".to_string(),
                url: "/apis".to_string()
            }
        );
        assert_eq!(
            WhoCanQuery::parse("watch", "deployments.apps").unwrap(),
            WhoCanQuery::Resource {
                verb: "watch".to_string(),
                api_group: "apps".to_string(),
                resource: "deployments".to_string(),
                name: "*".to_string()
            }
        );
        assert_eq!(
            WhoCanQuery::parse("get", "secrets/token").unwrap(),
            WhoCanQuery::Resource {
                verb: "get".to_string(),
                api_group: "core".to_string(),
                resource: "secrets".to_string(),
                name: "token".to_string()
            }
        );
        assert!(WhoCanQuery::parse("get", "secrets/").is_err());
        assert!(WhoCanQuery::parse("", "pods").is_err());
    }

    #[test]
    fn matches_resources_with_wildcards_and_names() {
        let admin = policy("admin", vec![resource_rule("*", "*", "*", &[])]);
        let reader = policy("reader", vec![resource_rule("get", "core", "secrets", &["token"])]);
        let other = policy("other", vec![resource_rule("get", "apps", "deployments", &[])]);
        let all = vec![admin, reader, other];

        let any_secret = WhoCanQuery::parse("get", "secrets").unwrap();
        let names: Vec<&str> = any_secret
            .filter(&all)
            .iter()
            .map(|p| p.subject.name.as_str())
            .collect();
        assert_eq!(names, vec!["admin", "reader"]);

        let other_secret = WhoCanQuery::parse("get", "secrets/other").unwrap();
        let names: Vec<&str> = other_secret
            .filter(&all)
            .iter()
            .map(|p| p.subject.name.as_str())
            .collect();
        assert_eq!(names, vec!["admin"]);
    }

    #[test]
    fn matches_non_resource_urls() {
        let rule = NamespacedPolicyRule {
            namespace: "*".to_string(),
            verb: "get".to_string(),
            api_group: None,
            resource: None,
            resource_names: vec![],
            non_resource_urls: vec!["/healthz".to_string()],
            originated_from: vec![],
        };
        let mut star = rule.clone();
        star.non_resource_urls = vec!["*".to_string()];
        let all = vec![policy("health", vec![rule]), policy("star", vec![star])];

        let q = WhoCanQuery::parse("get", "/healthz").unwrap();
        assert_eq!(q.filter(&all).len(), 2);
        let q = WhoCanQuery::parse("get", "/metrics").unwrap();
        assert_eq!(q.filter(&all).len(), 1);
        // resource queries never match URL-only rules
        assert!(WhoCanQuery::parse("get", "pods").unwrap().filter(&all).is_empty());
    }

    #[test]
    fn subject_regex_filter() {
        let all = vec![policy("alice", vec![]), policy("bob", vec![])];
        let re = Regex::new("^al").unwrap();
        let kept = filter_subjects(all.clone(), &re, false);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].subject.name, "alice");
        let kept = filter_subjects(all, &re, true);
        assert_eq!(kept[0].subject.name, "bob");
    }
}
