//! Policy rule breakdown and compaction.
//!
//! Compaction changes how a rule set is written down, never what it grants:
//! every (group, resource, name, verb) and (url, verb) pair allowed before is
//! allowed after, and nothing else is.

use std::collections::{BTreeSet, HashMap};

use pkg_types::rbac::PolicyRule;

/// Split a rule into single group/resource/name/verb rules (or single
/// url/verb rules for non-resource URLs).
pub fn breakdown_rule(rule: &PolicyRule) -> Vec<PolicyRule> {
    let mut out = Vec::new();
    for group in &rule.api_groups {
        for resource in &rule.resources {
            if rule.resource_names.is_empty() {
                for verb in &rule.verbs {
                    out.push(
                        PolicyRule::new(&[verb])
                            .groups(&[group])
                            .resources(&[resource]),
                    );
                }
            } else {
                for name in &rule.resource_names {
                    for verb in &rule.verbs {
                        out.push(
                            PolicyRule::new(&[verb])
                                .groups(&[group])
                                .resources(&[resource])
                                .names(&[name]),
                        );
                    }
                }
            }
        }
    }
    for url in &rule.non_resource_urls {
        for verb in &rule.verbs {
            out.push(PolicyRule::new(&[verb]).urls(&[url]));
        }
    }
    out
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SimpleResource {
    group: String,
    resource: String,
    name: Option<String>,
}

/// A rule naming exactly one group, one resource and at most one name.
fn simple_resource(rule: &PolicyRule) -> Option<SimpleResource> {
    if rule.resource_names.len() > 1 || !rule.non_resource_urls.is_empty() {
        return None;
    }
    if rule.api_groups.len() != 1 || rule.resources.len() != 1 {
        return None;
    }
    Some(SimpleResource {
        group: rule.api_groups[0].clone(),
        resource: rule.resources[0].clone(),
        name: rule.resource_names.first().cloned(),
    })
}

/// Merge the verbs of simple rules that target the same group, resource and
/// name. Other rules pass through. First-seen order is kept.
fn merge_simple_verbs(rules: Vec<PolicyRule>) -> Vec<PolicyRule> {
    let mut out: Vec<PolicyRule> = Vec::with_capacity(rules.len());
    let mut seen: HashMap<SimpleResource, usize> = HashMap::new();
    for rule in rules {
        match simple_resource(&rule) {
            Some(key) => match seen.get(&key) {
                Some(&idx) => out[idx].verbs.extend(rule.verbs),
                None => {
                    seen.insert(key, out.len());
                    out.push(rule);
                }
            },
            None => out.push(rule),
        }
    }
    out
}

fn sorted_union(a: &[String], b: &[String]) -> Vec<String> {
    a.iter()
        .chain(b.iter())
        .cloned()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

fn without_names(rule: &PolicyRule) -> PolicyRule {
    PolicyRule {
        resource_names: Vec::new(),
        ..rule.clone()
    }
}

fn without_resources(rule: &PolicyRule) -> PolicyRule {
    PolicyRule {
        resources: Vec::new(),
        ..rule.clone()
    }
}

/// Fold `rule` into an existing accumulated rule if one differs from it only
/// in resource names or only in resources. Returns `false` if nothing fit.
fn accumulate(accumulating: &mut [PolicyRule], rule: &PolicyRule) -> bool {
    let nameless = without_names(rule);
    let resourceless = without_resources(rule);
    for acc in accumulating.iter_mut() {
        if without_names(acc) == nameless {
            // An empty name list is unrestricted, so it wins over any names.
            if acc.resource_names.is_empty() {
                return true;
            }
            if rule.resource_names.is_empty() {
                acc.resource_names.clear();
            } else {
                acc.resource_names = sorted_union(&acc.resource_names, &rule.resource_names);
            }
            return true;
        }
        if without_resources(acc) == resourceless {
            acc.resources = sorted_union(&acc.resources, &rule.resources);
            return true;
        }
    }
    false
}

/// Rewrite `rules` as a small, deterministic set granting exactly the same
/// access.
pub fn compact_rules(rules: &[PolicyRule]) -> Vec<PolicyRule> {
    let broken: Vec<PolicyRule> = rules.iter().flat_map(breakdown_rule).collect();
    let mut compacted = merge_simple_verbs(broken);
    for rule in &mut compacted {
        rule.verbs = rule
            .verbs
            .drain(..)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
    }
    compacted.sort();
    compacted.dedup();

    let mut accumulating: Vec<PolicyRule> = Vec::new();
    for rule in compacted {
        // Non-resource rules just accumulate.
        if rule.resources.is_empty() {
            accumulating.push(rule);
            continue;
        }
        if !accumulate(&mut accumulating, &rule) {
            accumulating.push(rule);
        }
    }

    accumulating.sort_by(|a, b| {
        a.api_groups
            .join(",")
            .cmp(&b.api_groups.join(","))
            .then_with(|| a.compact_string().cmp(&b.compact_string()))
    });
    accumulating
}
