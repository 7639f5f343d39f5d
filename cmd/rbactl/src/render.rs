use anyhow::{Result, bail};
use clap::ValueEnum;
use serde::Serialize;

use pkg_rbac::{SubjectBinding, SubjectPolicyList};
use pkg_rbac::describe::render_originated_from;
use pkg_types::document::DocumentFormat;
use pkg_types::rbac::Subject;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Format {
    Table,
    Json,
    Yaml,
}

impl Format {
    pub fn document(self) -> Result<DocumentFormat> {
        match self {
            Format::Json => Ok(DocumentFormat::Json),
            Format::Yaml => Ok(DocumentFormat::Yaml),
            Format::Table => bail!("table output is not supported here, use json or yaml"),
        }
    }
}

pub fn encode<T: Serialize + ?Sized>(value: &T, format: DocumentFormat) -> Result<String> {
    Ok(match format {
        DocumentFormat::Json => serde_json::to_string_pretty(value)? + "\n",
        DocumentFormat::Yaml => serde_yaml::to_string(value)?,
    })
}

/// Left-aligned columns sized to their widest cell. Rows are sorted.
pub fn render_table(headers: &[&str], mut rows: Vec<Vec<String>>, empty: &str) -> String {
    if rows.is_empty() {
        return format!("{}\n", empty);
    }
    rows.sort();

    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in &rows {
        for (w, cell) in widths.iter_mut().zip(row) {
            *w = (*w).max(cell.len());
        }
    }

    let line = |cells: Vec<&str>| -> String {
        let mut out = String::new();
        for (i, (cell, w)) in cells.iter().zip(&widths).enumerate() {
            if i + 1 == cells.len() {
                out.push_str(cell);
            } else {
                out.push_str(&format!("{:<width$}  ", cell, width = *w));
            }
        }
        out.trim_end().to_string() + "\n"
    };

    let mut out = line(headers.to_vec());
    for row in &rows {
        out.push_str(&line(row.iter().map(String::as_str).collect()));
    }
    out
}

pub const POLICY_HEADERS: [&str; 9] = [
    "TYPE",
    "SUBJECT",
    "VERBS",
    "NAMESPACE",
    "API GROUP",
    "KIND",
    "NAMES",
    "NONRESOURCEURI",
    "ORIGINATED FROM",
];

pub fn policy_rows(policies: &[SubjectPolicyList]) -> Vec<Vec<String>> {
    let mut rows = Vec::new();
    for policy in policies {
        for rule in &policy.allowed_to {
            rows.push(vec![
                policy.subject.kind.to_string(),
                policy.subject.name.clone(),
                rule.verb.clone(),
                rule.namespace.clone(),
                rule.api_group.clone().unwrap_or_default(),
                rule.resource.clone().unwrap_or_default(),
                rule.resource_names.join(","),
                rule.non_resource_urls.join(","),
                render_originated_from(&rule.namespace, &rule.originated_from),
            ]);
        }
    }
    rows
}

pub const SUBJECT_HEADERS: [&str; 3] = ["TYPE", "SUBJECT", "NAMESPACE"];

pub fn subject_rows(subjects: &[&Subject]) -> Vec<Vec<String>> {
    subjects
        .iter()
        .map(|s| vec![s.kind.to_string(), s.name.clone(), s.namespace.clone()])
        .collect()
}

pub const LOOKUP_HEADERS: [&str; 6] = [
    "SUBJECT",
    "SUBJECT TYPE",
    "SCOPE",
    "NAMESPACE",
    "ROLE",
    "BINDING TYPE",
];

pub fn lookup_rows(found: &[SubjectBinding]) -> Vec<Vec<String>> {
    found
        .iter()
        .map(|b| {
            vec![
                b.subject.name.clone(),
                b.subject.kind.to_string(),
                b.role_kind.to_string(),
                b.namespace.clone(),
                b.role_name.clone(),
                b.binding_kind.clone(),
            ]
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pkg_rbac::NamespacedPolicyRule;
    use pkg_types::rbac::{RoleRef, RoleRefKind};

    #[test]
    fn empty_table() {
        assert_eq!(
            render_table(&SUBJECT_HEADERS, Vec::new(), "(no subjects)"),
            "(no subjects)\n"
        );
    }

    #[test]
    fn rows_are_sorted_and_aligned() {
        let bob = Subject::user("bob");
        let sa = Subject::service_account("ns1", "builder");
        let out = render_table(&SUBJECT_HEADERS, subject_rows(&[&bob, &sa]), "(no subjects)");
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("TYPE            SUBJECT"));
        assert!(lines[1].starts_with("ServiceAccount  builder  ns1"));
        assert_eq!(lines[2].trim_end(), "User            bob");
    }

    #[test]
    fn policy_row_columns() {
        let policy = SubjectPolicyList {
            subject: Subject::user("alice"),
            allowed_to: vec![NamespacedPolicyRule {
                namespace: "ns1".to_string(),
                verb: "get".to_string(),
                api_group: Some("core".to_string()),
                resource: Some("pods".to_string()),
                resource_names: vec!["a".to_string(), "b".to_string()],
                non_resource_urls: Vec::new(),
                originated_from: vec![RoleRef::new(RoleRefKind::ClusterRole, "view")],
            }],
        };
        let rows = policy_rows(&[policy]);
        assert_eq!(
            rows[0],
            vec!["User", "alice", "get", "ns1", "core", "pods", "a,b", "", "ClusterRoles>>view"]
        );
    }

    #[test]
    fn table_format_has_no_document_form() {
        assert!(Format::Table.document().is_err());
        assert_eq!(Format::Yaml.document().unwrap(), DocumentFormat::Yaml);
    }

    #[test]
    fn lookup_table() {
        let found = vec![SubjectBinding {
            subject: Subject::service_account("dev", "builder"),
            role_kind: RoleRefKind::ClusterRole,
            role_name: "view".to_string(),
            namespace: "dev".to_string(),
            binding_kind: "RoleBinding".to_string(),
            binding_name: "view-in-dev".to_string(),
        }];
        let out = render_table(&LOOKUP_HEADERS, lookup_rows(&found), "(no bindings)");
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(
            lines[0],
            "SUBJECT  SUBJECT TYPE    SCOPE        NAMESPACE  ROLE  BINDING TYPE"
        );
        assert_eq!(
            lines[1],
            "builder  ServiceAccount  ClusterRole  dev        view  RoleBinding"
        );
    }
}
