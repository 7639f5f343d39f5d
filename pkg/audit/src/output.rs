use std::fmt;
use std::str::FromStr;

use anyhow::{Result, bail};
use serde::Serialize;

use pkg_types::rbac::RbacObjects;

use crate::generate::UserObjects;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Yaml,
    Json,
}

impl FromStr for OutputFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "yaml" => Ok(OutputFormat::Yaml),
            "json" => Ok(OutputFormat::Json),
            other => bail!("unknown format: {}", other),
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Yaml => write!(f, "yaml"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

fn encode_one<T: Serialize>(object: &T, format: OutputFormat) -> Result<String> {
    Ok(match format {
        OutputFormat::Yaml => serde_yaml::to_string(object)?,
        OutputFormat::Json => serde_json::to_string_pretty(object)? + "\n",
    })
}

fn push_documents(
    objects: &RbacObjects,
    format: OutputFormat,
    docs: &mut Vec<String>,
) -> Result<()> {
    for o in &objects.roles {
        docs.push(encode_one(o, format)?);
    }
    for o in &objects.cluster_roles {
        docs.push(encode_one(o, format)?);
    }
    for o in &objects.role_bindings {
        docs.push(encode_one(o, format)?);
    }
    for o in &objects.cluster_role_bindings {
        docs.push(encode_one(o, format)?);
    }
    Ok(())
}

fn join_documents(docs: Vec<String>, format: OutputFormat) -> String {
    match format {
        OutputFormat::Yaml => docs.join("---\n"),
        OutputFormat::Json => docs.concat(),
    }
}

/// Encode each user's objects as one group, users in the given order. Within
/// a group: roles, cluster roles, role bindings, then cluster role bindings.
/// YAML documents are separated by `---`.
pub fn encode_user_objects(generated: &[UserObjects], format: OutputFormat) -> Result<String> {
    let mut docs = Vec::new();
    for group in generated {
        push_documents(&group.objects, format, &mut docs)?;
    }
    Ok(join_documents(docs, format))
}
