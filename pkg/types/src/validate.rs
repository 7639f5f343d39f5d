use anyhow::{Result, bail};

/// Turn an arbitrary username into something usable inside an object name.
/// Lowercases, then replaces every char outside `[a-z0-9:]` with `-`.
pub fn sanitize_name(name: &str) -> String {
    name.to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == ':' {
                c
            } else {
                '-'
            }
        })
        .collect()
}

/// Validate a generated RBAC object name.
/// RBAC names are path segments: non-empty, not `.`/`..`, no `/` or `%`.
pub fn validate_generated_name(name: &str) -> Result<()> {
    if name.is_empty() {
        bail!("name must not be empty");
    }
    if name == "." || name == ".." {
        bail!("name '{}' is not a valid path segment", name);
    }
    if name.contains('/') || name.contains('%') {
        bail!("name '{}' must not contain '/' or '%'", name);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitized_names() {
        assert_eq!(sanitize_name("alice"), "alice");
        assert_eq!(sanitize_name("Alice@Example.com"), "alice-example-com");
        assert_eq!(
            sanitize_name("system:serviceaccount:ci:deployer"),
            "system:serviceaccount:ci:deployer"
        );
        assert_eq!(sanitize_name("a b/c"), "a-b-c");
    }

    #[test]
    fn valid_names() {
        assert!(validate_generated_name("rbactl:alice").is_ok());
        assert!(validate_generated_name("audit2rbac:a-b").is_ok());
    }

    #[test]
    fn invalid_names() {
        assert!(validate_generated_name("").is_err());
        assert!(validate_generated_name(".").is_err());
        assert!(validate_generated_name("..").is_err());
        assert!(validate_generated_name("a/b").is_err());
        assert!(validate_generated_name("a%2f").is_err());
    }
}
