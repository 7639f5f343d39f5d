use clap::Args;
use regex::Regex;
use tracing::info;

use pkg_audit::attributes::event_to_attributes;
use pkg_audit::filter::{NamespaceFilter, UserFilter};
use pkg_audit::generate::{GenerateOptions, generation_annotations, synthesize};
use pkg_audit::output::{OutputFormat, encode_user_objects};
use pkg_audit::{AuditError, AuditPipeline, ErrorAggregate, read_audit_events};
use pkg_constants::audit::DEFAULT_GENERATED_NAME_PREFIX;
use pkg_constants::paths::DEFAULT_AUDITGEN_CONFIG;
use pkg_types::config::{AuditGenConfigFile, load_config_file};

#[derive(Args, Debug, Default)]
pub struct AuditGenArgs {
    /// Audit log sources: files, directories, http(s) URLs or `-` for stdin
    #[arg(short = 'f', long = "filename", required = true)]
    pub sources: Vec<String>,

    /// Path to YAML config file
    #[arg(long, short, default_value = DEFAULT_AUDITGEN_CONFIG)]
    pub config: String,

    /// Only generate roles for users matching this regex
    #[arg(short = 'u', long)]
    pub user_filter: Option<String>,

    /// Invert the user filter
    #[arg(short = 'n', long = "not")]
    pub not: bool,

    /// Only consider requests in namespaces matching this regex
    #[arg(long)]
    pub namespace_filter: Option<String>,

    /// Grant cluster-wide access for requests seen in several namespaces
    #[arg(long)]
    pub expand_multi_namespace: Option<bool>,

    /// Drop name restrictions for requests seen on several object names
    #[arg(long)]
    pub expand_multi_name: Option<bool>,

    /// Grant conventional companion verbs (watch implies get and list, ...)
    #[arg(long)]
    pub expand_verbs: bool,

    /// Prefix of generated object names
    #[arg(long)]
    pub name_prefix: Option<String>,

    /// Output format (yaml or json)
    #[arg(short, long)]
    pub output: Option<String>,
}

/// Everything `auditgen` needs, merged from CLI args > config file > defaults.
#[derive(Debug)]
pub struct AuditGenSettings {
    pub sources: Vec<String>,
    pub user_filter: Option<UserFilter>,
    pub namespace_filter: Option<NamespaceFilter>,
    pub name_prefix: String,
    pub output: OutputFormat,
    pub options: GenerateOptions,
}

fn compile(what: &str, pattern: Option<String>) -> anyhow::Result<Option<Regex>> {
    pattern
        .map(|p| Regex::new(&p).map_err(|e| anyhow::anyhow!("Invalid {} '{}': {}", what, p, e)))
        .transpose()
}

impl AuditGenSettings {
    pub fn merge(args: AuditGenArgs, file: AuditGenConfigFile) -> anyhow::Result<Self> {
        let inverse = args.not || file.not.unwrap_or(false);
        let user_filter = compile("user filter", args.user_filter.or(file.user_filter))?
            .map(|re| UserFilter::new(re, inverse));
        let namespace_filter =
            compile("namespace filter", args.namespace_filter.or(file.namespace_filter))?
                .map(NamespaceFilter::new);

        let output: OutputFormat = match args.output.or(file.output) {
            Some(s) => s.parse()?,
            None => OutputFormat::default(),
        };

        let name_prefix = args
            .name_prefix
            .or(file.name_prefix)
            .unwrap_or_else(|| DEFAULT_GENERATED_NAME_PREFIX.to_string());

        let mut verb_expansions = if args.expand_verbs || file.expand_verbs.unwrap_or(false) {
            GenerateOptions::standard_verb_expansions()
        } else {
            Default::default()
        };
        verb_expansions.extend(file.verb_expansions);

        let mut annotations = generation_annotations(chrono::Utc::now());
        annotations.extend(file.annotations);

        let defaults = GenerateOptions::default();
        let options = GenerateOptions {
            labels: file.labels,
            annotations,
            verb_expansions,
            expand_multiple_namespaces_to_cluster_scoped: args
                .expand_multi_namespace
                .or(file.expand_multi_namespace)
                .unwrap_or(defaults.expand_multiple_namespaces_to_cluster_scoped),
            expand_multiple_names_to_unnamed: args
                .expand_multi_name
                .or(file.expand_multi_name)
                .unwrap_or(defaults.expand_multiple_names_to_unnamed),
            ..defaults
        };

        Ok(Self {
            sources: args.sources,
            user_filter,
            namespace_filter,
            name_prefix,
            output,
            options,
        })
    }

    fn pipeline(&self) -> AuditPipeline {
        let mut pipeline = AuditPipeline::default();
        if let Some(f) = &self.user_filter {
            pipeline = pipeline.with_filter(f.clone());
        }
        if let Some(f) = &self.namespace_filter {
            pipeline = pipeline.with_filter(f.clone());
        }
        pipeline
    }
}

/// Read the audit sources and synthesize roles. Returns the encoded objects
/// (empty when nothing could be generated) and every per-item error.
pub async fn run(settings: &AuditGenSettings) -> anyhow::Result<(String, ErrorAggregate)> {
    let (stream, mut errors) = read_audit_events(&settings.sources, settings.pipeline()).await;
    let (events, decode_errors) = stream.collect().await;
    for e in decode_errors.0 {
        errors.push(e);
    }
    info!("Read {} audit events, {} errors", events.len(), errors.len());

    let requests = events.iter().map(event_to_attributes).collect();
    let output = match synthesize(requests, &settings.name_prefix, &settings.options) {
        Ok(generated) => encode_user_objects(&generated, settings.output)?,
        Err(e @ AuditError::NoMatchingEvents) => {
            errors.push(e);
            String::new()
        }
        Err(e) => return Err(e.into()),
    };
    Ok((output, errors))
}

pub async fn cmd_auditgen(args: AuditGenArgs) -> anyhow::Result<()> {
    let file_cfg: AuditGenConfigFile = load_config_file(&args.config)?;
    info!("Config file: {}", args.config);
    let settings = AuditGenSettings::merge(args, file_cfg)?;

    let (output, errors) = run(&settings).await?;
    print!("{}", output);

    if !errors.is_empty() {
        for e in errors.iter() {
            eprintln!("Error: {}", e);
        }
        std::process::exit(1);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pkg_constants::audit::ANNOTATION_GENERATED_BY;
    use std::collections::BTreeMap;

    fn args(sources: &[&str]) -> AuditGenArgs {
        AuditGenArgs {
            sources: sources.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn cli_overrides_config_file() {
        let mut a = args(&["audit.log"]);
        a.user_filter = Some("^alice$".to_string());
        a.expand_multi_name = Some(false);
        let file = AuditGenConfigFile {
            user_filter: Some("^bob$".to_string()),
            not: Some(true),
            expand_multi_namespace: Some(false),
            expand_multi_name: Some(true),
            output: Some("json".to_string()),
            ..Default::default()
        };
        let s = AuditGenSettings::merge(a, file).unwrap();

        let user = s.user_filter.unwrap();
        assert_eq!(user.pattern.as_str(), "^alice$");
        assert!(user.inverse);
        assert!(!s.options.expand_multiple_names_to_unnamed);
        assert!(!s.options.expand_multiple_namespaces_to_cluster_scoped);
        assert_eq!(s.output, OutputFormat::Json);
        assert_eq!(s.name_prefix, DEFAULT_GENERATED_NAME_PREFIX);
    }

    #[test]
    fn defaults_without_config() {
        let s = AuditGenSettings::merge(args(&["-"]), AuditGenConfigFile::default()).unwrap();
        assert!(s.user_filter.is_none());
        assert!(s.namespace_filter.is_none());
        assert!(s.options.verb_expansions.is_empty());
        assert!(s.options.expand_multiple_namespaces_to_cluster_scoped);
        assert!(s.options.expand_multiple_names_to_unnamed);
        assert!(s.options.annotations.contains_key(ANNOTATION_GENERATED_BY));
        assert_eq!(s.output, OutputFormat::Yaml);
    }

    #[test]
    fn verb_expansions_merge_over_standard() {
        let mut a = args(&["-"]);
        a.expand_verbs = true;
        let file = AuditGenConfigFile {
            verb_expansions: BTreeMap::from([("get".to_string(), vec!["list".to_string()])]),
            ..Default::default()
        };
        let s = AuditGenSettings::merge(a, file).unwrap();
        assert_eq!(s.options.verb_expansions["get"], vec!["list"]);
        assert_eq!(s.options.verb_expansions["watch"], vec!["get", "list"]);
    }

    #[test]
    fn invalid_filter_is_rejected() {
        let mut a = args(&["-"]);
        a.namespace_filter = Some("(".to_string());
        assert!(AuditGenSettings::merge(a, AuditGenConfigFile::default()).is_err());
    }

    #[tokio::test]
    async fn generates_roles_from_audit_file() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("audit.log");
        let lines = [
            r#"{"apiVersion":"audit.k8s.io/v1","kind":"Event","verb":"get","requestURI":"/api/v1/namespaces/ns1/pods/p1","user":{"username":"alice"},"objectRef":{"resource":"pods","namespace":"ns1","name":"p1","apiVersion":"v1"}}"#,
            r#"{"apiVersion":"audit.k8s.io/v1","kind":"Event","verb":"list","requestURI":"/api/v1/namespaces/ns1/pods","user":{"username":"bob"},"objectRef":{"resource":"pods","namespace":"ns1","apiVersion":"v1"}}"#,
        ];
        std::fs::write(&log, lines.join("\n")).unwrap();

        let mut a = args(&[log.to_str().unwrap()]);
        a.user_filter = Some("^alice$".to_string());
        let settings = AuditGenSettings::merge(a, AuditGenConfigFile::default()).unwrap();

        let (output, errors) = run(&settings).await.unwrap();
        assert!(errors.is_empty());
        assert!(output.contains("kind: Role\n"));
        assert!(output.contains("rbactl:alice"));
        assert!(!output.contains("bob"));
    }

    #[tokio::test]
    async fn no_matching_events_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("audit.log");
        std::fs::write(&log, "").unwrap();
        let settings =
            AuditGenSettings::merge(args(&[log.to_str().unwrap()]), AuditGenConfigFile::default())
                .unwrap();
        let (output, errors) = run(&settings).await.unwrap();
        assert!(output.is_empty());
        assert!(matches!(errors.0[0], AuditError::NoMatchingEvents));
    }
}
