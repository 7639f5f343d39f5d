mod auditgen;
mod render;

use anyhow::bail;
use clap::{Args, Parser, Subcommand};
use regex::Regex;
use tracing::info;
use tracing_subscriber::EnvFilter;

use pkg_analysis::{Analyzer, AnalysisConfig, export_analysis_config, load_analysis_config};
use pkg_constants::paths::DEFAULT_ANALYSIS_CONFIG;
use pkg_rbac::query::{WhoCanQuery, filter_subjects};
use pkg_rbac::{Permissions, StaticObjects, SubjectPolicyList, flatten, lookup_bindings, resolve};
use pkg_types::rbac::Subject;

use crate::auditgen::{AuditGenArgs, cmd_auditgen};
use crate::render::{
    Format, LOOKUP_HEADERS, POLICY_HEADERS, SUBJECT_HEADERS, encode, lookup_rows, policy_rows,
    render_table, subject_rows,
};

#[derive(Parser)]
#[command(
    name = "rbactl",
    about = "Inspect Kubernetes RBAC policies and generate roles from audit logs"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the effective permissions of every subject
    PolicyRules(PolicyRulesArgs),
    /// Show which subjects can perform a verb on a resource or URL
    WhoCan(WhoCanArgs),
    /// Show the roles each subject is bound to
    #[command(alias = "look")]
    Lookup(LookupArgs),
    /// Generate Roles and bindings from observed audit events
    Auditgen(AuditGenArgs),
    /// Run risk analysis rules over the effective permissions
    Analysis(AnalysisArgs),
}

#[derive(Args, Debug)]
struct PolicyRulesArgs {
    /// RBAC manifests (YAML or JSON) or `-` for stdin
    #[arg(short = 'f', long = "filename", required = true)]
    manifests: Vec<String>,

    /// Only show subjects whose name matches this regex
    #[arg(short = 'e', long, default_value = "")]
    regex: String,

    /// Invert the subject regex
    #[arg(short = 'n', long = "not")]
    not: bool,

    #[arg(short, long, value_enum, default_value_t = Format::Table)]
    output: Format,
}

#[derive(Args, Debug)]
struct WhoCanArgs {
    /// Verb, e.g. get or create
    verb: String,

    /// `resource[.group][/name]` or a non-resource URL starting with `/`
    target: String,

    /// RBAC manifests (YAML or JSON) or `-` for stdin
    #[arg(short = 'f', long = "filename", required = true)]
    manifests: Vec<String>,

    #[arg(short, long, value_enum, default_value_t = Format::Table)]
    output: Format,
}

#[derive(Args, Debug)]
struct LookupArgs {
    /// RBAC manifests (YAML or JSON) or `-` for stdin
    #[arg(short = 'f', long = "filename", required = true)]
    manifests: Vec<String>,

    /// Only show subjects whose name matches this regex
    #[arg(short = 'e', long, default_value = "")]
    regex: String,

    /// Invert the subject regex, e.g. `-n -e '^system:'` for non-system subjects
    #[arg(short = 'n', long = "not")]
    not: bool,

    #[arg(short, long, value_enum, default_value_t = Format::Table)]
    output: Format,
}

#[derive(Args, Debug)]
struct AnalysisArgs {
    /// RBAC manifests (YAML or JSON) or `-` for stdin
    #[arg(short = 'f', long = "filename")]
    manifests: Vec<String>,

    /// Path to the analysis rules file
    #[arg(long, short, default_value = DEFAULT_ANALYSIS_CONFIG)]
    config: String,

    /// Print the built-in analysis rules and exit
    #[arg(long)]
    export_default_config: bool,

    #[arg(short, long, value_enum, default_value_t = Format::Yaml)]
    output: Format,
}

async fn load_permissions(manifests: &[String]) -> anyhow::Result<Permissions> {
    let mut objects = StaticObjects::new();
    for path in manifests {
        let n = objects.read_path(path)?;
        info!("Read {} RBAC objects from {}", n, path);
    }
    Permissions::from_source(&objects).await
}

async fn load_policies(manifests: &[String]) -> anyhow::Result<Vec<SubjectPolicyList>> {
    let permissions = load_permissions(manifests).await?;
    Ok(flatten(&resolve(&permissions)))
}

fn subject_regex(regex: &str) -> anyhow::Result<Regex> {
    Regex::new(regex).map_err(|e| anyhow::anyhow!("Invalid subject regex '{}': {}", regex, e))
}

// ─── policy-rules ───────────────────────────────────────────────

async fn cmd_policy_rules(args: PolicyRulesArgs) -> anyhow::Result<()> {
    let pattern = subject_regex(&args.regex)?;
    let policies = filter_subjects(load_policies(&args.manifests).await?, &pattern, args.not);

    match args.output {
        Format::Table => print!(
            "{}",
            render_table(&POLICY_HEADERS, policy_rows(&policies), "(no policy rules)")
        ),
        other => print!("{}", encode(&policies, other.document()?)?),
    }
    Ok(())
}

// ─── who-can ────────────────────────────────────────────────────

async fn cmd_who_can(args: WhoCanArgs) -> anyhow::Result<()> {
    let query = WhoCanQuery::parse(&args.verb, &args.target)?;
    let policies = load_policies(&args.manifests).await?;
    let subjects: Vec<&Subject> = query.filter(&policies).into_iter().map(|p| &p.subject).collect();

    match args.output {
        Format::Table => print!(
            "{}",
            render_table(&SUBJECT_HEADERS, subject_rows(&subjects), "(no subjects)")
        ),
        other => print!("{}", encode(&subjects, other.document()?)?),
    }
    Ok(())
}

// ─── lookup ─────────────────────────────────────────────────────

async fn cmd_lookup(args: LookupArgs) -> anyhow::Result<()> {
    let pattern = subject_regex(&args.regex)?;
    let permissions = load_permissions(&args.manifests).await?;
    let found = lookup_bindings(&permissions, &pattern, args.not);

    match args.output {
        Format::Table => print!(
            "{}",
            render_table(&LOOKUP_HEADERS, lookup_rows(&found), "(no bindings)")
        ),
        other => print!("{}", encode(&found, other.document()?)?),
    }
    Ok(())
}

// ─── analysis ───────────────────────────────────────────────────

async fn cmd_analysis(args: AnalysisArgs) -> anyhow::Result<()> {
    let format = args.output.document()?;
    if args.export_default_config {
        print!("{}", export_analysis_config(&AnalysisConfig::default(), format)?);
        return Ok(());
    }
    if args.manifests.is_empty() {
        bail!("No manifests given, use -f <file> or --export-default-config");
    }

    let config = load_analysis_config(&args.config)?;
    info!("Analysis config: {} ({} rules)", config.info.name, config.rules.len());

    let policies = load_policies(&args.manifests).await?;
    let report = Analyzer::new(config, policies)?.analyze();
    print!("{}", encode(&report, format)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();

    match cli.command {
        Commands::PolicyRules(args) => cmd_policy_rules(args).await,
        Commands::WhoCan(args) => cmd_who_can(args).await,
        Commands::Lookup(args) => cmd_lookup(args).await,
        Commands::Auditgen(args) => cmd_auditgen(args).await,
        Commands::Analysis(args) => cmd_analysis(args).await,
    }
}
