use clap::{Args, Parser, Subcommand, ValueEnum};
use prose_adapters::{create_provider_adapter_from_profile, AdapterError};
use prose_core::{
    AnalysisError, Capabilities, ConfigError, ConfigStore, LogRecord, LogSink, PatternAnalyzer,
    PatternSpec, PromptError, PromptRegistry, Provider, QueryRequest, ResilientExecutor,
    RevisionError, RevisionEngine, StdoutLogSink, Treatment,
};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

fn main() {
    if let Err(err) = run() {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), CliError> {
    let cli = Cli::parse();
    let sink = StdoutLogSink::new();

    match cli.command {
        Command::Provider(command) => handle_provider(&cli.config, command, &sink),
        Command::Analyze(args) => run_analyze(&cli.config, args, &sink),
        Command::Revise(args) => run_revise(&cli.config, args, &sink),
    }
}

fn handle_provider(
    config_path: &Path,
    command: ProviderCommand,
    sink: &dyn LogSink,
) -> Result<(), CliError> {
    match command {
        ProviderCommand::Test(args) => run_test_provider(config_path, args, sink),
    }
}

fn run_test_provider(
    config_path: &Path,
    args: ProviderTestArgs,
    sink: &dyn LogSink,
) -> Result<(), CliError> {
    let store = ConfigStore::open(config_path.to_path_buf())?;
    let mut providers = build_providers(&store, Some(&[args.provider.clone()]))?;
    let executor = ResilientExecutor::new(store.config().revision.executor_config());

    let prompt = args
        .prompt
        .unwrap_or_else(|| "Reply with a single short sentence.".to_string());
    let provider = providers
        .first_mut()
        .ok_or_else(|| CliError::UnknownProfile(args.provider.clone()))?;

    let reply = executor
        .execute(provider, &QueryRequest::from_prompt(prompt), sink)
        .map_err(|err| CliError::ProbeFailed(err.to_string()))?;
    sink.log(LogRecord::info(format!(
        "provider `{}` responded: {}",
        provider.name(),
        reply.trim()
    )));
    sink.log(LogRecord::info(format!(
        "usage so far: {:?}",
        provider.usage()
    )));
    Ok(())
}

fn run_analyze(config_path: &Path, args: AnalyzeArgs, sink: &dyn LogSink) -> Result<(), CliError> {
    let store = ConfigStore::open(config_path.to_path_buf())?;
    let text = read_text(&args.file)?;
    let mut providers = build_providers(&store, args.provider.as_deref())?;

    let prompts = PromptRegistry::new()?;
    let executor = ResilientExecutor::new(store.config().revision.executor_config());
    let analyzer = PatternAnalyzer::new(&prompts, executor, sink);

    let pattern = PatternSpec::new(pattern_id(&args.pattern_id, &args.pattern), &args.pattern);
    let per_provider = analyzer.analyze(&text, &pattern, &mut providers)?;
    let merged = prose_core::merge_matches(&per_provider);

    sink.log(LogRecord::info(format!(
        "{} match(es) after merging {} provider result set(s)",
        merged.len(),
        per_provider.len()
    )));
    println!("{}", serde_json::to_string_pretty(&merged)?);
    Ok(())
}

fn run_revise(config_path: &Path, args: ReviseArgs, sink: &dyn LogSink) -> Result<(), CliError> {
    let store = ConfigStore::open(config_path.to_path_buf())?;
    let text = read_text(&args.file)?;
    let mut providers = build_providers(&store, args.provider.as_deref())?;

    let prompts = PromptRegistry::new()?;
    let executor = ResilientExecutor::new(store.config().revision.executor_config());
    let engine = RevisionEngine::new(&prompts, executor, sink);

    let treatment = match args.treatment {
        TreatmentArg::Keep => Treatment::Keep,
        TreatmentArg::Rewrite => Treatment::Rewrite(args.instruction.clone()),
        TreatmentArg::Delete => Treatment::Delete,
    };

    let pattern = PatternSpec::new(pattern_id(&args.pattern_id, &args.pattern), &args.pattern);
    let outcome = engine.revise_batch(&text, &pattern, treatment, &mut providers)?;

    sink.log(LogRecord::info(format!(
        "revision finished with {} record(s)",
        outcome.revisions.len()
    )));

    match &args.output {
        Some(path) => {
            fs::write(path, &outcome.text).map_err(|source| CliError::WriteFile {
                path: path.clone(),
                source,
            })?;
            sink.log(LogRecord::info(format!(
                "revised text written to {}",
                path.display()
            )));
        }
        None => println!("{}", outcome.text),
    }

    if !outcome.revisions.is_empty() {
        println!("{}", serde_json::to_string_pretty(&outcome.revisions)?);
    }
    Ok(())
}

/// Builds the session's provider set from config profiles. `names` restricts
/// the set; otherwise every meaningful profile participates.
fn build_providers(
    store: &ConfigStore,
    names: Option<&[String]>,
) -> Result<Vec<Provider>, CliError> {
    let profiles = &store.config().provider_profiles;

    let selected: Vec<&String> = match names {
        Some(names) => {
            for name in names {
                if !profiles.contains_key(name) {
                    return Err(CliError::UnknownProfile(name.clone()));
                }
            }
            names.iter().collect()
        }
        None => profiles
            .iter()
            .filter(|(_, profile)| profile.is_meaningful())
            .map(|(name, _)| name)
            .collect(),
    };

    if selected.is_empty() {
        return Err(CliError::NoProviders);
    }

    let mut providers = Vec::with_capacity(selected.len());
    for name in selected {
        let profile = profiles
            .get(name)
            .ok_or_else(|| CliError::UnknownProfile(name.clone()))?;
        let adapter = create_provider_adapter_from_profile(profile)?;
        providers.push(Provider::new(
            name.clone(),
            adapter,
            Capabilities {
                supports_json: profile.supports_json,
            },
        ));
    }
    Ok(providers)
}

fn read_text(path: &Path) -> Result<String, CliError> {
    fs::read_to_string(path).map_err(|source| CliError::ReadFile {
        path: path.to_path_buf(),
        source,
    })
}

fn pattern_id(explicit: &Option<String>, description: &str) -> String {
    match explicit {
        Some(id) => id.clone(),
        None => description
            .split_whitespace()
            .take(3)
            .collect::<Vec<_>>()
            .join("-")
            .to_lowercase(),
    }
}

#[derive(Debug, Error)]
enum CliError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("adapter error: {0}")]
    Adapter(#[from] AdapterError),
    #[error("prompt error: {0}")]
    Prompt(#[from] PromptError),
    #[error("analysis failed: {0}")]
    Analysis(#[from] AnalysisError),
    #[error("revision failed: {0}")]
    Revision(#[from] RevisionError),
    #[error("failed to serialize output: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("unknown provider profile `{0}`")]
    UnknownProfile(String),
    #[error("no provider profiles configured")]
    NoProviders,
    #[error("provider probe failed: {0}")]
    ProbeFailed(String),
    #[error("failed to read `{path}`: {source}")]
    ReadFile { path: PathBuf, source: io::Error },
    #[error("failed to write `{path}`: {source}")]
    WriteFile { path: PathBuf, source: io::Error },
}

#[derive(Parser)]
#[command(
    name = "prose",
    about = "Detect and revise undesirable patterns in long-form prose via multiple AI providers"
)]
struct Cli {
    /// Path to the JSON configuration file.
    #[arg(long, global = true, default_value = "config.json")]
    config: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Provider profile management.
    #[command(subcommand)]
    Provider(ProviderCommand),
    /// Run one analysis pass and print the merged matches.
    Analyze(AnalyzeArgs),
    /// Run one batch revision pass and print or write the revised text.
    Revise(ReviseArgs),
}

#[derive(Subcommand)]
enum ProviderCommand {
    /// Send a short probe prompt through one configured profile.
    Test(ProviderTestArgs),
}

#[derive(Args)]
struct ProviderTestArgs {
    /// Profile name from the config file.
    #[arg(long)]
    provider: String,
    /// Probe prompt to send instead of the default.
    #[arg(long)]
    prompt: Option<String>,
}

#[derive(Args)]
struct AnalyzeArgs {
    /// Text file to analyze.
    #[arg(long)]
    file: PathBuf,
    /// Natural-language description of the pattern to detect.
    #[arg(long)]
    pattern: String,
    /// Identifier for the pattern; derived from the description if omitted.
    #[arg(long)]
    pattern_id: Option<String>,
    /// Provider profiles to query; all meaningful profiles if omitted.
    #[arg(long)]
    provider: Option<Vec<String>>,
}

#[derive(Args)]
struct ReviseArgs {
    /// Text file to revise.
    #[arg(long)]
    file: PathBuf,
    /// Natural-language description of the pattern to revise away.
    #[arg(long)]
    pattern: String,
    /// Identifier for the pattern; derived from the description if omitted.
    #[arg(long)]
    pattern_id: Option<String>,
    /// Provider profiles to query; all meaningful profiles if omitted.
    #[arg(long)]
    provider: Option<Vec<String>>,
    /// Treatment applied to every match.
    #[arg(long, value_enum, default_value = "rewrite")]
    treatment: TreatmentArg,
    /// Custom rewrite instruction instead of the automatic one.
    #[arg(long)]
    instruction: Option<String>,
    /// Write the revised text here instead of printing it.
    #[arg(long)]
    output: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum TreatmentArg {
    Keep,
    Rewrite,
    Delete,
}
