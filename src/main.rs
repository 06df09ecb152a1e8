use clap::{CommandFactory, Parser};
use std::io::{IsTerminal, Write};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

mod config;
mod error;
mod io;
mod json;
mod llm;
mod orchestrator;
mod rank;
mod render;
mod runner;
mod validate;

use crate::config::{CliOverrides, RunSettings};
use crate::error::FixError;
use crate::llm::{ModelProviderAdapter, ProviderKind, ProviderRegistry, REMOTE_KEY_ENV};
use crate::orchestrator::{Candidate, FallbackPlan, Orchestrator};
use crate::rank::{CandidateModel, SortKey};
use crate::runner::{Progress, Silent, Spinner, TaskFailure};

const HELP_EXAMPLES: &str = "\
Examples:
  cat app.py | aifixer > fixed.py
  aifixer --free --max-fallbacks 3 < app.py > fixed.py
  aifixer --model openai/gpt-4o --fallback anthropic/claude-3-haiku < app.py
  aifixer --local-model llama3 --fix-file-only --target-file src/app.py < flattened.txt
  aifixer --list-models --sort-by context --num-models 10
  aifixer --list-todo-files < flattened.txt
";

#[derive(Parser, Debug, Clone)]
#[command(name = "aifixer", version, about = "Pipe code through a chat model to fix its TODOs", long_about = None)]
struct Cli {
    /// Remote model tried first
    #[arg(long = "model")]
    model: Option<String>,

    /// Local model tried before any remote model
    #[arg(long = "local-model", alias = "ollama-model")]
    local_model: Option<String>,

    /// Pick the primary and fallbacks from the free remote models
    #[arg(long = "free")]
    free: bool,

    /// Remote fallback model (repeatable, tried in order)
    #[arg(long = "fallback")]
    fallbacks: Vec<String>,

    /// How many fallbacks may follow the primary
    #[arg(long = "max-fallbacks")]
    max_fallbacks: Option<usize>,

    /// Ranking used by --free and --list-models
    #[arg(long = "sort-by", value_enum)]
    sort_by: Option<SortKey>,

    /// Prompt prefix placed before the input
    #[arg(long = "prompt")]
    prompt: Option<String>,

    /// Ask for the fixed file only and strip anything around the code
    #[arg(long = "fix-file-only")]
    fix_file_only: bool,

    /// File of a flattened codebase to fix (with --fix-file-only)
    #[arg(long = "target-file")]
    target_file: Option<String>,

    /// List remote models and exit
    #[arg(long = "list-models")]
    list_models: bool,

    /// List local models and exit
    #[arg(long = "list-local-models", alias = "list-ollama-models")]
    list_local_models: bool,

    /// Rows shown by --list-models
    #[arg(long = "num-models", default_value_t = 20)]
    num_models: usize,

    /// List files of a flattened codebase that contain TODO or FIXME
    #[arg(long = "list-todo-files")]
    list_todo_files: bool,

    /// Print usage examples
    #[arg(long = "help-examples")]
    help_examples: bool,

    /// Timeout (seconds) for each model attempt
    #[arg(long = "timeout")]
    timeout_secs: Option<u64>,

    /// Total time (seconds) allowed across all attempts
    #[arg(long = "budget")]
    budget_secs: Option<u64>,

    /// Pause (milliseconds) before trying the next model
    #[arg(long = "backoff-ms")]
    backoff_ms: Option<u64>,

    /// Output JSON instead of plain text
    #[arg(long = "json")]
    json: bool,

    /// Increase verbosity (-v, -vv)
    #[arg(short = 'v', action = clap::ArgAction::Count)]
    verbose: u8,

    /// Input text (read from stdin when omitted)
    text: Vec<String>,
}

impl Cli {
    fn overrides(&self) -> CliOverrides {
        CliOverrides {
            model: self.model.clone(),
            local_model: self.local_model.clone(),
            prompt: self.prompt.clone(),
            max_fallbacks: self.max_fallbacks,
            fallbacks: self.fallbacks.clone(),
            sort_by: self.sort_by,
            timeout_secs: self.timeout_secs,
            backoff_ms: self.backoff_ms,
            budget_secs: self.budget_secs,
        }
    }
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("aifixer={level}")));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    dotenvy::dotenv().ok();

    let json = cli.json;
    let result = tokio::select! {
        r = run(cli) => r,
        _ = tokio::signal::ctrl_c() => {
            runner::clear_progress_line();
            warn!("Operation cancelled by user.");
            std::process::exit(130);
        }
    };

    if let Err(e) = result {
        let (code, hint, class) = classify_error(&e);
        if json {
            render::print_json_error(code, &format!("{e:#}"), hint);
        } else {
            match hint {
                Some(hint) => eprintln!("error[{class}]: {e:#} (hint: {hint})"),
                None => eprintln!("error[{class}]: {e:#}"),
            }
        }
        std::process::exit(1);
    }

    Ok(())
}

fn classify_error(e: &anyhow::Error) -> (&'static str, Option<&'static str>, &'static str) {
    match e.downcast_ref::<FixError>() {
        Some(fe) => {
            let (code, hint) = fe.code();
            (code, hint, fe.class().as_str())
        }
        None => ("unknown", None, "error"),
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    if cli.help_examples {
        eprint!("{HELP_EXAMPLES}");
        return Ok(());
    }

    let mut settings = config::resolve_effective_settings(cli.overrides())?;
    settings.show_progress = std::io::stderr().is_terminal();
    let registry = ProviderRegistry::with_defaults(&settings.remote_base, &settings.local_base, settings.temperature)?;
    let credential = std::env::var(REMOTE_KEY_ENV).ok().filter(|k| !k.trim().is_empty());

    if cli.list_models {
        return list_remote_models(&registry, credential, &settings, cli.num_models, cli.json).await;
    }
    if cli.list_local_models {
        return list_local_models(&registry, &settings, cli.json).await;
    }

    if settings.show_progress {
        eprintln!("AIFixer v{}", env!("CARGO_PKG_VERSION"));
    }

    let Some(input) = io::gather_input(&cli.text)? else {
        eprintln!("{}", Cli::command().render_help());
        return Ok(());
    };

    if cli.list_todo_files {
        let files = io::analyze_codebase_for_todos(&input)?;
        if cli.json {
            render::print_json(&serde_json::json!({ "files": files }));
        } else if files.is_empty() {
            println!("No TODOs found.");
        } else {
            println!("{}", files.join("\n"));
        }
        return Ok(());
    }

    settings.prompt = io::build_fix_prompt(&settings.prompt, cli.fix_file_only, cli.target_file.as_deref());
    let plan = build_plan(cli.free, &settings, &registry, credential.as_deref()).await?;

    let started = Instant::now();
    let mut outcome = Orchestrator::new(&registry, &settings, credential).run(&plan, &input).await?;
    if cli.fix_file_only {
        outcome.content = io::extract_fixed_file(&outcome.content)?;
    }
    if settings.show_progress {
        info!("Completed in {:.1}s", started.elapsed().as_secs_f64());
    }

    if cli.json {
        render::print_json(&outcome);
    } else {
        let mut out = std::io::stdout().lock();
        out.write_all(outcome.content.as_bytes())?;
        out.flush()?;
    }
    Ok(())
}

/// Local candidate first (if any), then the remote chain. Without a remote
/// credential a local run drops the remote chain; a remote-only run fails.
async fn build_plan(
    free: bool,
    settings: &RunSettings,
    registry: &ProviderRegistry,
    credential: Option<&str>,
) -> anyhow::Result<FallbackPlan> {
    let mut candidates = Vec::new();
    if let Some(local) = &settings.local_model {
        candidates.push(Candidate::new(ProviderKind::Local, local.clone()));
    }

    if credential.is_none() {
        if candidates.is_empty() {
            return Err(FixError::MissingCredential {
                provider: ProviderKind::Remote.name().to_string(),
                env_var: REMOTE_KEY_ENV.to_string(),
            }
            .into());
        }
        warn!("{REMOTE_KEY_ENV} not set; using the local model only");
        return Ok(FallbackPlan::new(candidates)?);
    }

    let remote_ids = if free {
        select_free_models(settings, registry, credential).await?
    } else {
        orchestrator::chain(&settings.model, &settings.fallbacks, settings.max_fallbacks)
    };
    candidates.extend(remote_ids.into_iter().map(|id| Candidate::new(ProviderKind::Remote, id)));
    Ok(FallbackPlan::new(candidates)?)
}

async fn select_free_models(settings: &RunSettings, registry: &ProviderRegistry, credential: Option<&str>) -> anyhow::Result<Vec<String>> {
    let adapter = adapter_for(registry, ProviderKind::Remote)?;
    let catalog = fetch_catalog(adapter, credential, settings, "Selecting free models").await?;
    let ids = rank::rank(&rank::free_models(catalog), settings.sort_by, settings.max_fallbacks)?;
    if let Some((primary, fallbacks)) = ids.split_first() {
        info!("Selected free model: {primary}");
        if !fallbacks.is_empty() {
            info!("Fallback models: {}", fallbacks.join(", "));
        }
    }
    Ok(ids)
}

async fn list_remote_models(
    registry: &ProviderRegistry,
    credential: Option<String>,
    settings: &RunSettings,
    num_models: usize,
    json: bool,
) -> anyhow::Result<()> {
    let adapter = adapter_for(registry, ProviderKind::Remote)?;
    let catalog = fetch_catalog(adapter, credential.as_deref(), settings, "Fetching models").await?;
    let mut models: Vec<&CandidateModel> = catalog
        .iter()
        .filter(|m| m.id != "openrouter/auto" && m.prompt_price.is_some())
        .collect();
    rank::sort_models(&mut models, settings.sort_by);
    models.truncate(num_models);
    if json {
        render::print_json(&models);
    } else {
        print!("{}", render::remote_catalog_table(&models));
    }
    Ok(())
}

/// An unreachable local service is reported but is not a failure.
async fn list_local_models(registry: &ProviderRegistry, settings: &RunSettings, json: bool) -> anyhow::Result<()> {
    let adapter = adapter_for(registry, ProviderKind::Local)?;
    match fetch_catalog(adapter, None, settings, "Fetching local models").await {
        Ok(models) if json => render::print_json(&models),
        Ok(models) => print!("{}", render::local_catalog_table(&models)),
        Err(e) => {
            if json {
                let (code, hint) = e.code();
                render::print_json_error(code, &e.to_string(), hint);
            } else {
                error!("{e}");
            }
        }
    }
    Ok(())
}

fn adapter_for(registry: &ProviderRegistry, kind: ProviderKind) -> Result<Arc<dyn ModelProviderAdapter>, FixError> {
    registry
        .get(kind)
        .ok_or_else(|| FixError::InvalidArgs(format!("no adapter configured for {kind}")))
}

async fn fetch_catalog(
    adapter: Arc<dyn ModelProviderAdapter>,
    credential: Option<&str>,
    settings: &RunSettings,
    label: &str,
) -> Result<Vec<CandidateModel>, FixError> {
    let provider = adapter.kind().name().to_string();
    let timeout = settings.attempt_timeout;
    let credential = credential.map(str::to_string);
    let work = async move { adapter.list_models(credential.as_deref(), timeout).await };
    let mut progress: Box<dyn Progress> = if settings.show_progress {
        Box::new(Spinner::new(label))
    } else {
        Box::new(Silent)
    };
    match runner::run(work, timeout, progress.as_mut()).await {
        Ok(listed) => listed,
        Err(TaskFailure::TimedOut(after)) => Err(FixError::Catalog {
            provider,
            message: format!("timed out after {}s", after.as_secs()),
        }),
        Err(TaskFailure::Panicked(message)) => Err(FixError::Catalog { provider, message }),
    }
}
