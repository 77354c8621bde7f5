use chrono::Utc;
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tally_core::config::{TallyConfig, parse_feed_arg};
use tally_core::error::{ConfigError, TallyError, ValidationError};
use tally_core::provider::{JsonFileFeed, ProviderGateways, TaskFeed};
use tally_core::store::{CompletionStore, PriorityStore};
use tally_core::types::{TaskKey, TaskRecord, TaskSource};
use tally_core::validation::parse_priority;
use tally_core::{
    CompletionOrchestrator, RefreshCoordinator, RefreshOutcome, RefreshReport, RequestContext,
    build_task_key, derive_original_id,
};
use tally_db::DbStore;
use tally_events::bus::EventBus;
use tally_events::types::EventSource;

const LOG_ENV: &str = "TALLY_LOG";

#[derive(Parser)]
#[command(name = "tally", version, about = "Unified task list with local completion tracking")]
struct Cli {
    /// Project root holding `.tally/` (defaults to the current directory).
    #[arg(long, global = true)]
    root: Option<PathBuf>,
    #[arg(short, long, global = true)]
    verbose: bool,
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Refresh every feed and print the reconciled task list.
    List {
        #[arg(long = "feed", value_name = "SOURCE=PATH")]
        feeds: Vec<String>,
    },
    /// Complete one task by key (`Source::originalId`) or view id.
    Complete {
        #[arg(long)]
        key: String,
        #[arg(long, default_value = "")]
        note: String,
        #[arg(long = "feed", value_name = "SOURCE=PATH")]
        feeds: Vec<String>,
    },
    Completed {
        #[command(subcommand)]
        command: CompletedCommand,
    },
    Priority {
        #[command(subcommand)]
        command: PriorityCommand,
    },
    /// Drop completed snapshots according to the configured retention policy.
    Prune,
}

#[derive(Subcommand)]
enum CompletedCommand {
    List,
}

#[derive(Subcommand)]
enum PriorityCommand {
    List,
    Set { key: String, priority: String },
    Clear { key: String },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PruneOutput {
    removed: usize,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(err) = init_tracing(cli.quiet, cli.verbose) {
        eprintln!("{err}");
        return ExitCode::FAILURE;
    }
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(quiet: bool, verbose: bool) -> Result<(), String> {
    let level = if quiet {
        "error"
    } else if verbose {
        "debug"
    } else {
        "warn"
    };

    let filter = tracing_subscriber::EnvFilter::try_from_env(LOG_ENV)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|error| format!("failed to initialize tracing subscriber: {error}"))
}

async fn run(cli: Cli) -> Result<(), TallyError> {
    let root = resolve_root(cli.root)?;
    let config = TallyConfig::load(&root)?;
    let db_path = config.resolved_db_path(&root);
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent).map_err(|err| ConfigError::Read {
            path: parent.display().to_string(),
            message: err.to_string(),
        })?;
    }
    let store = Arc::new(DbStore::open(&db_path)?);
    let event_bus = EventBus::new(256);
    spawn_event_logger(&event_bus);
    let ctx = RequestContext::new(EventSource::Cli, None);

    match cli.command {
        Command::List { feeds } => {
            let feeds = build_feeds(&config, &root, &feeds)?;
            let coordinator =
                RefreshCoordinator::new(feeds, store.clone(), store.clone(), event_bus.clone());
            let report = refresh(&coordinator, &ctx).await?;
            print_json(&report)
        }
        Command::Complete { key, note, feeds } => {
            let feeds = build_feeds(&config, &root, &feeds)?;
            let coordinator =
                RefreshCoordinator::new(feeds, store.clone(), store.clone(), event_bus.clone());
            let report = refresh(&coordinator, &ctx).await?;
            let task = find_task(&report.tasks, &key)
                .cloned()
                .ok_or(TallyError::TaskNotFound { key })?;

            let orchestrator = CompletionOrchestrator::new(
                store.clone(),
                ProviderGateways::default(),
                config.completion.clone(),
                event_bus.clone(),
            );
            let previous_id = task.id.clone();
            let mut attempt = orchestrator.begin(&ctx, task)?;
            let record = orchestrator.confirm(&ctx, &mut attempt, &note).await?;
            coordinator
                .view()
                .replace_task(previous_id.as_deref(), record.clone())
                .await;
            print_json(&record)
        }
        Command::Completed {
            command: CompletedCommand::List,
        } => print_json(&store.get_all()?),
        Command::Priority { command } => run_priority(store.as_ref(), command),
        Command::Prune => {
            let removed = store.prune(&config.retention, Utc::now())?;
            print_json(&PruneOutput { removed })
        }
    }
}

fn run_priority(store: &DbStore, command: PriorityCommand) -> Result<(), TallyError> {
    match command {
        PriorityCommand::List => {
            let entries: BTreeMap<String, String> = store
                .all()?
                .into_iter()
                .map(|(key, priority)| (key.to_string(), priority.to_string()))
                .collect();
            print_json(&entries)
        }
        PriorityCommand::Set { key, priority } => {
            let (source, original_id) = parse_key(&key)?;
            let priority = parse_priority(Some(priority.as_str()))?;
            store.set(&source, &original_id, priority)?;
            Ok(())
        }
        PriorityCommand::Clear { key } => {
            let (source, original_id) = parse_key(&key)?;
            store.set(&source, &original_id, None)?;
            Ok(())
        }
    }
}

async fn refresh(
    coordinator: &RefreshCoordinator<DbStore, DbStore>,
    ctx: &RequestContext,
) -> Result<RefreshReport, TallyError> {
    match coordinator.refresh(ctx).await {
        RefreshOutcome::Applied(report) => {
            if let Some(warning) = &report.warning {
                eprintln!("{warning}");
            }
            Ok(report)
        }
        RefreshOutcome::Cancelled => Err(TallyError::Internal {
            message: "refresh was cancelled".to_string(),
        }),
    }
}

fn build_feeds(
    config: &TallyConfig,
    root: &Path,
    extra: &[String],
) -> Result<Vec<Arc<dyn TaskFeed>>, TallyError> {
    let mut sources = config.feed_sources(root)?;
    for value in extra {
        sources.push(parse_feed_arg(value)?);
    }
    Ok(sources
        .into_iter()
        .map(|(source, path)| Arc::new(JsonFileFeed::new(source, path)) as Arc<dyn TaskFeed>)
        .collect())
}

fn find_task<'a>(tasks: &'a [TaskRecord], needle: &str) -> Option<&'a TaskRecord> {
    tasks.iter().find(|task| {
        if task.id.as_deref() == Some(needle) {
            return true;
        }
        let original_id = derive_original_id(task);
        !original_id.is_empty() && build_task_key(&task.source, &original_id).as_str() == needle
    })
}

fn parse_key(value: &str) -> Result<(TaskSource, String), ValidationError> {
    TaskKey::parse(value)
        .filter(|(source, original_id)| !source.is_empty() && !original_id.trim().is_empty())
        .ok_or(ValidationError::MissingIdentity)
}

fn resolve_root(root: Option<PathBuf>) -> Result<PathBuf, TallyError> {
    match root {
        Some(root) => Ok(root),
        None => std::env::current_dir().map_err(|err| {
            TallyError::Config(ConfigError::Read {
                path: ".".to_string(),
                message: err.to_string(),
            })
        }),
    }
}

fn spawn_event_logger(event_bus: &EventBus) {
    let mut receiver = event_bus.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = receiver.recv().await {
            tracing::debug!(seq = event.seq, id = %event.id, body = %event.body, "event");
        }
    });
}

fn print_json<T: Serialize>(value: &T) -> Result<(), TallyError> {
    let json = serde_json::to_string_pretty(value).map_err(|err| TallyError::Internal {
        message: err.to_string(),
    })?;
    println!("{json}");
    Ok(())
}
