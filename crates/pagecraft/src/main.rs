mod catalog;
mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use object_store::S3ObjectStore;
use orchestrator::{Engine, Page, PromptTemplater, StreamingEventEmitter, TaskId, TaskStateRegistry};
use serde::Deserialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::metadata::LevelFilter;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use catalog::CatalogStore;
use config::PagecraftConfig;

#[derive(Parser, Debug)]
struct Args {
    /// Path to the configuration file
    #[arg(
        short,
        long,
        value_parser = clap::value_parser!(PathBuf),
        default_value = "config.toml"
    )]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate every page of an outline, streaming progress frames to stdout.
    Generate {
        /// JSON file: `{ "pages": [...], "full_outline": "...", "user_topic": "..." }`.
        outline: PathBuf,
        #[arg(long)]
        task_id: Option<String>,
    },
    /// Re-run a single failed page.
    Retry {
        task_id: String,
        /// JSON-encoded `Page` to retry.
        page: PathBuf,
        #[arg(long)]
        use_reference: bool,
    },
    /// Print the in-memory state recorded for a task.
    Status { task_id: String },
}

/// On-disk shape accepted by `generate`, mirroring the `Outline` the engine
/// expects plus the user-supplied topic string.
#[derive(Deserialize)]
struct OutlineFile {
    pages: Vec<Page>,
    full_outline: String,
    user_topic: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing()?;

    let args = Args::parse();
    let config = PagecraftConfig::load(&args.config)?;
    let provider_config = config.active_provider_config()?;

    let object_store = S3ObjectStore::new(config.object_store.clone().into()).await;
    let templater = PromptTemplater::new(
        read_optional(&config.templates.full_path)?,
        read_optional(&config.templates.short_path)?,
    );

    let (_config_tx, config_rx) = watch::channel(Arc::new(provider_config));
    let registry = Arc::new(TaskStateRegistry::new());
    let engine = Engine::new(registry, Arc::new(object_store), Arc::new(templater), config_rx);
    let catalog = CatalogStore::new();

    match args.command {
        Command::Generate { outline, task_id } => run_generate(&engine, &catalog, outline, task_id).await,
        Command::Retry {
            task_id,
            page,
            use_reference,
        } => run_retry(&engine, task_id, page, use_reference).await,
        Command::Status { task_id } => run_status(&engine, &task_id),
    }
}

fn init_tracing() -> anyhow::Result<()> {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .from_env()
        .context("failed to parse filter from env")?;

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .pretty()
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber).context("setting default subscriber failed")?;

    Ok(())
}

fn read_optional(path: &Option<PathBuf>) -> anyhow::Result<Option<String>> {
    path.as_ref()
        .map(std::fs::read_to_string)
        .transpose()
        .context("failed to read template override")
}

async fn run_generate(
    engine: &Engine,
    catalog: &CatalogStore,
    outline_path: PathBuf,
    task_id: Option<String>,
) -> anyhow::Result<()> {
    let raw = std::fs::read_to_string(&outline_path)
        .with_context(|| format!("failed to read outline file {}", outline_path.display()))?;
    let outline: OutlineFile = serde_json::from_str(&raw).context("outline file is not valid JSON")?;

    let task_id = task_id.map(TaskId);
    let stream = engine
        .generate_images(
            outline.pages,
            task_id,
            outline.full_outline.clone(),
            None,
            outline.user_topic,
            CancellationToken::new(),
        )
        .context("failed to start generation")?;

    let emitter = StreamingEventEmitter::new(Box::pin(stream), CancellationToken::new());
    let mut finished_task_id = None;
    emitter
        .run(|frame| {
            print!("{frame}");
            if let Some(id) = extract_finish_task_id(&frame) {
                finished_task_id = Some(id);
            }
            true
        })
        .await;

    if let Some(task_id) = finished_task_id {
        if let Some(state) = engine.get_task_state(&task_id) {
            catalog.record(
                task_id,
                outline.full_outline,
                state.generated.values().cloned().collect(),
                state.status(),
            );
        }
    }

    Ok(())
}

async fn run_retry(engine: &Engine, task_id: String, page_path: PathBuf, use_reference: bool) -> anyhow::Result<()> {
    let raw = std::fs::read_to_string(&page_path)
        .with_context(|| format!("failed to read page file {}", page_path.display()))?;
    let page: Page = serde_json::from_str(&raw).context("page file is not valid JSON")?;

    let outcome = engine
        .retry_single(&TaskId(task_id), page, use_reference, None, None)
        .await
        .context("retry failed")?;

    println!("{}", serde_json::to_string_pretty(&DebugOutcome::from(outcome))?);
    Ok(())
}

fn run_status(engine: &Engine, task_id: &str) -> anyhow::Result<()> {
    match engine.get_task_state(&TaskId(task_id.to_string())) {
        Some(state) => {
            println!("status: {:?}", state.status());
            println!("generated: {:?}", state.generated);
            println!("failed: {:?}", state.failed);
        }
        None => println!("no such task: {task_id}"),
    }
    Ok(())
}

/// Scrapes the `task_id` back out of a `finish` frame's JSON body so the CLI
/// can look the task back up in the registry without threading extra state
/// through the emitter.
fn extract_finish_task_id(frame: &str) -> Option<TaskId> {
    let data_line = frame.lines().find(|line| line.starts_with("data: "))?;
    let value: serde_json::Value = serde_json::from_str(data_line.trim_start_matches("data: ")).ok()?;
    value.get("task_id")?.as_str().map(|s| TaskId(s.to_string()))
}

#[derive(serde::Serialize)]
struct DebugOutcome {
    index: u32,
    ok: bool,
    image_url: Option<String>,
    message: Option<String>,
}

impl From<orchestrator::RetryOutcome> for DebugOutcome {
    fn from(outcome: orchestrator::RetryOutcome) -> Self {
        match outcome {
            orchestrator::RetryOutcome::Ok { index, image_url } => DebugOutcome {
                index,
                ok: true,
                image_url: Some(image_url),
                message: None,
            },
            orchestrator::RetryOutcome::Err { index, message } => DebugOutcome {
                index,
                ok: false,
                image_url: None,
                message: Some(message),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_finish_task_id_reads_data_line() {
        let frame = "event: finish\ndata: {\"task_id\":\"task_abc12345\",\"success\":true}\n\n";
        assert_eq!(
            extract_finish_task_id(frame),
            Some(TaskId("task_abc12345".to_string()))
        );
    }

    #[test]
    fn extract_finish_task_id_ignores_non_finish_frames() {
        let frame = "event: progress\ndata: {\"status\":\"generating\"}\n\n";
        assert_eq!(extract_finish_task_id(frame), None);
    }
}
