mod cli;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use cli::{Cli, Command};
use docflow::config::DocflowConfig;
use docflow::gemini::GeminiClient;
use docflow::logging::{self, FileLogger, LocalErrorLog, TracingLogger};
use docflow::manifest::{read_manifest, write_manifest};
use docflow::rotation::{CsvKeyFile, ResourceSource, StaticKeys};
use docflow::stages::{
    DocumentStore, ExtractionStage, LocalStore, PersistenceStage, Prompts, StructuringStage,
    TranslationStage,
};
use docflow::ui::BatchProgress;
use docflow::{BatchCoordinator, BatchJob, CompletionReporter, ResourceRotator, StagePlan};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Err(e) = logging::init_tracing(cli.verbose) {
        eprintln!("failed to initialise logging: {e}");
    }

    let config = DocflowConfig::load(cli.config.as_deref()).context("loading configuration")?;

    match cli.command {
        Command::Run {
            manifest,
            output,
            max_concurrency,
            json,
        } => run_batch(&config, &manifest, output, max_concurrency, json).await,
        Command::Validate { manifest } => validate(&manifest).await,
        Command::Keys => show_keys(&config).await,
    }
}

fn key_source(config: &DocflowConfig) -> Box<dyn ResourceSource> {
    match &config.api_keys {
        Some(keys) => Box::new(StaticKeys::new(keys.clone())),
        None => Box::new(CsvKeyFile::new(&config.keys_csv_path)),
    }
}

async fn build_plan(config: &DocflowConfig) -> Result<StagePlan> {
    let prompts = Prompts::load(
        config.ocr_prompt_path.as_deref(),
        config.translation_prompt_path.as_deref(),
    )
    .await
    .context("loading prompts")?;
    let prompts = Arc::new(prompts);

    let client = GeminiClient::with_base_url(
        &config.gemini_base_url,
        &config.gemini_model,
        config.request_timeout(),
    )
    .context("building Gemini client")?;
    let client = Arc::new(client);
    let store: Arc<dyn DocumentStore> =
        Arc::new(LocalStore::new(&config.input_dir, &config.output_dir));

    let plan = StagePlan::new(
        Arc::new(ExtractionStage::new(
            client.clone(),
            store.clone(),
            prompts.ocr.clone(),
        )),
        Arc::new(TranslationStage::new(client, store.clone(), prompts)),
        Arc::new(StructuringStage),
        Arc::new(PersistenceStage::new(store)),
    )?;
    Ok(plan)
}

async fn run_batch(
    config: &DocflowConfig,
    manifest: &Path,
    output: Option<PathBuf>,
    max_concurrency: Option<usize>,
    json: bool,
) -> Result<()> {
    let max_concurrency = max_concurrency.unwrap_or(config.max_concurrency);
    if max_concurrency == 0 {
        bail!("--max-concurrency must be at least 1");
    }

    let records = read_manifest(manifest)
        .await
        .with_context(|| format!("reading manifest {}", manifest.display()))?;
    let batch = BatchJob::new(manifest, records)
        .with_write_back(output.unwrap_or_else(|| manifest.to_path_buf()));

    let plan = build_plan(config).await?;
    let rotator = Arc::new(ResourceRotator::from_boxed(key_source(config)));
    let session_id = uuid::Uuid::new_v4().to_string();

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupted: finishing in-flight records, dispatching no more");
                cancel.cancel();
            }
        }
    });

    let progress = (!json).then(|| Arc::new(BatchProgress::start(batch.len())));

    let mut coordinator = BatchCoordinator::new(rotator.clone(), Arc::new(plan))
        .with_max_concurrency(max_concurrency)
        .with_cancellation(cancel)
        .with_session_id(&session_id)
        .with_logger(Arc::new(TracingLogger))
        .with_logger(Arc::new(FileLogger::new(&config.log_dir, &session_id)))
        .with_error_log(Arc::new(LocalErrorLog::new(&config.error_log_dir)));
    if let Some(progress) = &progress {
        coordinator = coordinator.with_logger(progress.clone());
    }

    let batch = coordinator.run(batch).await.context("running batch")?;
    write_manifest(&batch.write_back_path, &batch.records)
        .await
        .with_context(|| format!("writing manifest {}", batch.write_back_path.display()))?;
    let summary = CompletionReporter::summarize(&batch.records);

    if json {
        let report = json!({
            "sessionId": session_id,
            "summary": summary,
            "records": batch.records,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if let Some(progress) = progress {
        progress.print_key_usage(&rotator.usage());
        println!("Results written to {}", batch.write_back_path.display());
    }
    Ok(())
}

async fn validate(manifest: &Path) -> Result<()> {
    let records = read_manifest(manifest)
        .await
        .with_context(|| format!("invalid manifest {}", manifest.display()))?;
    let languages: usize = records.iter().map(|r| r.target_languages.len()).sum();
    println!(
        "Manifest OK: {} records, {languages} translations requested",
        records.len()
    );
    Ok(())
}

async fn show_keys(config: &DocflowConfig) -> Result<()> {
    let rotator = ResourceRotator::from_boxed(key_source(config));
    let size = rotator.pool_size().await;
    if size == 0 {
        bail!(
            "no API keys loaded (set {} or check {})",
            docflow::config::ENV_API_KEYS,
            config.keys_csv_path.display()
        );
    }
    info!(keys = size, "key pool loaded");
    println!("{size} API keys loaded");
    Ok(())
}
