//! deckbabel - Batched slide-deck translation
//!
//! Command-line entry point wiring the document store, the OpenAI
//! backend, the scheduler, and the metrics sink together.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use anyhow::Result;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, Level};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use tracing_appender::{non_blocking, rolling};

use deckbabel::cli::{Args, Commands};
use deckbabel::collector::analyze_document;
use deckbabel::config::Config;
use deckbabel::document::{DocumentStore, JsonDocumentStore};
use deckbabel::job::{JobRequest, JobStatus, TargetLanguage};
use deckbabel::metrics::{JobMetricsRecord, JsonlMetricsSink, MetricsSink, QueueDepthRecord};
use deckbabel::pipeline::TranslationPipeline;
use deckbabel::scheduler::JobScheduler;
use deckbabel::translate::{check_backend_availability, OpenAiBackend};
use deckbabel::usage::estimate_translation_cost;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    setup_logging(&args)?;

    let config = match &args.config {
        Some(config_path) => Config::from_file(config_path)?,
        None => {
            if std::path::Path::new("config.toml").exists() {
                info!("Found config.toml in current directory, loading...");
                Config::from_file("config.toml")?
            } else {
                Config::default()
            }
        }
    };

    match args.command {
        Commands::Translate { input, output, lang } => {
            translate_command(&config, input, output, &lang).await?;
        }
        Commands::Analyze { input } => {
            let store = JsonDocumentStore;
            let document = store.load(&input)?;
            let analysis = analyze_document(&document);
            println!("Pages:              {}", analysis.pages);
            println!("Translatable texts: {}", analysis.text_count);
        }
        Commands::Estimate { input, model } => {
            let store = JsonDocumentStore;
            let document = store.load(&input)?;
            let texts: Vec<String> = deckbabel::collector::collect_units(&document)
                .into_iter()
                .map(|unit| unit.text)
                .collect();
            let model = model.unwrap_or_else(|| config.translate.model.clone());
            let estimate = estimate_translation_cost(&texts, &model);

            println!("Model:                {}", estimate.model);
            println!("Texts:                {}", estimate.text_count);
            println!("Est. input tokens:    {}", estimate.estimated_input_tokens);
            println!("Est. output tokens:   {}", estimate.estimated_output_tokens);
            println!("Est. total cost:      ${:.6}", estimate.estimated_cost.total_cost);
        }
        Commands::Config { init } => {
            Config::default().save_to_file(&init)?;
            println!("Wrote default configuration to {}", init.display());
        }
    }

    Ok(())
}

/// Forwards records to the JSONL sink while keeping the latest job
/// record around for the end-of-run summary.
struct SummarySink {
    inner: JsonlMetricsSink,
    last_job: std::sync::Mutex<Option<JobMetricsRecord>>,
}

impl MetricsSink for SummarySink {
    fn record_job(&self, record: &JobMetricsRecord) {
        if let Ok(mut last) = self.last_job.lock() {
            *last = Some(record.clone());
        }
        self.inner.record_job(record);
    }

    fn record_queue(&self, record: &QueueDepthRecord) {
        self.inner.record_queue(record);
    }
}

async fn translate_command(
    config: &Config,
    input: PathBuf,
    output: PathBuf,
    lang: &str,
) -> Result<()> {
    let file_size = std::fs::metadata(&input)?.len();
    let filename = input
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();

    // The CLI feeds JSON shape trees directly, so of the upload
    // checks only the size and language ones apply here.
    if file_size > config.limits.max_file_size {
        anyhow::bail!(
            "File too large: {:.1} MB (maximum {} MB)",
            file_size as f64 / 1024.0 / 1024.0,
            config.limits.max_file_size / 1024 / 1024
        );
    }
    let target_lang = TargetLanguage::parse(lang)?;

    let api_key = std::env::var("OPENAI_API_KEY")
        .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY is not set"))?;
    check_backend_availability(&config.translate.endpoint, &api_key).await?;

    let store: Arc<dyn DocumentStore> = Arc::new(JsonDocumentStore);
    let document = store.load(&input)?;
    let analysis = analyze_document(&document);
    info!(
        "Translating {}: {} pages, {} texts",
        filename, analysis.pages, analysis.text_count
    );

    let backend = Arc::new(OpenAiBackend::new(config.translate.clone(), api_key));
    let pipeline = Arc::new(TranslationPipeline::new(store, backend, &config.translate));

    let metrics_path = PathBuf::from(&config.metrics.log_dir).join("metrics.jsonl");
    let metrics = Arc::new(SummarySink {
        inner: JsonlMetricsSink::open(&metrics_path)?,
        last_job: std::sync::Mutex::new(None),
    });

    let scheduler = JobScheduler::start(&config.scheduler, pipeline, metrics.clone());

    let job = scheduler.submit(JobRequest {
        filename: filename.clone(),
        target_lang,
        client_id: "cli".to_string(),
        file_size,
        input_path: input,
        output_path: output.clone(),
        pages: analysis.pages,
        text_count: analysis.text_count,
    })?;

    let progress = ProgressBar::new_spinner();
    progress.set_style(
        ProgressStyle::with_template("{spinner} {msg}").expect("valid progress template"),
    );
    progress.set_message(format!("Translating {} to {}...", filename, target_lang.code()));
    progress.enable_steady_tick(Duration::from_millis(100));

    let finished = loop {
        let current = scheduler.status(&job.job_id)?;
        match current.status {
            JobStatus::Completed | JobStatus::Failed => break current,
            _ => tokio::time::sleep(Duration::from_millis(200)).await,
        }
    };
    progress.finish_and_clear();

    match finished.status {
        JobStatus::Completed => {
            println!("Translated document written to {}", output.display());
            if let Some(record) = metrics.last_job.lock().ok().and_then(|last| last.clone()) {
                println!(
                    "Pages: {}  Texts: {}  Tokens: {} in / {} out  Cost: ${:.6}",
                    record.pages,
                    record.text_count,
                    record.input_tokens,
                    record.output_tokens,
                    record.total_cost_usd
                );
            }
            Ok(())
        }
        _ => Err(anyhow::anyhow!(
            "Translation failed: {}",
            finished.error_message.unwrap_or_else(|| "unknown error".to_string())
        )),
    }
}

fn setup_logging(args: &Args) -> Result<()> {
    let log_dir = std::env::current_dir()?.join(".deckbabel").join("log");
    std::fs::create_dir_all(&log_dir)?;

    let file_appender = rolling::daily(&log_dir, "deckbabel.log");
    let (non_blocking_file, guard) = non_blocking(file_appender);
    // Keep the guard alive for the duration of the program
    std::mem::forget(guard);

    let log_level = if args.verbose { Level::DEBUG } else { Level::INFO };

    let console_layer = fmt::layer()
        .with_target(false)
        .with_file(true)
        .with_line_number(true);

    let file_layer = fmt::layer()
        .with_writer(non_blocking_file)
        .with_target(false)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    Ok(())
}
