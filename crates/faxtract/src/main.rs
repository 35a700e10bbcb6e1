//! Faxtract command-line entry point.
//!
//! `serve` runs the worker pool and the periodic sweep; the other
//! subcommands drive the same service facade the API collaborator uses.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};

use faxtract::{telemetry, FhirPublisher, HttpFhirPublisher, IngestFile, LogFhirPublisher, Service};
use faxtract_db::{FaxtractDb, RecordFilters};
use faxtract_extract::http::{HttpExtractor, HttpOcrProvider};
use faxtract_extract::mock::{ocr_result_with_lines, MockExtractor, MockOcr};
use faxtract_extract::{Extraction, Extractor, OcrProvider};
use faxtract_logging::{init_logging, LogConfig};
use faxtract_pipeline::{Pipeline, PipelineContext, SourceCache};
use faxtract_protocol::config::PipelineConfig;
use faxtract_protocol::types::{Classification, SupportedMime, TemplateId, TenantId};
use faxtract_queue::{CancellationToken, JobQueue, Sweeper, WorkerPool};
use faxtract_store::LocalObjectStore;
use faxtract_templates::TemplateRegistry;

#[derive(Parser)]
#[command(name = "faxtract", version, about = "Document processing pipeline")]
struct Cli {
    /// Verbose console logging
    #[arg(long, global = true)]
    verbose: bool,

    /// Use scripted OCR/extraction providers instead of HTTP endpoints
    #[arg(long, global = true)]
    mock: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run workers and the periodic sweep until interrupted
    Serve,
    /// Process one file synchronously and print the record
    Process {
        file: PathBuf,
        #[arg(long, default_value = "default")]
        tenant: String,
        /// Template id for template-guided extraction
        #[arg(long)]
        template: Option<String>,
        /// Content type; guessed from the extension when omitted
        #[arg(long)]
        mime: Option<String>,
    },
    /// Show queue statistics
    Jobs,
    /// List a tenant's records
    Records {
        #[arg(long, default_value = "default")]
        tenant: String,
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
    /// Manage field-schema templates
    Templates {
        #[command(subcommand)]
        command: TemplateCommand,
    },
    /// Run one sweep cycle over the bulk prefix
    Sweep,
}

#[derive(Subcommand)]
enum TemplateCommand {
    Upload {
        file: PathBuf,
        #[arg(long, default_value = "default")]
        tenant: String,
        #[arg(long)]
        name: String,
    },
    List {
        #[arg(long, default_value = "default")]
        tenant: String,
    },
    Delete {
        id: String,
        #[arg(long, default_value = "default")]
        tenant: String,
    },
}

/// Wired application root. Lifecycles of all collaborators live here.
struct App {
    service: Arc<Service>,
    db: FaxtractDb,
    store: Arc<LocalObjectStore>,
    pipeline: Arc<Pipeline>,
    queue: JobQueue,
    config: Arc<PipelineConfig>,
}

impl App {
    async fn build(config: PipelineConfig, mock: bool) -> Result<Self> {
        let config = Arc::new(config);
        let store = Arc::new(
            LocalObjectStore::open(config.object_store_root.clone())
                .await
                .context("Failed to open object store root")?,
        );
        let db = FaxtractDb::connect(&config.storage_connection)
            .await
            .context("Failed to connect to record store")?;
        let templates = Arc::new(TemplateRegistry::new(db.clone(), store.clone()));
        let (ocr, extractor) = providers(&config, mock)?;

        let ctx = PipelineContext {
            db: db.clone(),
            store: store.clone(),
            ocr,
            extractor,
            templates,
            source_cache: Arc::new(SourceCache::new(Duration::from_secs(
                config.source_cache_ttl_s,
            ))),
            config: config.clone(),
        };
        let pipeline = Arc::new(Pipeline::new(ctx));
        let queue = JobQueue::new(db.clone(), config.clone());

        let publisher: Arc<dyn FhirPublisher> = match &config.fhir {
            Some(endpoint) => Arc::new(HttpFhirPublisher::new(endpoint.clone())),
            None => Arc::new(LogFhirPublisher),
        };
        let service = Arc::new(Service::new(
            pipeline.clone(),
            queue.clone(),
            Some(publisher),
        ));

        Ok(Self {
            service,
            db,
            store,
            pipeline,
            queue,
            config,
        })
    }
}

fn providers(
    config: &PipelineConfig,
    mock: bool,
) -> Result<(Arc<dyn OcrProvider>, Arc<dyn Extractor>)> {
    if mock {
        let ocr = MockOcr::returning(ocr_result_with_lines(&[
            ("SAMPLE MEDICAL DOCUMENT", 0.97),
            ("Patient: Jane Sample", 0.97),
        ]));
        let extraction = Extraction {
            kv_pairs: [
                ("Patient Name".to_string(), "Jane Sample".to_string()),
                ("DOB".to_string(), "1980-01-01".to_string()),
            ]
            .into(),
            kv_confidences: [
                ("Patient Name".to_string(), 0.96),
                ("DOB".to_string(), 0.96),
            ]
            .into(),
            kv_spans: Default::default(),
            classification: Classification::Medical,
            summary: Some("Scripted sample extraction".to_string()),
        };
        return Ok((
            Arc::new(ocr),
            Arc::new(MockExtractor::returning(extraction)),
        ));
    }

    if config.ocr.endpoint.is_empty() {
        bail!("OCR endpoint not configured. Set FAXTRACT_OCR_ENDPOINT or pass --mock.");
    }
    if config.extractor.endpoint.is_empty() {
        bail!("Extractor endpoint not configured. Set FAXTRACT_EXTRACTOR_ENDPOINT or pass --mock.");
    }
    Ok((
        Arc::new(HttpOcrProvider::new(config.ocr.clone())),
        Arc::new(HttpExtractor::new(config.extractor.clone())),
    ))
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(LogConfig {
        app_name: "faxtract",
        verbose: cli.verbose,
    })?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(run(cli))
}

async fn run(cli: Cli) -> Result<()> {
    let config = PipelineConfig::from_env();
    telemetry::log_startup(&config);
    let app = App::build(config, cli.mock).await?;

    match cli.command {
        Command::Serve => serve(&app).await,
        Command::Process {
            file,
            tenant,
            template,
            mime,
        } => process_file(&app, file, tenant, template, mime).await,
        Command::Jobs => {
            let stats = app.service.queue_stats().await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
            Ok(())
        }
        Command::Records { tenant, limit } => {
            let filters = RecordFilters {
                limit: Some(limit),
                ..RecordFilters::default()
            };
            let records = app
                .service
                .list_records(&TenantId::new(tenant), &filters)
                .await?;
            println!("{}", serde_json::to_string_pretty(&records)?);
            Ok(())
        }
        Command::Templates { command } => templates(&app, command).await,
        Command::Sweep => {
            let sweeper = Sweeper::new(
                app.db.clone(),
                app.store.clone(),
                app.queue.clone(),
                app.config.clone(),
                CancellationToken::new(),
            );
            let report = sweeper.sweep_once().await?;
            let cancel = CancellationToken::new();
            let workers = WorkerPool::new(
                app.db.clone(),
                app.pipeline.clone(),
                app.config.clone(),
                cancel,
            );
            let processed = workers.drain().await;
            println!("{}", serde_json::to_string_pretty(&report)?);
            println!("processed {processed} job(s)");
            Ok(())
        }
    }
}

async fn serve(app: &App) -> Result<()> {
    let cancel = CancellationToken::new();
    let workers = WorkerPool::new(
        app.db.clone(),
        app.pipeline.clone(),
        app.config.clone(),
        cancel.clone(),
    );
    let handles = workers.spawn();

    let sweeper = Arc::new(Sweeper::new(
        app.db.clone(),
        app.store.clone(),
        app.queue.clone(),
        app.config.clone(),
        cancel.clone(),
    ));
    let sweep_handle = {
        let sweeper = sweeper.clone();
        tokio::spawn(async move { sweeper.run_periodic().await })
    };

    eprintln!(
        "faxtract serving: {} worker(s), sweep every {} s. Ctrl-C to stop.",
        app.config.worker_concurrency, app.config.sweep_interval_s
    );
    tokio::signal::ctrl_c().await?;
    eprintln!("shutting down...");

    cancel.cancel();
    sweep_handle.abort();
    for handle in handles {
        let _ = handle.await;
    }
    Ok(())
}

async fn process_file(
    app: &App,
    file: PathBuf,
    tenant: String,
    template: Option<String>,
    mime: Option<String>,
) -> Result<()> {
    let bytes = std::fs::read(&file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let filename = file
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| "upload".to_string());
    let mime_type = mime.unwrap_or_else(|| {
        SupportedMime::from_filename(&filename).as_mime().to_string()
    });
    let template_id = template
        .map(|id| TemplateId::parse(&id))
        .transpose()
        .context("Invalid template id")?;

    let response = app
        .service
        .process_single(
            IngestFile {
                bytes,
                mime_type,
                filename,
            },
            TenantId::new(tenant),
            template_id,
        )
        .await?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

async fn templates(app: &App, command: TemplateCommand) -> Result<()> {
    match command {
        TemplateCommand::Upload { file, tenant, name } => {
            let bytes = std::fs::read(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let template = app
                .service
                .upload_template(&bytes, &TenantId::new(tenant), &name)
                .await?;
            println!("{}", serde_json::to_string_pretty(&template)?);
        }
        TemplateCommand::List { tenant } => {
            let templates = app.service.list_templates(&TenantId::new(tenant)).await?;
            println!("{}", serde_json::to_string_pretty(&templates)?);
        }
        TemplateCommand::Delete { id, tenant } => {
            let template_id = TemplateId::parse(&id).context("Invalid template id")?;
            app.service
                .delete_template(&TenantId::new(tenant), &template_id)
                .await?;
            println!("deleted {id}");
        }
    }
    Ok(())
}
