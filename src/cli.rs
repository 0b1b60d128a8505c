use crate::{
    chunk_plan::ChunkPlan,
    config::Config,
    engine::{
        PageSplitter,
        command::{CommandExtractor, CommandNormalizer},
        python::PythonSplitter,
    },
    job::JobStatus,
    pipeline::Pipeline,
    report::JobView,
    store::{FileJobStore, JobStore, LocalBlobStore},
    util::ensure_dir,
};
use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, Layer, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "quack-extract")]
#[command(about = "Chunked structured-extraction job runner (page-range chunks + retries + merge)")]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,

    /// Path to config TOML. If omitted, uses ./quack-extract.toml if present.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Override log level (trace/debug/info/warn/error).
    #[arg(long)]
    pub log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the chunk plan for a document or a bare page count.
    Plan {
        #[arg(long, conflicts_with = "pages")]
        input: Option<PathBuf>,
        #[arg(long)]
        pages: Option<u32>,
    },
    /// Store a document and create a pending job.
    Submit {
        #[arg(long)]
        input: PathBuf,
    },
    /// Process a previously submitted job.
    Process {
        #[arg(long)]
        job_id: String,
    },
    /// Submit and process in one go.
    Run {
        #[arg(long)]
        input: PathBuf,
    },
    /// Print the polling view of a job.
    Status {
        #[arg(long)]
        job_id: String,
    },
}

pub fn dispatch(args: Args) -> Result<()> {
    let cfg_path = resolve_config_path(args.config.as_deref());
    let cfg = Config::load(&cfg_path)?;
    let _guard = init_logging(&args, &cfg, resolve_log_path(&cfg).as_deref())?;

    match &args.cmd {
        Command::Plan { input, pages } => plan(&cfg, input.as_deref(), *pages),
        Command::Submit { input } => submit(&cfg, input),
        Command::Process { job_id } => process(&cfg, job_id),
        Command::Run { input } => run(&cfg, input),
        Command::Status { job_id } => status(&cfg, job_id),
    }
}

fn resolve_config_path(user: Option<&Path>) -> PathBuf {
    if let Some(p) = user {
        return p.to_path_buf();
    }
    let default = PathBuf::from("quack-extract.toml");
    if default.exists() {
        default
    } else {
        PathBuf::from("quack-extract.example.toml")
    }
}

fn init_logging(args: &Args, cfg: &Config, file_path: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let level = args
        .log_level
        .as_deref()
        .unwrap_or(cfg.logging.level.as_str());

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let stderr_layer = if cfg.logging.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed()
    };

    let (file_layer, guard) = if let Some(path) = file_path {
        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        ensure_dir(parent)?;
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("open log file: {}", path.display()))?;
        let (non_blocking, guard) = tracing_appender::non_blocking(file);
        let layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_target(true)
            .boxed();
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow!("failed to init logging: {e}"))?;

    Ok(guard)
}

fn resolve_log_path(cfg: &Config) -> Option<PathBuf> {
    if !cfg.logging.write_to_file {
        return None;
    }
    if !cfg.logging.file_path.is_empty() {
        return Some(PathBuf::from(&cfg.logging.file_path));
    }
    Some(PathBuf::from(&cfg.paths.jobs_dir).join("quack-extract.log"))
}

fn build_pipeline(cfg: &Config) -> Result<Pipeline> {
    let extractor = Arc::new(CommandExtractor::new(cfg)?);
    let splitter = Arc::new(PythonSplitter::new(cfg)?);
    let jobs = Arc::new(FileJobStore::open(Path::new(&cfg.paths.jobs_dir))?);
    let blobs = Arc::new(LocalBlobStore::open(Path::new(&cfg.paths.blobs_dir))?);

    let pipeline = Pipeline::new(cfg, extractor, splitter, jobs, blobs);
    if cfg.normalization.enabled {
        return Ok(pipeline.with_normalizer(Arc::new(CommandNormalizer::new(cfg)?)));
    }
    Ok(pipeline)
}

fn plan(cfg: &Config, input: Option<&Path>, pages: Option<u32>) -> Result<()> {
    let page_count = match (input, pages) {
        (_, Some(p)) => p,
        (Some(input), None) => {
            let document = read_input(cfg, input)?;
            PythonSplitter::new(cfg)?.page_count(&document)?
        }
        (None, None) => return Err(anyhow!("either --input or --pages is required")),
    };
    let plan = ChunkPlan::from_page_count(cfg, page_count)?;
    println!("{}", serde_json::to_string_pretty(&plan)?);
    Ok(())
}

fn submit(cfg: &Config, input: &Path) -> Result<()> {
    let document = read_input(cfg, input)?;
    let pipeline = build_pipeline(cfg)?;
    let job_id = pipeline.submit(&document, &source_name(input))?;
    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "job_id": job_id,
            "status": JobStatus::Pending,
        }))?
    );
    Ok(())
}

fn process(cfg: &Config, job_id: &str) -> Result<()> {
    let pipeline = build_pipeline(cfg)?;
    let job = pipeline.process(job_id)?;
    finish(cfg, &JobView::from(&job))
}

fn run(cfg: &Config, input: &Path) -> Result<()> {
    let document = read_input(cfg, input)?;
    let pipeline = build_pipeline(cfg)?;
    let job = pipeline.run(&document, &source_name(input))?;
    finish(cfg, &JobView::from(&job))
}

fn status(cfg: &Config, job_id: &str) -> Result<()> {
    let jobs = FileJobStore::open(Path::new(&cfg.paths.jobs_dir))?;
    let job = jobs
        .get(job_id)?
        .ok_or_else(|| anyhow!("job `{job_id}` not found"))?;
    println!("{}", serde_json::to_string_pretty(&JobView::from(&job))?);
    Ok(())
}

fn finish(cfg: &Config, view: &JobView) -> Result<()> {
    info!("job_id={} status={}", view.job_id, view.status);
    if cfg.global.print_summary {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "job_id": view.job_id,
                "status": view.status,
                "progress": view.progress,
                "error": view.error,
            }))?
        );
    }
    if view.status == JobStatus::Error {
        return Err(anyhow!(
            "job {} failed: {}",
            view.job_id,
            view.error.as_deref().unwrap_or("unknown error")
        ));
    }
    Ok(())
}

fn read_input(cfg: &Config, input: &Path) -> Result<Vec<u8>> {
    validate_input(cfg, input)?;
    std::fs::read(input).with_context(|| format!("reading input: {}", input.display()))
}

fn validate_input(cfg: &Config, input: &Path) -> Result<()> {
    let input_str = input.display().to_string();

    if cfg.security.reject_url_inputs && looks_like_url(&input_str) {
        return Err(anyhow!("URL inputs are disabled: {input_str}"));
    }

    if !input.exists() {
        return Err(anyhow!("input does not exist: {}", input.display()));
    }

    match input.extension().and_then(|s| s.to_str()) {
        Some(ext) if !ext.eq_ignore_ascii_case("pdf") => {
            return Err(anyhow!("input is not a PDF: {}", input.display()));
        }
        Some(_) => {}
        None => warn!("input has no extension; assuming PDF: {}", input.display()),
    }

    Ok(())
}

fn looks_like_url(s: &str) -> bool {
    let s = s.to_ascii_lowercase();
    s.starts_with("http://") || s.starts_with("https://") || s.starts_with("file://")
}

fn source_name(input: &Path) -> String {
    input
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| input.display().to_string())
}
