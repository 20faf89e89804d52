use crate::{
    config::Config,
    coordinator::IngestionCoordinator,
    fetch::HttpFetcher,
    item::ItemRef,
    manifest,
    pipeline::{ItemPipeline, StageTimeouts},
    report::BatchReport,
    spool::Spool,
    status::{LogSink, RetryPolicy, StatusReporter, TcpSink},
    store,
    transform::{ImageCodec, TransformSpec},
    util::{ensure_dir, now_rfc3339, run_id},
};
use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

#[derive(Parser, Debug)]
#[command(name = "pixel-ingest")]
#[command(about = "Batch image ingestion: fetch, resize to grayscale, store, report status")]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,

    /// Path to config TOML. If omitted, uses ./pixel-ingest.toml if present.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Override log level (trace/debug/info/warn/error).
    #[arg(long)]
    pub log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the effective config and check the status sink.
    Doctor {},
    /// Print the storage key for every manifest entry.
    Keys {
        #[arg(long)]
        label: Option<String>,
        /// Manifest path or URL; `{label}` is substituted.
        #[arg(long)]
        manifest: Option<String>,
    },
    /// Process one batch.
    Run {
        #[arg(long)]
        label: Option<String>,
        #[arg(long)]
        manifest: Option<String>,
        /// 0 means unbounded.
        #[arg(long)]
        max_concurrency: Option<usize>,
        #[arg(long)]
        out_dir: Option<PathBuf>,
    },
}

/// Whether the process should report success.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Ok,
    ItemFailures,
}

pub async fn dispatch(args: Args) -> Result<RunStatus> {
    let cfg_path = resolve_config_path(args.config.as_deref());
    let mut cfg = Config::load_or_default(&cfg_path)?;

    let log_path = resolve_log_path(&cfg);
    let _guard = init_logging(&args, &cfg, log_path.as_deref())?;

    match &args.cmd {
        Command::Doctor {} => doctor(&cfg).await,
        Command::Keys { label, manifest } => {
            if let Some(m) = manifest {
                cfg.manifest.source = m.clone();
            }
            let label = resolve_label(&cfg, label.as_deref())?;
            keys(&cfg, &label).await
        }
        Command::Run {
            label,
            manifest,
            max_concurrency,
            out_dir,
        } => {
            if let Some(m) = manifest {
                cfg.manifest.source = m.clone();
            }
            if let Some(n) = max_concurrency {
                cfg.global.max_concurrency = *n;
            }
            if let Some(out) = out_dir {
                cfg.paths.out_dir = out.display().to_string();
            }
            let label = resolve_label(&cfg, label.as_deref())?;
            run(&cfg, &label).await
        }
    }
}

fn resolve_config_path(user: Option<&Path>) -> PathBuf {
    user.map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("pixel-ingest.toml"))
}

fn resolve_label(cfg: &Config, user: Option<&str>) -> Result<String> {
    let label = user.unwrap_or(cfg.global.label.as_str()).trim();
    if label.is_empty() {
        return Err(anyhow!("no label given (use --label or global.label)"));
    }
    Ok(label.to_string())
}

fn init_logging(args: &Args, cfg: &Config, file_path: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let level = args
        .log_level
        .as_deref()
        .unwrap_or(cfg.logging.level.as_str());

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let stdout_layer = if cfg.logging.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed()
    };

    let (file_layer, guard) = if let Some(path) = file_path {
        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        ensure_dir(parent)?;
        let file = std::fs::File::create(path)
            .with_context(|| format!("create log file: {}", path.display()))?;
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
        .with(stdout_layer)
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
    Some(PathBuf::from(&cfg.paths.out_dir).join("pixel-ingest.log"))
}

async fn doctor(cfg: &Config) -> Result<RunStatus> {
    let addr = format!("{}:{}", cfg.status.host, cfg.status.port);
    let sink = if cfg.status.enabled {
        match TcpSink::connect(&cfg.status).await {
            Ok(_) => serde_json::json!({ "addr": addr, "reachable": true }),
            Err(e) => serde_json::json!({ "addr": addr, "reachable": false, "error": format!("{e:#}") }),
        }
    } else {
        serde_json::json!({ "enabled": false })
    };
    let transform = TransformSpec::from_config(&cfg.transform).map(|_| "ok".to_string());

    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "config": cfg,
            "status_sink": sink,
            "transform": transform.unwrap_or_else(|e| format!("{e:#}")),
            "store_backend": cfg.store.backend,
        }))?
    );
    Ok(RunStatus::Ok)
}

async fn keys(cfg: &Config, label: &str) -> Result<RunStatus> {
    let source = manifest::from_config(&cfg.manifest, label)?;
    let refs = source
        .read_refs(label)
        .await
        .with_context(|| format!("reading manifest for label {label}"))?;
    let rows: Vec<_> = refs
        .iter()
        .map(|r| {
            serde_json::json!({
                "reference": r.as_str(),
                "key": r.storage_key(label).map(|k| k.as_object_key()),
            })
        })
        .collect();
    println!("{}", serde_json::to_string_pretty(&rows)?);
    Ok(RunStatus::Ok)
}

async fn run(cfg: &Config, label: &str) -> Result<RunStatus> {
    // Fatal setup: manifest, collaborators, sink. Nothing has been reported yet.
    let source = manifest::from_config(&cfg.manifest, label)?;
    let refs: Vec<ItemRef> = source
        .read_refs(label)
        .await
        .with_context(|| format!("reading manifest for label {label}"))?;
    let run_id = run_id(label, &refs);
    info!("run_id={run_id} label={label} items={}", refs.len());

    let spec = TransformSpec::from_config(&cfg.transform)?;
    let fetcher = Arc::new(HttpFetcher::new(&cfg.fetch, &cfg.security)?);
    let object_store = store::from_config(&cfg.store)?;

    let retry = RetryPolicy::from_config(&cfg.status);
    let (reporter, reporter_task) = if cfg.status.enabled {
        let sink = TcpSink::connect(&cfg.status).await?;
        StatusReporter::spawn(sink, cfg.status.buffer, retry)
    } else {
        StatusReporter::spawn(LogSink, cfg.status.buffer, retry)
    };

    let pipeline = ItemPipeline::new(fetcher, Arc::new(ImageCodec), object_store, reporter)
        .with_spec(spec)
        .with_spool(Spool::from_config(&cfg.spool, &cfg.paths))
        .with_timeouts(StageTimeouts::from_config(cfg));
    let coordinator =
        IngestionCoordinator::new(pipeline).with_max_concurrency(cfg.global.max_concurrency);

    let cancel = coordinator.cancellation_token();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; no new items will start");
            cancel.cancel();
        }
    });

    let started = now_rfc3339();
    let result = coordinator.run(label, refs).await;
    ctrl_c.abort();
    drop(coordinator);
    let status_stats = reporter_task.join().await;
    let result = result?;

    if status_stats.dropped > 0 {
        warn!("{} status messages were dropped", status_stats.dropped);
    }

    let report = BatchReport {
        run_id: run_id.clone(),
        label: label.to_string(),
        started,
        finished: now_rfc3339(),
        max_concurrency: cfg.global.max_concurrency,
        status: status_stats,
        result,
    };

    if cfg.output.write_report_json {
        let run_dir = PathBuf::from(&cfg.paths.out_dir).join(&run_id);
        ensure_dir(&run_dir)?;
        let path = run_dir.join(&cfg.output.report_filename);
        std::fs::write(&path, serde_json::to_string_pretty(&report)?)
            .with_context(|| format!("writing report: {}", path.display()))?;
        info!("report written to {}", path.display());
    }

    if cfg.global.print_summary {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "run_id": run_id,
                "label": label,
                "total": report.result.total,
                "succeeded": report.result.succeeded,
                "failed": report.result.failed,
                "skipped": report.result.skipped,
            }))?
        );
    }

    if report.result.has_failures() {
        warn!(
            "{} of {} items failed",
            report.result.failed, report.result.total
        );
        if cfg.global.fail_on_item_errors {
            return Ok(RunStatus::ItemFailures);
        }
    }
    Ok(RunStatus::Ok)
}
