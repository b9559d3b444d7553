//! mvreview - batch content review for music videos.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

use mvreview_core::core::batch::{report_label, write_report, BatchOptions, BatchRunner};
use mvreview_core::core::config::ReviewConfig;
use mvreview_core::core::media::FfmpegMediaSource;
use mvreview_core::core::review::ReviewEngine;
use mvreview_core::core::services;
use mvreview_core::core::RuleId;

/// Exit code for runs that could not start or finish
const EXIT_FAILURE: u8 = 2;

/// Command-line arguments for the review tool.
#[derive(Parser, Debug)]
#[command(name = "mvreview")]
#[command(version)]
#[command(about = "Rule-based content review for music videos")]
#[command(long_about = "Reviews music videos against seven content rules and moves \
    violating files aside.\n\n\
    RULES:\n    \
    1  blocked lyricist/composer\n    \
    2  portrait video or black borders\n    \
    3  sudden volume change\n    \
    4  exposure or inappropriate content\n    \
    5  landscape-only footage\n    \
    6  advertisement\n    \
    7  drug use\n\n\
    EXIT CODES:\n    \
    0 all passed, 1 violations found, 2 errors only or fatal failure")]
struct Args {
    /// Video file or directory to review
    input: PathBuf,

    /// Directory violating videos are moved into
    #[arg(long)]
    violation_dir: Option<PathBuf>,

    /// Write the JSON report here
    #[arg(long)]
    report: Option<PathBuf>,

    /// Only run these rules (1-7)
    #[arg(long, num_args = 1.., value_parser = clap::value_parser!(u8).range(1..=7))]
    rules: Vec<RuleId>,

    /// JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Descend into subdirectories
    #[arg(long)]
    recursive: bool,

    /// Review only; never move files
    #[arg(long)]
    dry_run: bool,

    /// Videos reviewed in parallel (default: CPU count)
    #[arg(long)]
    workers: Option<usize>,

    /// OpenAI-compatible vision API base URL
    #[arg(long)]
    vision_url: Option<String>,

    /// Vision model name
    #[arg(long)]
    vision_model: Option<String>,

    /// Vision API key
    #[arg(long, env = "MVREVIEW_VISION_API_KEY", hide_env_values = true)]
    vision_api_key: Option<String>,

    /// AcoustID application key
    #[arg(long, env = "MVREVIEW_ACOUSTID_KEY", hide_env_values = true)]
    acoustid_key: Option<String>,

    /// Log level or filter directive (overridden by RUST_LOG)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Also write logs to this file
    #[arg(long)]
    log_file: Option<PathBuf>,
}

fn init_logging(level: &str, log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stdout)
        .with_target(false);

    let (file_layer, guard) = match log_file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            std::fs::create_dir_all(dir)
                .with_context(|| format!("cannot create log directory {}", dir.display()))?;
            let file_name = path
                .file_name()
                .context("log file path has no file name")?;
            let appender = tracing_appender::rolling::never(dir, file_name);
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    // Ignore a second initialization
    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .with(file_layer)
        .try_init();

    Ok(guard)
}

/// Loads the configuration file (if any) and layers the flags on top
fn load_config(args: &Args) -> Result<ReviewConfig> {
    let mut config = match &args.config {
        Some(path) => ReviewConfig::load(path)?,
        None => ReviewConfig::default(),
    };

    if let Some(dir) = &args.violation_dir {
        config.batch.violation_dir = dir.clone();
    }
    if args.recursive {
        config.batch.recursive = true;
    }
    if args.dry_run {
        config.batch.dry_run = true;
    }
    if let Some(workers) = args.workers {
        config.batch.workers = workers;
    }
    if let Some(url) = &args.vision_url {
        config.services.vision.api_url = url.clone();
    }
    if let Some(model) = &args.vision_model {
        config.services.vision.model = model.clone();
    }
    if let Some(key) = &args.vision_api_key {
        config.services.vision.api_key = Some(key.clone());
    }
    if let Some(key) = &args.acoustid_key {
        config.services.acoustid.api_key = Some(key.clone());
    }
    if !args.rules.is_empty() {
        config.select_rules(&args.rules)?;
    }

    config.normalize();
    for warning in config.disable_unreachable_rules() {
        warn!("{}", warning);
    }
    config.validate()?;
    Ok(config)
}

async fn run(args: Args) -> Result<u8> {
    let config = load_config(&args)?;

    let media = FfmpegMediaSource::detect(&config.media)
        .context("ffmpeg and ffprobe are required")?;
    if media.tools().fpcalc.is_none() && config.rules.metadata.enabled {
        warn!("fpcalc not found: songs cannot be identified, metadata rule will pass");
    }

    let services = services::connect(&config)?;
    let engine = ReviewEngine::from_config(&config, &services, Arc::new(media))?;
    if engine.enabled_rule_names().is_empty() {
        bail!("no rules are enabled");
    }

    let runner = BatchRunner::new(Arc::new(engine), BatchOptions::from_config(&config));
    if runner.options().dry_run {
        info!("Dry run: violating videos will not be moved");
    }

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted: finishing videos in progress, skipping the rest");
            interrupt.cancel();
        }
    });

    let report = runner.run(&args.input, &cancel).await?;

    info!("{}", report.summary_line());
    for (number, count) in &report.summary.violations_by_rule {
        info!("  rule {} ({}): {} video(s)", number, report_label(*number), count);
    }
    if report.summary.action_failures > 0 {
        warn!(
            "{} violating video(s) could not be moved",
            report.summary.action_failures
        );
    }

    if let Some(path) = &args.report {
        write_report(path, &report)
            .with_context(|| format!("cannot write report to {}", path.display()))?;
        info!("Report written to {}", path.display());
    }

    Ok(u8::try_from(report.exit_code()).unwrap_or(EXIT_FAILURE))
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let _guard = match init_logging(&args.log_level, args.log_file.as_deref()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("mvreview: {:#}", e);
            return ExitCode::from(EXIT_FAILURE);
        }
    };

    match run(args).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!("{:#}", e);
            ExitCode::from(EXIT_FAILURE)
        }
    }
}
