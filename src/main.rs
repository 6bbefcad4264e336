//! Keirin data updater CLI.
//!
//! Thin shell over [`UpdateService::run_period`]: resolves the window from
//! the mode, selects stages, and maps the run report to the exit code.

use anyhow::{bail, Context, Result};
use chrono::{Duration, Local};
use clap::{Parser, ValueEnum};
use dotenv::dotenv;
use keirin_backend::config::AppConfig;
use keirin_backend::dates;
use keirin_backend::db::Store;
use keirin_backend::service::{StepSpec, UpdateService};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Refresh the days around now (today - 2 .. today + 2).
    #[value(name = "check_update")]
    CheckUpdate,
    /// Explicit --start-date .. --end-date window.
    #[value(name = "period")]
    Period,
    /// Full backfill from 2018-01-01; implies --force-update.
    #[value(name = "setup")]
    Setup,
}

#[derive(Debug, Parser)]
#[command(name = "keirin-updater", about = "Keirin racing data update pipeline")]
struct Args {
    #[arg(long, value_enum)]
    mode: Mode,

    /// Window start (YYYY-MM-DD), period mode only.
    #[arg(long)]
    start_date: Option<String>,

    /// Window end (YYYY-MM-DD), period mode only.
    #[arg(long)]
    end_date: Option<String>,

    #[arg(long, default_value_t = 0, value_parser = clap::value_parser!(u8).range(0..=1))]
    step1: u8,
    #[arg(long, default_value_t = 0, value_parser = clap::value_parser!(u8).range(0..=1))]
    step2: u8,
    #[arg(long, default_value_t = 0, value_parser = clap::value_parser!(u8).range(0..=1))]
    step3: u8,
    #[arg(long, default_value_t = 0, value_parser = clap::value_parser!(u8).range(0..=1))]
    step4: u8,
    #[arg(long, default_value_t = 0, value_parser = clap::value_parser!(u8).range(0..=1))]
    step5: u8,

    /// Bypass the ledger filters and re-process everything in the window.
    #[arg(long, default_value_t = 0, value_parser = clap::value_parser!(u8).range(0..=1))]
    force_update: u8,

    /// Restrict the run to these cups.
    #[arg(long, num_args = 1..)]
    venue_codes: Option<Vec<String>>,

    /// Override the configured worker pool size for stages 4 and 5.
    #[arg(long)]
    max_workers: Option<usize>,

    /// Print the resolved plan without touching anything.
    #[arg(long, default_value_t = 0, value_parser = clap::value_parser!(u8).range(0..=1))]
    dry_run: u8,

    #[arg(long, default_value_t = 0, value_parser = clap::value_parser!(u8).range(0..=1))]
    debug: u8,

    #[arg(long, env = "KEIRIN_CONFIG", default_value = "keirin-config.toml")]
    config: String,

    #[arg(long, env = "KEIRIN_DB", default_value = "keirin.db")]
    db: String,
}

fn init_tracing(debug: bool) {
    let default = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn selected_steps(args: &Args) -> Vec<StepSpec> {
    [args.step1, args.step2, args.step3, args.step4, args.step5]
        .iter()
        .enumerate()
        .filter(|(_, &on)| on == 1)
        .map(|(i, _)| StepSpec::from((i + 1) as u8))
        .collect()
}

async fn run(args: Args) -> Result<bool> {
    let mut config = AppConfig::load_or_create(&args.config)?;
    if let Some(workers) = args.max_workers {
        info!(workers, "Overriding max_workers from the command line");
        config.performance.max_workers = workers.max(1);
    }

    let mut force = args.force_update == 1;
    let today = Local::now().date_naive();
    let (start, end) = match args.mode {
        Mode::CheckUpdate => (today - Duration::days(2), today + Duration::days(2)),
        Mode::Period => {
            let (Some(start), Some(end)) = (&args.start_date, &args.end_date) else {
                bail!("period mode needs both --start-date and --end-date");
            };
            (dates::parse_iso_date(start)?, dates::parse_iso_date(end)?)
        }
        Mode::Setup => {
            force = true;
            (
                dates::parse_iso_date("2018-01-01").context("setup epoch")?,
                today,
            )
        }
    };
    if start > end {
        bail!("window start {start} is after end {end}");
    }

    let steps = selected_steps(&args);
    if steps.is_empty() {
        warn!("No steps selected; nothing to do");
        return Ok(true);
    }

    if args.dry_run == 1 {
        info!("=== dry run ===");
        info!(mode = ?args.mode, %start, %end, force, "Resolved window");
        info!(steps = ?keirin_backend::service::normalize_steps(&steps), "Steps");
        if let Some(cups) = &args.venue_codes {
            info!(?cups, "Cup filter");
        }
        info!("Dry run: no fetches, no writes");
        return Ok(true);
    }

    let store = Store::open(&args.db)?;
    let service = Arc::new(UpdateService::new(&config, store)?);

    let (ok, report) = service
        .run_period(start, end, &steps, args.venue_codes.clone(), force)
        .await;

    for (step, outcome) in &report.steps {
        info!(
            step,
            ok = outcome.ok,
            count = outcome.count,
            message = %outcome.message,
            "Step result"
        );
    }
    if let Some(cause) = &report.error {
        error!(cause, "Run aborted");
    }

    Ok(ok)
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenv().ok();
    let args = Args::parse();
    init_tracing(args.debug == 1);

    match run(args).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!(error = %e, "Fatal error");
            ExitCode::FAILURE
        }
    }
}
