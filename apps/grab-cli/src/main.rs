//! # grab
//!
//! Races for course-enrollment slots at a fixed opening time.
//!
//! ## Sequence
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  0. Ctrl-C handler                         interrupt anywhere → exit 0  │
//! │  1. config (file, GRAB_* env, flags)       fatal on error → exit 1      │
//! │  2. credentials + session                  fatal on error → exit 1      │
//! │     (--token/--student-id are saved once the session is up)             │
//! │  3. target time (--at or prompt)                                        │
//! │  4. target list → catalog lookup           no targets → exit 1          │
//! │  5. forced attempts on the top target      win → exit 0, no race        │
//! │  6. wait until target - verify_lead, revalidate session                 │
//! │  7. preflight probe (optional)                                          │
//! │  8. one race per target, in rank order                                  │
//! │  9. summary                                                  exit 0     │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

mod status;

use std::future::Future;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context};
use chrono::{DateTime, Local, Utc};
use clap::Parser;
use colored::Colorize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use grab_core::{parse_target_time, sort_by_rank, Target};
use grab_race::{
    load_target_specs, AcquisitionWorkflow, Catalog, ClockSynchronizer, Credentials,
    ForcedAttempts, HttpEnrollmentApi, Preflight, RaceConfig, RaceScheduler, RunnerPolicy,
    SequentialTargetRunner, Session, SessionCheck,
};

use crate::status::{print_summary, SpinnerObserver};

#[derive(Parser, Debug)]
#[command(name = "grab", version)]
#[command(about = "Time-synchronized course enrollment racer", long_about = None)]
struct Args {
    /// Config file (defaults to the platform config dir)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Credentials JSON file
    #[arg(long)]
    credentials: Option<PathBuf>,

    /// Session token; saved to the credentials file once accepted
    #[arg(long, requires = "student_id")]
    token: Option<String>,

    /// Student id to go with --token
    #[arg(long, requires = "token")]
    student_id: Option<String>,

    /// Target list JSON file
    #[arg(short, long)]
    targets: Option<PathBuf>,

    /// Opening time, YYYYMMDDhhmmss in local time (prompted when absent)
    #[arg(long)]
    at: Option<String>,

    /// Attempts in flight per race
    #[arg(short = 'k', long)]
    concurrency: Option<usize>,

    /// Keep racing lower-ranked targets after a win
    #[arg(long)]
    continue_after_success: bool,

    /// Skip the pre-race probe
    #[arg(long)]
    no_preflight: bool,

    /// Full attempts on the top target before waiting, 250 ms apart
    #[arg(long, value_name = "N", default_value_t = 0)]
    force_attempts: u32,

    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.verbose);

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {:#}", "[!]".red(), e);
            ExitCode::FAILURE
        }
    }
}

/// `RUST_LOG` wins; otherwise info, or debug for the grab crates with `-v`.
fn init_tracing(verbose: bool) {
    let default = if verbose {
        "info,grab_race=debug,grab_cli=debug"
    } else {
        "warn,grab_race=info,grab_cli=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn run(args: Args) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();
    spawn_interrupt_handler(cancel.clone());

    // Configuration
    let mut config = RaceConfig::load(args.config.clone()).context("loading configuration")?;
    if let Some(k) = args.concurrency {
        config.race.concurrency = k;
    }
    if args.continue_after_success {
        config.race.continue_after_success = true;
    }
    if let Some(path) = args.credentials {
        config.files.credentials = path;
    }
    if let Some(path) = args.targets {
        config.files.targets = path;
    }
    config.validate().context("validating configuration")?;
    let race_policy = config.race_policy()?;

    // Session
    let (credentials, given) = match (args.token, args.student_id) {
        (Some(token), Some(student_id)) => (Credentials::new(token, student_id)?, true),
        _ => {
            let loaded = Credentials::load(&config.files.credentials)
                .with_context(|| format!("reading {}", config.files.credentials.display()))?;
            (loaded, false)
        }
    };
    let Some(session) = unless_interrupted(&cancel, Session::establish(credentials, &config.service)).await else {
        return interrupted();
    };
    let session = session.context("establishing session")?;
    if given {
        if let Err(e) = session.credentials().save(&config.files.credentials) {
            warn!(error = %e, "Credentials accepted but not saved");
        }
    }
    println!(
        "{} Selection period: {} ({})",
        "[+]".green(),
        session.turn().turn_name,
        session.turn().semester_name
    );
    let api = Arc::new(HttpEnrollmentApi::new(session, config.service.clone()));

    // Target time
    let target_time = match args.at.as_deref() {
        Some(input) => parse_target_time(input)?,
        None => match unless_interrupted(&cancel, prompt_target_time()).await {
            Some(time) => time?,
            None => return interrupted(),
        },
    };
    println!(
        "{} Target time: {}",
        "[*]".blue(),
        target_time.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S")
    );

    // Targets
    let specs = load_target_specs(&config.files.targets)?;
    let Some(resolved) = unless_interrupted(&cancel, Catalog::new(api.clone()).resolve(&specs)).await else {
        return interrupted();
    };
    let mut targets = resolved?;
    sort_by_rank(&mut targets);
    for target in &targets {
        println!("{} #{} {}", "[*]".blue(), target.rank, target.label);
    }

    let workflow = AcquisitionWorkflow::new(api.clone(), config.workflow_policy());

    // Forced attempts on the top target
    if let Some(top) = targets.first().filter(|_| args.force_attempts > 0) {
        let observer = Arc::new(SpinnerObserver::new());
        observer.begin(&format!("{} (forced)", top.label));
        let report = ForcedAttempts::new(workflow.clone(), cancel.clone())
            .with_observer(observer.clone())
            .run(top, args.force_attempts)
            .await;
        let last = report
            .last_outcome
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_else(|| "-".into());
        if report.won() {
            observer.finish(format!("{} {} ({}), race skipped", "[+]".green(), top.label, last));
            return Ok(());
        }
        observer.finish(format!(
            "{} {} not acquired after {} forced attempts (last: {})",
            "[-]".red(),
            top.label,
            report.attempts,
            last
        ));
        if report.interrupted {
            return interrupted();
        }
    }

    // Session check shortly before opening
    let clock = ClockSynchronizer::sntp(config.clock.server.clone(), config.sync_policy());
    let reading = clock.synchronize().await;
    let verify_at = target_time - chrono::Duration::from_std(config.verify_lead())?;
    let wait = (verify_at - reading.offset.now()).to_std().unwrap_or_default();
    if !wait.is_zero() {
        info!(wait_secs = wait.as_secs(), offset = %reading.offset, "Waiting for session check");
        if unless_interrupted(&cancel, tokio::time::sleep(wait)).await.is_none() {
            return interrupted();
        }
    }
    match api.revalidate().await {
        Ok(()) => {}
        Err(e) if e.is_config_error() => return Err(e).context("revalidating session"),
        Err(e) => warn!(error = %e, "Session check failed, continuing"),
    }

    if !args.no_preflight {
        run_preflight(&api, &targets, &config).await;
    }

    // Race
    let observer = Arc::new(SpinnerObserver::new());
    let scheduler =
        RaceScheduler::new(workflow, observer, cancel.clone()).with_status_refresh(config.status_refresh());
    let runner = SequentialTargetRunner::new(scheduler, clock, api.clone(), race_policy, cancel)
        .with_policy(RunnerPolicy {
            continue_after_success: config.race.continue_after_success,
        });

    let summary = runner.run_all(&targets, target_time).await?;
    print_summary(&summary);
    Ok(())
}

/// Runs `fut` unless Ctrl-C arrives first.
async fn unless_interrupted<F: Future>(cancel: &CancellationToken, fut: F) -> Option<F::Output> {
    tokio::select! {
        _ = cancel.cancelled() => None,
        out = fut => Some(out),
    }
}

fn interrupted() -> anyhow::Result<()> {
    println!("{} Interrupted", "[*]".yellow());
    Ok(())
}

async fn run_preflight(api: &Arc<HttpEnrollmentApi>, targets: &[Target], config: &RaceConfig) {
    if let Some(first) = targets.first() {
        let outcome = Preflight::new(api.clone(), config.service.request_timeout())
            .probe(first)
            .await;
        println!("{} Preflight for {}: {}", "[*]".blue(), first.label, outcome);
    }
}

fn spawn_interrupt_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                warn!("Interrupt received, stopping");
                cancel.cancel();
            }
            Err(e) => warn!(error = %e, "Failed to install Ctrl+C handler"),
        }
    });
}

/// Asks for the target time on a detached thread so an interrupt does not
/// wait on stdin.
async fn prompt_target_time() -> anyhow::Result<DateTime<Utc>> {
    let (tx, rx) = tokio::sync::oneshot::channel();
    std::thread::spawn(move || {
        let _ = tx.send(read_target_time());
    });
    rx.await.context("target time prompt closed")?
}

/// Asks for the target time until the answer parses.
fn read_target_time() -> anyhow::Result<DateTime<Utc>> {
    let stdin = std::io::stdin();
    loop {
        print!("Target time (YYYYMMDDhhmmss): ");
        std::io::stdout().flush()?;

        let mut line = String::new();
        if stdin.read_line(&mut line)? == 0 {
            bail!("no target time given");
        }
        match parse_target_time(line.trim()) {
            Ok(time) => return Ok(time),
            Err(e) => eprintln!("{} {}", "[!]".red(), e),
        }
    }
}
