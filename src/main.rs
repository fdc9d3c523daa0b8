use anyhow::{Context, Result};
use locsmith::{
    backup,
    config::AppConfig,
    progress::{ConsoleProgress, ProgressSink},
    sync,
    worker::{self, WorkerMessage, WorkerSlot},
};
use std::{fs, sync::Arc};
use time::OffsetDateTime;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let mut args = std::env::args().skip(1);
    let command = args.next().unwrap_or_else(|| "--help".to_string());

    match command.as_str() {
        "backup" => run(Command::Backup),
        "apply" => run(Command::Apply),
        "check" => run(Command::Check),
        "install" => {
            let Some(url) = args.next() else {
                eprintln!("install requires a localization pack URL");
                std::process::exit(2);
            };
            run(Command::Install(url))
        }
        "--help" | "-h" | "help" => {
            println!("locsmith");
            println!("  backup            Back up changed mods into a new generation");
            println!("  apply             Apply every new catalog translation");
            println!("  check             Report which translations would be applied");
            println!("  install <url>     Download and apply one localization pack");
            Ok(())
        }
        other => {
            eprintln!("unknown command: {other} (try --help)");
            std::process::exit(2);
        }
    }
}

enum Command {
    Backup,
    Apply,
    Check,
    Install(String),
}

fn run(command: Command) -> Result<()> {
    let config = AppConfig::load_or_create()?;
    init_logging(&config)?;

    let progress = Arc::new(ConsoleProgress);
    let slot = WorkerSlot::new();
    let Some(guard) = slot.try_acquire() else {
        // Single-slot model: one long operation at a time, no queue.
        progress.popup_warning("another operation is already running");
        return Ok(());
    };

    let job_progress = Arc::clone(&progress);
    let job_config = config.clone();
    let receiver = match command {
        Command::Backup => worker::spawn(guard, move || {
            let summary = backup::run_backup(
                &job_config.source_locations(),
                &job_config.backup_root(),
                job_progress.as_ref(),
            )?;
            Ok(summary.report_text())
        }),
        Command::Apply => worker::spawn(guard, move || {
            let summary = sync::apply_all(&job_config, job_progress.as_ref())?;
            Ok(summary.report_text())
        }),
        Command::Check => worker::spawn(guard, move || {
            sync::check_applicable(&job_config, job_progress.as_ref())
        }),
        Command::Install(url) => worker::spawn(guard, move || {
            let name = sync::install_from_url(&job_config, &url, job_progress.as_ref())?;
            Ok(format!("Localization pack applied to {name}."))
        }),
    };

    // Exactly one summary notification per run, success or failure.
    match receiver.recv().context("worker vanished")? {
        WorkerMessage::Completed(report) => progress.popup_info(&report),
        WorkerMessage::Failed { error } => {
            progress.popup_error(&error);
            std::process::exit(1);
        }
    }
    Ok(())
}

/// Single initialization point for logging: one file per run under the
/// backup logs directory, level controlled by `LOCSMITH_LOG`.
fn init_logging(config: &AppConfig) -> Result<()> {
    let logs_dir = config.logs_dir();
    fs::create_dir_all(&logs_dir).context("create logs dir")?;

    let stamp_format =
        time::macros::format_description!("[year][month][day]_[hour][minute][second]");
    let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
    let stamp = now.format(&stamp_format).context("format log stamp")?;
    let log_path = logs_dir.join(format!("locsmith_{stamp}.log"));
    let log_file = fs::File::create(&log_path)
        .with_context(|| format!("create log file {}", log_path.display()))?;

    let filter = EnvFilter::try_from_env("LOCSMITH_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::sync::Mutex::new(log_file))
        .with_ansi(false)
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "locsmith started");
    Ok(())
}
