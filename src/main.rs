//! projsync - bind local projects to a remote build engine and keep the
//! engine's copy up to date with incremental uploads.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use projsync::changeset::SyncCursor;
use projsync::cli::{Args, BindOpts, Command, ConfigAction, FilterOpts, SyncOpts};
use projsync::config::{default_config_path, Config};
use projsync::error::SyncError;
use projsync::fs_enum::FileFilter;
use projsync::log::{RunMode, RunStatus, SyncLog, SyncLogEntry};
use projsync::logger::{Logger, MultiLogger, TextLogger};
use projsync::orchestrator::{SyncOrchestrator, SyncOutcome};
use projsync::progress::SyncProgress;
use projsync::project::{self, ProjectIdentity};
use projsync::transport::{normalize_base_url, HttpTransport};

fn main() -> Result<()> {
    let cancel = Arc::new(AtomicBool::new(false));
    {
        let cancel = cancel.clone();
        ctrlc::set_handler(move || {
            if cancel.swap(true, Ordering::SeqCst) {
                // Second Ctrl-C: give up immediately (128 + SIGINT)
                std::process::exit(130);
            }
            eprintln!("\nInterrupted by user. Finishing the handshake (Ctrl-C again to abort)...");
        })
        .context("Error setting Ctrl-C handler")?;
    }

    let args = Args::parse();
    let config_path = args.config.clone().unwrap_or_else(default_config_path);
    let mut config = Config::load(&config_path)?;
    if args.url.is_some() {
        config.url = args.url.clone();
    }
    if args.token.is_some() {
        config.token = args.token.clone();
    }
    if args.insecure {
        config.insecure = true;
    }
    if args.log_file.is_some() {
        config.log_file = args.log_file.clone();
    }

    match &args.command {
        Command::Validate { path } => {
            println!("{}", serde_json::to_string(&project::validate(path))?);
            Ok(())
        }
        Command::Config { action } => config_command(action, &config_path, config),
        Command::ResendEnd { id } => resend_end(&config, id),
        Command::Bind(opts) => run_transfer(&args, &config, Transfer::Bind(opts), cancel),
        Command::Sync(opts) => run_transfer(&args, &config, Transfer::Sync(opts), cancel),
    }
}

fn config_command(action: &ConfigAction, path: &Path, mut config: Config) -> Result<()> {
    match action {
        ConfigAction::Show => {
            if config.token.is_some() {
                config.token = Some("********".to_string());
            }
            println!("# {}", path.display());
            print!("{}", toml::to_string(&config)?);
        }
        ConfigAction::SetUrl { url } => {
            normalize_base_url(url)?;
            // Re-read so CLI overrides are not persisted
            let mut stored = Config::load(path)?;
            stored.url = Some(url.trim().to_string());
            stored.save(path)?;
            println!("Engine URL set to {}", url.trim());
        }
    }
    Ok(())
}

#[derive(Clone, Copy)]
enum Transfer<'a> {
    Bind(&'a BindOpts),
    Sync(&'a SyncOpts),
}

fn build_filter(config: &Config, opts: &FilterOpts) -> FileFilter {
    let mut filter = config.file_filter();
    filter.exclude_files.extend(opts.exclude_files.iter().cloned());
    filter.exclude_dirs.extend(opts.exclude_dirs.iter().cloned());
    filter.include_empty_dirs |= opts.empty_dirs;
    filter
}

/// Remembers the project id once the session has started
#[derive(Default, Clone)]
struct StartedProject(Arc<Mutex<Option<String>>>);

impl StartedProject {
    fn get(&self) -> Option<String> {
        self.0.lock().ok().and_then(|id| id.clone())
    }
}

impl Logger for StartedProject {
    fn run_start(&self, _mode: &str, project_id: &str, _root: &Path) {
        if let Ok(mut id) = self.0.lock() {
            *id = Some(project_id.to_string());
        }
    }
}

fn connect(config: &Config) -> Result<HttpTransport> {
    let url = config
        .url
        .as_deref()
        .context("No engine URL configured (use --url, PROJSYNC_URL or `projsync config set-url`)")?;
    HttpTransport::new(url, &config.transport_options())
}

fn resend_end(config: &Config, project_id: &str) -> Result<()> {
    let sync_log = SyncLog::new(&config.sync_log_path());
    let unfinished = sync_log
        .pending_completion(project_id)?
        .with_context(|| format!("No unfinished end call recorded for project {}", project_id))?;
    let pending = unfinished
        .pending
        .as_ref()
        .with_context(|| format!("No unfinished end call recorded for project {}", project_id))?;

    let transport = connect(config)?;
    pending.resend(&transport)?;

    let mut entry = SyncLogEntry::new(
        &unfinished.run_id,
        unfinished.mode,
        &unfinished.project_path,
        RunStatus::Completed,
    );
    entry.project_id = pending.project_id.clone();
    entry.cursor = pending.cursor;
    entry.files = unfinished.files;
    entry.uploaded = unfinished.uploaded;
    entry.skipped = unfinished.skipped;
    record(&sync_log, &entry);
    println!("{} acknowledged for {}", pending.call(), pending.project_id);
    println!("Next sync time: {}", pending.cursor);
    Ok(())
}

fn run_transfer(args: &Args, config: &Config, transfer: Transfer<'_>, cancel: Arc<AtomicBool>) -> Result<()> {
    let transport = connect(config)?;

    let started = StartedProject::default();
    let mut loggers = MultiLogger::default();
    loggers.push(Box::new(started.clone()));
    if let Some(ref p) = config.log_file {
        match TextLogger::new(p) {
            Ok(l) => loggers.push(Box::new(l)),
            Err(e) => eprintln!("Warning: cannot open log file {}: {}", p.display(), e),
        }
    }
    if !args.json {
        loggers.push(Box::new(SyncProgress::new(args.verbose)));
    }

    let sync_log = SyncLog::new(&config.sync_log_path());
    let run_id = SyncLog::new_run_id();

    let (mode, root, filter_opts) = match transfer {
        Transfer::Bind(o) => (RunMode::Bind, o.path.as_path(), &o.filter),
        Transfer::Sync(o) => (RunMode::Sync, o.path.as_path(), &o.filter),
    };
    let orchestrator = SyncOrchestrator::new(&transport)
        .with_logger(&loggers)
        .with_filter(build_filter(config, filter_opts))
        .with_cancel(cancel)
        .with_end_retries(config.end_retries);

    let mut entry = SyncLogEntry::new(&run_id, mode, root, RunStatus::InProgress);
    let (result, cursor) = match transfer {
        Transfer::Bind(o) => {
            let identity = ProjectIdentity::new(&o.name, &o.language, &o.build_type, &o.path)?;
            record(&sync_log, &entry);
            (orchestrator.run_bind(&identity), SyncCursor::INITIAL)
        }
        Transfer::Sync(o) => {
            entry.project_id = o.id.clone();
            let cursor = match o.time {
                Some(t) => SyncCursor(t),
                None => sync_log.last_completed_cursor(&o.id)?,
            };
            entry.cursor = cursor;
            record(&sync_log, &entry);
            (orchestrator.run_sync(&o.id, &o.path, cursor), cursor)
        }
    };
    // Drop the progress display before printing results
    drop(orchestrator);
    drop(loggers);

    match result {
        Ok(outcome) => {
            entry.project_id = outcome.project_id.clone();
            entry.status = RunStatus::Completed;
            entry.cursor = outcome.next_cursor;
            entry.files = outcome.all_files.len();
            entry.uploaded = outcome.modified_files.len();
            entry.skipped = outcome.skipped.len();
            record(&sync_log, &entry);
            print_outcome(&outcome, args.json)
        }
        Err(err) => {
            if let Some(id) = started.get() {
                entry.project_id = id;
            }
            entry.status = match &err {
                SyncError::Cancelled {
                    project_id,
                    uploaded,
                    ..
                } => {
                    entry.project_id = project_id.clone();
                    entry.uploaded = *uploaded;
                    entry.cursor = cursor;
                    RunStatus::Interrupted
                }
                SyncError::CompletionFailed { pending, .. } => {
                    entry.project_id = pending.project_id.clone();
                    entry.cursor = pending.cursor;
                    entry.pending = Some(pending.as_ref().clone());
                    RunStatus::Failed
                }
                _ => RunStatus::Failed,
            };
            entry.error = Some(err.to_string());
            record(&sync_log, &entry);
            if let SyncError::CompletionFailed { ref pending, .. } = err {
                eprintln!(
                    "All uploads for {id} were acknowledged but the {call} call was not.\n\
                     Run `projsync resend-end --id {id}` to finish the handshake.",
                    id = pending.project_id,
                    call = pending.call()
                );
            }
            if matches!(err, SyncError::Cancelled { .. }) {
                eprintln!("Error: {}", err);
                std::process::exit(130);
            }
            Err(err.into())
        }
    }
}

fn record(log: &SyncLog, entry: &SyncLogEntry) {
    if let Err(e) = log.add_entry(entry) {
        eprintln!("Warning: cannot update sync log: {:#}", e);
    }
}

fn print_outcome(outcome: &SyncOutcome, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(outcome)?);
        return Ok(());
    }
    println!("Project ID: {}", outcome.project_id);
    println!(
        "Files: {} total, {} uploaded, {} skipped",
        outcome.all_files.len(),
        outcome.modified_files.len(),
        outcome.skipped.len()
    );
    for skip in &outcome.skipped {
        println!("  skipped {}", skip);
    }
    println!("Next sync time: {}", outcome.next_cursor);
    Ok(())
}
