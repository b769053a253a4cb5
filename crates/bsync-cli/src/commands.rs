use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use bsync_index::{ChangeAction, ChangeEntry};
use bsync_pack::ZstdArchiver;
use bsync_sync::{
    HostState, JsonFileStore, PipelineStatus, ProjectWatcher, SubmitOutcome, SyncConfig,
    SyncPipeline, CONFIG_FILE,
};
use colored::Colorize;
use serde::Serialize;
use tracing::{info, warn};

use crate::cli::*;
use crate::http::HttpTransport;

pub async fn run_command(cli: Cli) -> anyhow::Result<()> {
    let format = cli.format;
    let pipeline = open_pipeline(&cli.root, cli.config.as_deref())?;

    match cli.command {
        Command::Status(_) => cmd_status(&pipeline, format).await,
        Command::Diff(_) => cmd_diff(&pipeline, format).await,
        Command::Link(_) => {
            let outcome = pipeline.link().await?;
            report_outcome(&outcome, format)
        }
        Command::Relink(_) => cmd_relink(&pipeline, format).await,
        Command::Test(args) => {
            let outcome = pipeline.test(args.filter).await?;
            report_outcome(&outcome, format)
        }
        Command::Publish(args) => {
            let outcome = pipeline.publish(args.tag).await?;
            report_outcome(&outcome, format)
        }
        Command::Watch(args) => cmd_watch(&pipeline, args, format).await,
        Command::Host(args) => cmd_host(&pipeline, args, format),
    }
}

fn open_pipeline(root: &Path, config_path: Option<&Path>) -> anyhow::Result<SyncPipeline> {
    let root = root
        .canonicalize()
        .with_context(|| format!("project root {} not found", root.display()))?;
    let config_path: PathBuf = config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| root.join(CONFIG_FILE));
    let config = SyncConfig::load(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;

    let transport = Arc::new(HttpTransport::new(&config.base_url, config.request_timeout())?);
    let store = Arc::new(JsonFileStore::open(config.state_file(&root))?);
    let archiver = Arc::new(ZstdArchiver::default());
    info!(root = %root.display(), base_url = %config.base_url, "opening project");

    Ok(SyncPipeline::new(root, config, transport, archiver, store)?)
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn cmd_status(pipeline: &SyncPipeline, format: OutputFormat) -> anyhow::Result<()> {
    let status = pipeline.status().await?;
    if format == OutputFormat::Json {
        return print_json(&status);
    }
    print_status(&status);
    Ok(())
}

fn print_status(status: &PipelineStatus) {
    println!("Project {}", status.project_id.bold());
    println!(
        "  Remote:  {} files, {}",
        status.snapshot_files,
        human_bytes(status.snapshot_bytes)
    );
    if status.pending.saves == 0 && status.pending.removals == 0 {
        println!("  Pending: {}", "up to date".green());
    } else {
        println!(
            "  Pending: {} to save, {} to remove ({})",
            status.pending.saves.to_string().yellow(),
            status.pending.removals.to_string().yellow(),
            human_bytes(status.pending.bytes)
        );
    }
    match &status.host {
        Some(host) => println!("  Host:    {}", describe_host(host)),
        None => println!("  Host:    {}", "(none)".dimmed()),
    }
    if status.warnings > 0 {
        println!("  {} {} scan warnings", "!".yellow().bold(), status.warnings);
    }
}

#[derive(Serialize)]
struct DiffLine<'a> {
    path: &'a str,
    action: ChangeAction,
    size: u64,
}

impl<'a> From<&'a ChangeEntry> for DiffLine<'a> {
    fn from(entry: &'a ChangeEntry) -> Self {
        Self {
            path: entry.path.as_str(),
            action: entry.action,
            size: entry.size,
        }
    }
}

async fn cmd_diff(pipeline: &SyncPipeline, format: OutputFormat) -> anyhow::Result<()> {
    let (batch, _) = pipeline.pending().await?;
    if format == OutputFormat::Json {
        let lines: Vec<DiffLine<'_>> = batch.entries().map(DiffLine::from).collect();
        return print_json(&lines);
    }
    if batch.is_empty() {
        println!("Nothing to relink, remote is up to date.");
        return Ok(());
    }
    for entry in batch.entries() {
        match entry.action {
            ChangeAction::Save => println!(
                "  {} {} ({})",
                "+".green().bold(),
                entry.path,
                human_bytes(entry.size)
            ),
            ChangeAction::Remove => println!("  {} {}", "-".red().bold(), entry.path),
        }
    }
    let summary = batch.summary();
    println!(
        "\n{} to save, {} to remove, {} total",
        summary.saves,
        summary.removals,
        human_bytes(summary.bytes)
    );
    Ok(())
}

async fn cmd_relink(pipeline: &SyncPipeline, format: OutputFormat) -> anyhow::Result<()> {
    match pipeline.relink().await? {
        Some(outcome) => report_outcome(&outcome, format),
        None if format == OutputFormat::Json => print_json(&serde_json::Value::Null),
        None => {
            println!("Nothing to relink, remote is up to date.");
            Ok(())
        }
    }
}

/// Print a submission outcome. A build that did not succeed is an error so
/// the process exits non-zero.
fn report_outcome(outcome: &SubmitOutcome, format: OutputFormat) -> anyhow::Result<()> {
    if format == OutputFormat::Json {
        print_json(outcome)?;
    } else {
        print_outcome(outcome);
    }
    if !outcome.result.is_success() {
        anyhow::bail!("{} failed with code `{}`", outcome.operation, outcome.result.code);
    }
    Ok(())
}

fn print_outcome(outcome: &SubmitOutcome) {
    if outcome.size_warning {
        println!(
            "{} upload is close to the size limit ({})",
            "!".yellow().bold(),
            human_bytes(outcome.raw_bytes)
        );
    }
    let elapsed = outcome
        .result
        .time_nano
        .map(|ns| format!(" in {} ms", ns / 1_000_000))
        .unwrap_or_default();
    if outcome.result.is_success() {
        println!(
            "{} {} succeeded: {} entries, {}{}",
            "✓".green().bold(),
            outcome.operation,
            outcome.entries,
            human_bytes(outcome.raw_bytes),
            elapsed
        );
    } else {
        println!(
            "{} {} returned {}{}",
            "✗".red().bold(),
            outcome.operation,
            outcome.result.code.red(),
            elapsed
        );
    }
    if let Some(message) = outcome.result.message_text() {
        println!("{message}");
    }
}

async fn cmd_watch(
    pipeline: &SyncPipeline,
    args: WatchArgs,
    format: OutputFormat,
) -> anyhow::Result<()> {
    if args.link_first {
        let outcome = pipeline.link().await?;
        report_outcome(&outcome, format)?;
    }

    let config = pipeline.config();
    let mut watcher = ProjectWatcher::start(
        pipeline.root(),
        config.debounce(),
        &config.scan_options(pipeline.root()),
    )?;
    println!(
        "Watching {} (Ctrl-C to stop)",
        pipeline.root().display().to_string().cyan()
    );

    // After a failed submission the snapshot no longer covers every edit,
    // so the next round rescans instead of trusting the events alone.
    let mut needs_rescan = false;
    loop {
        let events = tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            batch = watcher.next_batch() => match batch {
                Some(events) => events,
                None => break,
            },
        };
        let submitted = if needs_rescan {
            pipeline.relink().await
        } else {
            pipeline.relink_events(&events).await
        };
        match submitted {
            Ok(Some(outcome)) => {
                needs_rescan = !outcome.result.is_success();
                if let Err(e) = report_outcome(&outcome, format) {
                    warn!("{e}");
                }
            }
            Ok(None) => needs_rescan = false,
            Err(e) => {
                needs_rescan = true;
                eprintln!("{} {e}", "✗".red().bold());
            }
        }
    }
    println!("Stopped watching.");
    Ok(())
}

fn cmd_host(pipeline: &SyncPipeline, args: HostArgs, format: OutputFormat) -> anyhow::Result<()> {
    if args.reset {
        pipeline.reset_host()?;
        if format == OutputFormat::Json {
            return print_json(&serde_json::Value::Null);
        }
        println!("{} Host reset, the next submission will probe again", "✓".green().bold());
        return Ok(());
    }
    let host = pipeline.current_host();
    if format == OutputFormat::Json {
        return print_json(&host.as_deref());
    }
    match host {
        Some(host) => println!("{}", describe_host(&host)),
        None => println!("No build host selected yet."),
    }
    Ok(())
}

fn describe_host(host: &HostState) -> String {
    format!(
        "{} ({}) score {:.2}, hint {}, confirmed {}",
        host.hostname.cyan(),
        host.host_id,
        host.score,
        host.hint_key,
        host.last_confirmed_at.format("%Y-%m-%d %H:%M:%S UTC")
    )
}

fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}
