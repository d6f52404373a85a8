///
/// This module implements the CLI interface for folder-courier: command parsing,
/// argument validation and the async entrypoint used by `main` and the tests.
///
/// All scanning, batching, retry and orchestration logic lives in the
/// [`folder-courier-core`] crate. This module only wires config, secrets, a messenger and
/// Ctrl-C handling around [`Orchestrator`].
///
/// ## How To Use
/// - Command line: `folder-courier scan <FOLDER>`, `folder-courier upload <FOLDER>` or
///   `folder-courier export-log --log-file <PATH>`.
/// - Programmatic/integration use: call [`run`] with a constructed [`Cli`].
///
/// [`folder-courier-core`]: ../../folder-courier-core/
use crate::dry_run::DryRunMessenger;
use crate::load_config::{load_config, telegram_credentials_from_env, CourierConfig};
use crate::telegram::TelegramMessenger;
use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use folder_courier_core::cancel::{cancel_pair, CancelSignal};
use folder_courier_core::classify::scan_folder;
use folder_courier_core::config::{RetryPolicy, RunConfig, UploadSettings};
use folder_courier_core::contract::{MediaKind, MessageId, Messenger, OutgoingMedia, SingleSend};
use folder_courier_core::orchestrate::{Orchestrator, RunSummary};
use folder_courier_core::progress::TracingReporter;
use folder_courier_core::retry::retry_with_backoff;
use std::path::{Component, Path, PathBuf};

/// CLI for folder-courier: mirror a local folder tree into a Telegram chat.
#[derive(Parser)]
#[clap(
    name = "folder-courier",
    version,
    about = "Upload a folder tree to a Telegram chat, one album or document group per subfolder"
)]
pub struct Cli {
    /// Also append all log lines to this file
    #[clap(long, global = true, value_name = "PATH")]
    pub log_file: Option<PathBuf>,
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Scan a folder and print the upload plan as JSON
    Scan {
        /// Folder to scan
        folder: PathBuf,
    },
    /// Upload every file below a folder
    Upload {
        /// Folder to upload
        folder: PathBuf,
        /// Path to the YAML config file
        #[clap(long)]
        config: Option<PathBuf>,
        /// Log what would be sent without contacting Telegram
        #[clap(long)]
        dry_run: bool,
        #[clap(flatten)]
        toggles: ToggleArgs,
    },
    /// Send the upload log file to the chat as a document
    ExportLog {
        /// Path to the YAML config file
        #[clap(long)]
        config: Option<PathBuf>,
        /// Log what would be sent without contacting Telegram
        #[clap(long)]
        dry_run: bool,
    },
}

/// Per-run overrides of the config file's upload toggles.
#[derive(Debug, Default, Clone, Args)]
pub struct ToggleArgs {
    /// One topic per subfolder
    #[clap(long, value_name = "on|off", value_parser = parse_switch)]
    pub topics: Option<bool>,
    /// Send images as albums
    #[clap(long, value_name = "on|off", value_parser = parse_switch)]
    pub album: Option<bool>,
    /// Send documents in groups
    #[clap(long, value_name = "on|off", value_parser = parse_switch)]
    pub doc_group: Option<bool>,
    /// Caption albums with the subfolder name
    #[clap(long, value_name = "on|off", value_parser = parse_switch)]
    pub album_captions: Option<bool>,
    /// Caption documents with their file name
    #[clap(long, value_name = "on|off", value_parser = parse_switch)]
    pub doc_captions: Option<bool>,
    /// Caption single images with their folder name
    #[clap(long, value_name = "on|off", value_parser = parse_switch)]
    pub image_captions: Option<bool>,
}

impl ToggleArgs {
    pub fn apply(&self, settings: &mut UploadSettings) {
        let pairs = [
            (self.topics, &mut settings.topics_enabled),
            (self.album, &mut settings.album_mode),
            (self.doc_group, &mut settings.doc_group),
            (self.album_captions, &mut settings.album_captions),
            (self.doc_captions, &mut settings.doc_captions),
            (self.image_captions, &mut settings.image_captions),
        ];
        for (value, slot) in pairs {
            if let Some(value) = value {
                *slot = value;
            }
        }
    }
}

/// Upload folders may not climb out of the given path.
pub fn reject_parent_components(folder: &Path) -> Result<()> {
    if folder.components().any(|c| c == Component::ParentDir) {
        tracing::error!(folder = %folder.display(), "Folder path contains '..'");
        bail!("Invalid folder path {}: '..' is not allowed", folder.display());
    }
    Ok(())
}

pub fn parse_switch(raw: &str) -> Result<bool, String> {
    match raw.to_ascii_lowercase().as_str() {
        "on" | "true" | "yes" | "1" => Ok(true),
        "off" | "false" | "no" | "0" => Ok(false),
        other => Err(format!("expected on or off, got '{other}'")),
    }
}

fn load_or_default(config: Option<&Path>) -> Result<CourierConfig> {
    match config {
        Some(path) => load_config(path),
        None => {
            tracing::info!("No config file given, using defaults");
            Ok(CourierConfig::default())
        }
    }
}

fn telegram_from_env(courier: &CourierConfig) -> Result<TelegramMessenger> {
    let credentials = telegram_credentials_from_env()
        .context("Telegram credentials are required unless --dry-run is given")?;
    TelegramMessenger::new(&credentials, &courier.telegram)
        .context("Failed to construct Telegram client")
}

/// Async CLI entrypoint for integration tests and main()
pub async fn run(cli: Cli) -> Result<()> {
    tracing::info!("trace_initialised");

    match cli.command {
        Commands::Scan { folder } => {
            tracing::info!(command = "scan", folder = %folder.display(), "Scanning folder");
            let plan = scan_folder(&folder)
                .with_context(|| format!("Failed to scan {}", folder.display()))?;
            let json = serde_json::to_string_pretty(&plan).context("Failed to encode plan")?;
            println!("{json}");
            println!(
                "{} files in {} subfolders",
                plan.total_items(),
                plan.non_empty_buckets()
            );
            Ok(())
        }
        Commands::Upload {
            folder,
            config,
            dry_run,
            toggles,
        } => {
            reject_parent_components(&folder)?;
            let courier = load_or_default(config.as_deref())?;
            let mut run_config = courier.run_config();
            toggles.apply(&mut run_config.settings);
            run_config.trace_loaded();

            tracing::info!(
                command = "upload",
                folder = %folder.display(),
                dry_run,
                "Starting upload"
            );
            let summary = if dry_run {
                upload_with(DryRunMessenger::new(), run_config, &folder).await?
            } else {
                upload_with(telegram_from_env(&courier)?, run_config, &folder).await?
            };
            println!("{summary}");
            tracing::info!(
                command = "upload",
                final_state = ?summary.final_state,
                "Upload finished"
            );
            Ok(())
        }
        Commands::ExportLog { config, dry_run } => {
            let Some(log_file) = cli.log_file else {
                bail!("Logging is disabled: pass --log-file <PATH> to export a log");
            };
            let courier = load_or_default(config.as_deref())?;
            let message = if dry_run {
                export_log(&DryRunMessenger::new(), &courier.retry, &log_file).await?
            } else {
                export_log(&telegram_from_env(&courier)?, &courier.retry, &log_file).await?
            };
            println!("Log exported as message {}", message.0);
            Ok(())
        }
    }
}

/// Send the log file as a timestamped document into the main chat.
pub async fn export_log<M: Messenger>(
    messenger: &M,
    policy: &RetryPolicy,
    log_file: &Path,
) -> Result<MessageId> {
    let size_bytes = match std::fs::metadata(log_file) {
        Ok(meta) if meta.is_file() => meta.len(),
        _ => bail!("No log file exists at {}", log_file.display()),
    };
    let file_name = format!(
        "upload_log_{}.txt",
        chrono::Local::now().format("%Y%m%d_%H%M%S")
    );
    tracing::info!(log_file = %log_file.display(), %file_name, "Exporting upload log");

    let req = SingleSend {
        kind: MediaKind::Document,
        media: OutgoingMedia {
            path: log_file.to_path_buf(),
            file_name,
            size_bytes,
            caption: Some("Upload log export".to_string()),
        },
        topic: None,
    };
    retry_with_backoff(policy, &CancelSignal::never(), "export_log", || {
        messenger.send_single(req.clone())
    })
    .await
    .context("Failed to export log")
}

/// Run the orchestrator with Ctrl-C wired to cancellation.
pub async fn upload_with<M: Messenger>(
    messenger: M,
    config: RunConfig,
    folder: &Path,
) -> Result<RunSummary> {
    let (handle, signal) = cancel_pair();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, finishing the current call before stopping");
            handle.cancel();
        }
    });

    let mut orchestrator =
        Orchestrator::new(messenger, TracingReporter, config).with_cancel(signal);
    let result = orchestrator.run(folder).await;
    interrupt.abort();

    result.with_context(|| format!("Upload of {} could not start", folder.display()))
}
