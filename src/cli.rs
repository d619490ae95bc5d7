//! Command-line interface and sweep orchestration

use clap::Parser;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};
use url::Url;

use crate::auth::{self, ConnectionSettings, CredentialMode, EndpointMode};
use crate::client::{FolderService, RootScope};
use crate::config::Config;
use crate::enumerator::FolderEnumerator;
use crate::error::{EwsError, Result};
use crate::models::{FolderRef, RetentionFilter, RunSummary};
use crate::sweeper::TagSweeper;

#[derive(Parser, Debug)]
#[command(name = "ews-retention-sweep")]
#[command(version)]
#[command(about = "Remove personal retention tags from Exchange mailbox folders", long_about = None)]
pub struct Cli {
    /// Primary SMTP address of the mailbox to sweep
    #[arg(short, long)]
    pub mailbox: Option<String>,

    /// Search folders inside the online archive instead of the mailbox
    #[arg(long)]
    pub archive: bool,

    /// Only process folders whose path contains this substring. "Inbox"
    /// matches Inbox including its subfolders; give the complete folder
    /// path to narrow down to one folder.
    #[arg(long)]
    pub folder_name: Option<String>,

    /// Comma-separated retention ids eligible for removal. Useful when the
    /// user has more than one personal policy tag applied.
    #[arg(long)]
    pub retention_id: Option<String>,

    /// Only log the folders which have an archive or policy tag, without
    /// changing anything
    #[arg(long)]
    pub log_only: bool,

    /// Explicit EWS endpoint, usually "https://server/EWS/Exchange.asmx".
    /// Whenever possible use autodiscover instead.
    #[arg(long)]
    pub url: Option<Url>,

    /// Username (primary SMTP address) used for altering the mailbox. When
    /// unset, credentials are read from EWS_USERNAME / EWS_PASSWORD.
    #[arg(long)]
    pub username: Option<String>,

    /// Password for --username
    #[arg(long)]
    pub password: Option<String>,

    /// Impersonate the target mailbox. Requires ApplicationImpersonation
    /// rights on the Exchange server.
    #[arg(long)]
    pub impersonate: bool,

    /// Ignore certificate errors when connecting to the EWS endpoint.
    /// Usually combined with --url in a test lab.
    #[arg(long)]
    pub insecure: bool,

    /// Follow autodiscover redirects (https targets only)
    #[arg(long)]
    pub allow_redirection: bool,

    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    pub config: PathBuf,

    /// Write a markdown report to this path
    #[arg(long)]
    pub report: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

/// Progress reporter using indicatif
pub struct ProgressReporter {
    multi: MultiProgress,
    spinner_style: ProgressStyle,
    bar_style: ProgressStyle,
}

impl ProgressReporter {
    pub fn new() -> Self {
        let spinner_style = ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed:>6}] {msg}")
            .unwrap()
            .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ ");

        let bar_style = ProgressStyle::default_bar()
            .template("[{elapsed:>6}] {bar:40.cyan/blue} {pos:>7}/{len:7} {msg}")
            .unwrap()
            .progress_chars("##-");

        Self {
            multi: MultiProgress::new(),
            spinner_style,
            bar_style,
        }
    }

    pub fn add_spinner(&self, msg: &str) -> ProgressBar {
        let pb = self.multi.add(ProgressBar::new_spinner());
        pb.set_style(self.spinner_style.clone());
        pb.set_message(msg.to_string());
        pb.enable_steady_tick(Duration::from_millis(100));
        pb
    }

    pub fn add_progress_bar(&self, len: u64, msg: &str) -> ProgressBar {
        let pb = self.multi.add(ProgressBar::new(len));
        pb.set_style(self.bar_style.clone());
        pb.set_message(msg.to_string());
        pb.enable_steady_tick(Duration::from_millis(100));
        pb
    }

    /// Finish a spinner and clear it from the multi-progress display
    pub fn finish_spinner(&self, pb: &ProgressBar, msg: &str) {
        pb.finish_and_clear();
        println!("  ✓ {}", msg);
    }
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of one sweep run
#[derive(Debug, Clone, serde::Serialize)]
pub struct Report {
    pub run_id: String,
    pub mailbox: String,
    pub archive: bool,
    pub log_only: bool,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub completed_at: chrono::DateTime<chrono::Utc>,
    pub duration_seconds: i64,
    pub folders_enumerated: usize,
    pub folders_after_filter: usize,
    pub summary: RunSummary,
}

impl Report {
    /// Generate Markdown report
    pub fn to_markdown(&self) -> String {
        let mut md = String::new();

        if self.log_only {
            md.push_str("# Retention Tag Sweep Report (LOG ONLY)\n\n");
            md.push_str("> **LOG-ONLY MODE** - No changes were made. Tagged folders below were only reported.\n\n");
        } else {
            md.push_str("# Retention Tag Sweep Report\n\n");
        }
        md.push_str(&format!(
            "Generated: {}\n\n",
            self.completed_at.format("%Y-%m-%d %H:%M:%S")
        ));

        md.push_str("## Summary\n\n");
        md.push_str(&format!("- **Run ID:** {}\n", self.run_id));
        md.push_str(&format!("- **Mailbox:** {}\n", self.mailbox));
        md.push_str(&format!(
            "- **Root:** {}\n",
            if self.archive { "online archive" } else { "mailbox" }
        ));
        md.push_str(&format!(
            "- **Processing time:** {} minutes {} seconds\n",
            self.duration_seconds / 60,
            self.duration_seconds % 60
        ));
        md.push_str(&format!(
            "- **Folders enumerated:** {}\n",
            self.folders_enumerated
        ));
        if self.folders_after_filter != self.folders_enumerated {
            md.push_str(&format!(
                "- **Folders after name filter:** {}\n",
                self.folders_after_filter
            ));
        }
        md.push_str(&format!(
            "- **Folders examined:** {}\n",
            self.summary.examined
        ));
        md.push_str(&format!(
            "- **Retention tags found:** {}\n",
            self.summary.found
        ));
        md.push_str(&format!(
            "- **Folders changed:** {}\n",
            self.summary.changed
        ));
        if self.log_only {
            md.push_str("- **Mode:** Log only (report, no changes)\n");
        }
        md.push('\n');

        md
    }
}

/// Print the end-of-run summary block
pub fn print_summary(report: &Report) {
    println!("\n========================================");
    println!("Sweep Summary");
    println!("========================================");
    println!("Run ID: {}", report.run_id);
    println!("Mailbox: {}", report.mailbox);
    println!("Duration: {} seconds", report.duration_seconds);
    println!("Folders enumerated: {}", report.folders_enumerated);
    println!("Folders examined: {}", report.summary.examined);
    println!("Retention tags found: {}", report.summary.found);
    println!("Folders changed: {}", report.summary.changed);
    println!("========================================");
}

fn print_partial_summary(summary: &RunSummary) {
    println!("\nRun aborted with partial progress: {}", summary);
}

/// Build connection settings from CLI arguments with config file fallbacks
fn connection_settings(cli: &Cli, config: &Config, mailbox: &str) -> Result<ConnectionSettings> {
    let endpoint = if let Some(url) = &cli.url {
        EndpointMode::Explicit(url.clone())
    } else if let Some(raw) = &config.connection.endpoint_url {
        let url = Url::parse(raw)
            .map_err(|e| EwsError::Config(format!("connection.endpoint_url: {}", e)))?;
        EndpointMode::Explicit(url)
    } else {
        EndpointMode::Autodiscover {
            allow_redirection: cli.allow_redirection || config.connection.allow_redirection,
        }
    };

    let credentials = match (&cli.username, &cli.password) {
        (Some(username), Some(password)) => CredentialMode::Explicit {
            username: username.clone(),
            password: password.clone(),
        },
        (None, None) => CredentialMode::Environment,
        _ => {
            return Err(EwsError::Usage(
                "--username and --password must be given together".to_string(),
            ))
        }
    };

    Ok(ConnectionSettings {
        mailbox: mailbox.to_string(),
        endpoint,
        credentials,
        impersonate: cli.impersonate || config.connection.impersonate,
        ignore_certificate: cli.insecure || config.connection.ignore_certificate,
    })
}

/// Keep only folders whose resolved path contains the given substring.
///
/// A path that cannot be resolved makes the keep/drop decision impossible,
/// so any resolution failure here aborts the run.
async fn filter_by_folder_name(
    service: &Arc<dyn FolderService>,
    folders: Vec<FolderRef>,
    needle: &str,
) -> Result<Vec<FolderRef>> {
    info!(
        "Filtering the folder list because --folder-name \"{}\" was set",
        needle
    );

    let mut kept = Vec::with_capacity(folders.len());
    for folder in folders {
        let path = match service.resolve_folder_path(&folder.id).await {
            Ok(path) => path,
            Err(e) => {
                error!("Failed to resolve path for folder {}: {}", folder.id, e);
                return Err(e);
            }
        };

        if path.contains(needle) {
            kept.push(folder);
        } else {
            debug!(
                "The folder \"{}\" does not match with the filter \"{}\"",
                path, needle
            );
        }
    }

    Ok(kept)
}

/// Run one complete sweep: connect, enumerate, filter, process.
///
/// Failure paths print whatever partial counters exist before surfacing the
/// error, so an aborted run still reports its progress.
pub async fn run_sweep(cli: &Cli) -> Result<Report> {
    let mailbox = cli
        .mailbox
        .clone()
        .ok_or_else(|| EwsError::Usage("No mailbox given. Use --help to refer to the usage.".to_string()))?;

    let started_at = chrono::Utc::now();
    let run_id = uuid::Uuid::new_v4().to_string();
    info!("Starting sweep run {}", run_id);

    let config = Config::load(&cli.config).await?;
    let settings = connection_settings(cli, &config, &mailbox)?;

    let reporter = ProgressReporter::new();

    // Connect
    let connect_spinner = reporter.add_spinner(&format!("Connecting to mailbox {}...", mailbox));
    let client = auth::connect(&settings).await?;
    reporter.finish_spinner(
        &connect_spinner,
        &format!("Connected to {}", client.endpoint()),
    );

    let service: Arc<dyn FolderService> = Arc::new(client);

    let scope = if cli.archive {
        info!("Searching in archive instead of mailbox");
        RootScope::Archive
    } else {
        RootScope::Mailbox
    };

    // Enumerate
    let enumerate_spinner = reporter.add_spinner("Enumerating folders...");
    let enumerator = FolderEnumerator::with_page_size(Arc::clone(&service), config.sweep.page_size);
    let folders = match enumerator.traverse(scope).await {
        Ok(folders) => folders,
        Err(e) => {
            enumerate_spinner.finish_and_clear();
            error!("{}", e);
            println!(
                "\nEnumeration failed after {} folders; no changes were made.",
                e.partial.len()
            );
            return Err(e.into());
        }
    };
    let folders_enumerated = folders.len();
    reporter.finish_spinner(
        &enumerate_spinner,
        &format!("Enumerated {} folders", folders_enumerated),
    );

    // Optional client-side path filter
    let folders = match &cli.folder_name {
        Some(needle) => {
            let filter_spinner = reporter.add_spinner("Filtering folders by path...");
            let kept = match filter_by_folder_name(&service, folders, needle).await {
                Ok(kept) => kept,
                Err(e) => {
                    filter_spinner.finish_and_clear();
                    return Err(e);
                }
            };
            reporter.finish_spinner(
                &filter_spinner,
                &format!("{} folders match \"{}\"", kept.len(), needle),
            );
            kept
        }
        None => folders,
    };
    let folders_after_filter = folders.len();

    let retention_filter = match &cli.retention_id {
        Some(raw) => RetentionFilter::parse(raw),
        None => RetentionFilter::any(),
    };

    let commit = !cli.log_only;
    if cli.log_only {
        println!("Running in LOG ONLY mode - no changes will be made");
    }

    // Sweep
    let bar = reporter.add_progress_bar(folders.len() as u64, "Processing folders...");
    let bar_handle = bar.clone();
    let sweeper = TagSweeper::new(Arc::clone(&service));
    let result = sweeper
        .process_with_progress(
            &folders,
            &retention_filter,
            commit,
            Some(Arc::new(move || bar_handle.inc(1))),
        )
        .await;

    let summary = match result {
        Ok(summary) => {
            bar.finish_with_message(format!(
                "Processed {} folders ({} changed)",
                summary.examined, summary.changed
            ));
            summary
        }
        Err(e) => {
            bar.finish_and_clear();
            error!("{}", e);
            print_partial_summary(&e.summary);
            return Err(e.into());
        }
    };

    let completed_at = chrono::Utc::now();
    let report = Report {
        run_id,
        mailbox,
        archive: cli.archive,
        log_only: cli.log_only,
        started_at,
        completed_at,
        duration_seconds: (completed_at - started_at).num_seconds(),
        folders_enumerated,
        folders_after_filter,
        summary,
    };

    if let Some(path) = &cli.report {
        let content = if path.extension().is_some_and(|ext| ext == "json") {
            serde_json::to_string_pretty(&report)
                .map_err(|e| EwsError::Config(format!("Failed to serialize report: {}", e)))?
        } else {
            report.to_markdown()
        };
        tokio::fs::write(path, content).await?;
        println!("Report written to {:?}", path);
    }

    Ok(report)
}
