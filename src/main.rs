use clap::Parser;
use ews_retention_sweep::cli::{self, Cli};
use ews_retention_sweep::error::EwsError;
use std::process;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing with level based on verbose flag
    let filter = if cli.verbose {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("ews_retention_sweep=debug,info"))
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("ews_retention_sweep=info,warn,error"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    tracing::info!("Program started");

    match cli::run_sweep(&cli).await {
        Ok(report) => {
            cli::print_summary(&report);
            tracing::info!("Program finished");
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            if matches!(e, EwsError::Usage(_)) {
                eprintln!("\nFor help, run: ews-retention-sweep --help");
            }
            tracing::error!("Program stopped with failures");
            process::exit(e.exit_code());
        }
    }
}
