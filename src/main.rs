//! Orchestrator Core CLI: the minimal external surface over the
//! runtime (`boot`, `status`, `verify`, `shutdown`).

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use orchestrator_core::infrastructure::config::ConfigLoader;
use orchestrator_core::infrastructure::logging::LoggerImpl;
use orchestrator_core::Runtime;

const EXIT_OK: u8 = 0;
const EXIT_BOOT_FAILURE: u8 = 64;
const EXIT_VERIFICATION_CRITICAL: u8 = 65;
const EXIT_INTERNAL_ERROR: u8 = 70;

#[derive(Parser)]
#[command(name = "orchestrator", about = "Resilient orchestration core")]
struct Cli {
    #[arg(long, env = "ORCHESTRATOR_LOG_PATH", default_value = "orchestrator.jsonl")]
    log_path: std::path::PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the boot pipeline and exit once the system is ready.
    Boot,
    /// Print the control plane's status as JSON.
    Status,
    /// Run `verify_all` once and print the report as JSON.
    Verify,
    /// Gracefully stop every running kernel.
    Shutdown,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match ConfigLoader::load() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("failed to load configuration: {err}");
            return ExitCode::from(EXIT_INTERNAL_ERROR);
        }
    };

    if let Err(err) = LoggerImpl::init(&config.logging) {
        eprintln!("failed to initialize logging: {err}");
        return ExitCode::from(EXIT_INTERNAL_ERROR);
    }

    let runtime = match Runtime::new(&config, &cli.log_path) {
        Ok(runtime) => runtime,
        Err(err) => {
            tracing::error!(error = %err, "failed to construct runtime");
            return ExitCode::from(EXIT_INTERNAL_ERROR);
        }
    };

    match cli.command {
        Command::Boot => match runtime.boot(config.verify_interval_sec).await {
            Ok(report) => {
                println!("{}", serde_json::to_string_pretty(&report).unwrap_or_default());
                ExitCode::from(EXIT_OK)
            }
            Err(err) => {
                tracing::error!(error = %err, "boot pipeline failed");
                ExitCode::from(EXIT_BOOT_FAILURE)
            }
        },
        Command::Status => {
            let status = runtime.status().await;
            println!("{}", serde_json::to_string_pretty(&status).unwrap_or_default());
            ExitCode::from(EXIT_OK)
        }
        Command::Verify => {
            let report = runtime.verify().await;
            println!("{}", serde_json::to_string_pretty(&report).unwrap_or_default());
            if report.status == orchestrator_core::services::verification::VerificationStatus::CriticalViolations {
                ExitCode::from(EXIT_VERIFICATION_CRITICAL)
            } else {
                ExitCode::from(EXIT_OK)
            }
        }
        Command::Shutdown => match runtime.shutdown().await {
            Ok(()) => ExitCode::from(EXIT_OK),
            Err(err) => {
                tracing::error!(error = %err, "shutdown failed");
                ExitCode::from(EXIT_INTERNAL_ERROR)
            }
        },
    }
}
