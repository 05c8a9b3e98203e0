//! Run the ServiceNow report processor against a single Puppet run report.
//!
//! Intended to be called by the Puppet server's report hook once per run.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::info;

use servicenow_report::secrets::DEFAULT_KEY_CONFIG_PATH;
use servicenow_report::{
    ProcessOutcome, ReportProcessor, ReportSummary, SecretResolver, DEFAULT_SETTINGS_PATH,
};

#[derive(Parser, Debug)]
#[command(name = "servicenow-report")]
#[command(about = "Open ServiceNow incidents for Puppet run reports")]
#[command(version)]
struct Cli {
    /// Run report to process (YAML or JSON)
    #[arg(long, env = "SERVICENOW_REPORT_FILE")]
    report: PathBuf,

    /// ServiceNow reporting settings file
    #[arg(long, env = "SERVICENOW_REPORTING_CONFIG", default_value = DEFAULT_SETTINGS_PATH)]
    config: PathBuf,

    /// hiera-eyaml key config naming the PKCS7 key files
    #[arg(long, env = "EYAML_CONFIG", default_value = DEFAULT_KEY_CONFIG_PATH)]
    eyaml_config: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            // Processor errors were already reported; this covers CLI-level failures too.
            eprintln!("servicenow-report: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let report = ReportSummary::load(&cli.report)
        .with_context(|| format!("Failed to load run report {}", cli.report.display()))?;

    let processor = ReportProcessor::new(&cli.config)
        .with_resolver(SecretResolver::with_key_config(&cli.eyaml_config));

    match processor.process(&report).await? {
        ProcessOutcome::Skipped => {
            info!(host = %report.host, status = %report.status, "No incident created");
        }
        ProcessOutcome::Created(created) => {
            info!(
                host = %report.host,
                number = created.number.as_deref().unwrap_or("unknown"),
                "Incident created"
            );
        }
    }

    Ok(())
}
