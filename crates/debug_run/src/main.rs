mod cli;

use std::process::ExitCode;

use anyhow::{bail, Context};
use clap::Parser;
use devtools_bridge_core::{DebugRun, RunConfig, RunOutcome, RunReport};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use crate::cli::Cli;

const EXIT_ABORTED: u8 = 1;
const EXIT_CAPTURED_ERRORS: u8 = 2;

fn setup_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    // stdout carries the report
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run_build(command: &str) -> anyhow::Result<()> {
    tracing::info!("Building target: {}", command);

    let mut shell = if cfg!(windows) {
        let mut shell = Command::new("cmd");
        shell.arg("/C");
        shell
    } else {
        let mut shell = Command::new("sh");
        shell.arg("-c");
        shell
    };

    let status = shell
        .arg(command)
        .status()
        .await
        .with_context(|| format!("failed to start build command `{command}`"))?;
    if !status.success() {
        bail!("build command `{command}` failed ({status})");
    }
    Ok(())
}

fn exit_code(report: &RunReport) -> ExitCode {
    match report.outcome {
        RunOutcome::Aborted => ExitCode::from(EXIT_ABORTED),
        RunOutcome::Closed if report.is_clean() => ExitCode::SUCCESS,
        RunOutcome::Closed => ExitCode::from(EXIT_CAPTURED_ERRORS),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    setup_tracing();

    let cli = Cli::parse();
    if let Some(command) = cli.build_command() {
        run_build(command).await?;
    }
    let config = cli.into_config(RunConfig::from_env());

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupted; ending the capture window");
                cancel.cancel();
            }
        });
    }

    let report = DebugRun::new()
        .run_with_cancel(&config, cancel)
        .await
        .with_context(|| format!("cannot write run output to {}", config.output_dir.display()))?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(exit_code(&report))
}
