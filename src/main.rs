//! Binary entry point for the `geosnap` CLI.

use std::io::{self, Write};
use std::process;

use camino::Utf8PathBuf;
use clap::Parser;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use geosnap::{
    BackupError, BackupOrchestrator, EngineCredentials, OrchestratorSettings, OvirtError,
    OvirtRegistry, ProcessCommandRunner, ReplicationRequest, SnapshotRegistry, ToolConfig,
    logging, shutdown,
};

mod cli;

use cli::Cli;

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] geosnap::ConfigError),
    #[error("failed to connect to engine: {0}")]
    Connect(#[source] OvirtError),
    #[error("backup cycle failed: {0}")]
    Backup(#[from] BackupError<OvirtError>),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init();
    let exit_code = match dispatch(cli).await {
        Ok(code) => code,
        Err(err) => {
            error!(error = %err, "backup aborted");
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

async fn dispatch(cli: Cli) -> Result<i32, CliError> {
    let tool = ToolConfig::load_without_cli_args()?;
    tool.validate()?;
    let credentials = EngineCredentials::load(&Utf8PathBuf::from(cli.config.as_str()))?;

    let registry = OvirtRegistry::connect(&credentials)
        .await
        .map_err(CliError::Connect)?;
    let cancel = CancellationToken::new();
    let listener = shutdown::spawn_signal_listener(cancel.clone());
    let orchestrator = BackupOrchestrator::new(
        registry,
        ProcessCommandRunner,
        OrchestratorSettings::from_tool_config(&tool),
    )
    .with_cancellation(cancel);

    let outcome = orchestrator.run(&replication_request(&cli)).await;
    listener.abort();
    if let Err(err) = orchestrator.into_registry().disconnect().await {
        warn!(error = %err, "failed to close engine session");
    }
    let report = outcome?;
    info!(
        rc = report.exit_code,
        interrupted = report.interrupted,
        snapshots = report.snapshots.len(),
        removed = report.removed_artifacts(),
        "backup cycle finished"
    );
    Ok(report.exit_code)
}

fn replication_request(cli: &Cli) -> ReplicationRequest {
    ReplicationRequest {
        master_volume: cli.mastervol.clone(),
        slave: cli.slave.clone(),
        slave_volume: cli.slavevol.clone(),
        interval_secs: cli.interval,
        timeout_mins: cli.timeout,
    }
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}
