mod collector;
mod config;
mod delivery;
mod error;
mod models;
mod runner;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use collector::{Collector, CollectorSettings, handle_test_event};
use config::Config;
use delivery::{Dispatcher, SlackWebhook, WebhookTransport, wait_all};
use runner::EventSource;

/// Post test results to a Slack incoming webhook.
#[derive(Debug, Parser)]
#[command(name = "ci-slack-reporter", version)]
struct Cli {
    /// Read NDJSON lifecycle events from stdin instead of spawning mocha.
    #[arg(long)]
    stdin: bool,

    /// Send one message per test file instead of one per run.
    #[arg(long)]
    group_by_file: bool,

    /// Arguments passed through to mocha.
    #[arg(last = true)]
    mocha_args: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let workspace = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));

    let mut config = Config::load(&workspace);
    if cli.group_by_file {
        config.report.group_by_file = true;
    }
    for problem in config.validate() {
        tracing::warn!("{}", problem);
    }

    let mocha_args = resolve_mocha_args(cli.mocha_args, &config);
    let source = runner::detect(workspace.clone(), cli.stdin, mocha_args);
    tracing::debug!(source = source.name(), "event source selected");

    let code = run(source, &config, workspace).await?;
    std::process::exit(code);
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Command-line args win; otherwise fall back to `runner.command` from the config file.
fn resolve_mocha_args(cli_args: Vec<String>, config: &Config) -> Vec<String> {
    if !cli_args.is_empty() {
        return cli_args;
    }
    let Some(command) = config.runner.command.as_deref() else {
        return Vec::new();
    };
    match shell_words::split(command) {
        Ok(args) => args,
        Err(e) => {
            tracing::warn!(command, error = %e, "cannot parse runner.command, ignoring it");
            Vec::new()
        }
    }
}

/// Drive one test run to completion. Returns the exit code of the test process.
async fn run(source: Arc<dyn EventSource>, config: &Config, workspace: PathBuf) -> Result<i32> {
    run_with_transport(source, config, workspace, Arc::new(SlackWebhook::new())).await
}

async fn run_with_transport(
    source: Arc<dyn EventSource>,
    config: &Config,
    workspace: PathBuf,
    transport: Arc<dyn WebhookTransport>,
) -> Result<i32> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let streaming = tokio::spawn(async move { source.stream(tx).await });

    let mut collector = Collector::new(CollectorSettings::from_config(config, workspace));
    let dispatcher = Dispatcher::new(transport, &config.webhook, &config.report);

    let mut in_flight = Vec::new();
    while let Some(event) = rx.recv().await {
        for document in handle_test_event(&mut collector, event) {
            in_flight.extend(dispatcher.dispatch(&document));
        }
    }

    let streamed = streaming.await.context("event source task failed");

    if !collector.open_labels().is_empty() {
        tracing::warn!(
            labels = ?collector.open_labels(),
            "run ended without a run-end event, results not reported"
        );
    }

    // Deliveries must finish before the process exits.
    let summary = wait_all(in_flight).await;
    tracing::info!(
        sent = summary.sent,
        failed = summary.failed,
        "webhook delivery finished"
    );

    Ok(streamed??.unwrap_or(0))
}
