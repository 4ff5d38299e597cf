//! Stack Runner
//!
//! Brings up the local compose stack, waits for every dependency to become
//! healthy, runs the check suite for one application service and always tears
//! the stack down again.
//!
//! ```text
//! stack-runner registration [VERSION]
//! stack-runner connector-admin [VERSION]
//! ```
//!
//! Exits 0 when the session passes and 1 otherwise.

mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use cli::Cli;
use env_harness::config::HarnessConfig;
use env_harness::probe::HttpProbe;
use env_harness::report::{render_summary, write_json};
use env_harness::session::Session;
use env_harness::steps::Outcome;
use env_harness::suites::{SuiteContext, Versions};
use env_harness::topology::StackEndpoints;
use std::collections::HashMap;
use std::env;
use std::process::ExitCode;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing();

    let shutdown = CancellationToken::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        trigger.cancel();
    });

    match run(cli, shutdown).await {
        Ok(outcome) => ExitCode::from(outcome.exit_code()),
        Err(e) => {
            error!("{:#}", e);
            ExitCode::from(Outcome::Fail.exit_code())
        }
    }
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "stack_runner=info,harness=info".into());

    let json = env::var("LOG_FORMAT").is_ok_and(|format| format.eq_ignore_ascii_case("json"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn run(cli: Cli, shutdown: CancellationToken) -> Result<Outcome> {
    let vars: HashMap<String, String> = env::vars().collect();
    let config = HarnessConfig::from_vars(&vars).context("Failed to load configuration")?;

    let (suite, positional) = cli.command.suite();
    let versions = Versions::select(suite, positional, &vars);

    info!(
        suite = %suite,
        version = %suite.version(&versions),
        project = %config.project_name,
        compose_dir = %config.compose_dir.display(),
        max_attempts = config.readiness.max_attempts(),
        interval_secs = config.readiness.interval().as_secs(),
        "Configuration loaded"
    );

    let endpoints = StackEndpoints::from_config(&config);
    let spec = suite
        .session_spec(&config, &endpoints, &versions)
        .context("Invalid session declaration")?;
    let provisioner = suite.compose_project(&config, &versions);
    let probe = HttpProbe::new();

    let ctx = SuiteContext::new(&config, endpoints).detect_grpcurl().await;
    if !ctx.grpc_available() {
        warn!("grpcurl not found in PATH, gRPC steps will be skipped");
    }

    let report = Session::new(spec, &provisioner, &probe)
        .run(suite.steps(&ctx), shutdown)
        .await;

    println!("{}", render_summary(&report));

    if let Some(path) = &cli.report {
        write_json(&report, path)
            .await
            .with_context(|| format!("Failed to write report to {}", path.display()))?;
        info!(path = %path.display(), "Report written");
    }

    Ok(report.outcome)
}

/// Completes on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received SIGINT, tearing down..."),
            Err(e) => {
                error!("Failed to listen for SIGINT: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received SIGTERM, tearing down...");
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
