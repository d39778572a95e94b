//! Binary entry point for the `garm-e2e` CLI.

use std::io::{self, Write};
use std::process;

use clap::Parser;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use garm_e2e::{
    Cleanup, CleanupError, CleanupFilter, ClientProfile, ConfigError, E2eConfig, GarmClient,
    Poller, ProfileError, RemoteError, Scenario, ScenarioError, ScenarioPlan,
    ScenarioSettings, ScenarioVariant, ScopeKind, report,
};

mod cli;

use cli::{CleanupCommand, Cli, RunCommand, ScenarioArg};

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("profile error: {0}")]
    Profile(#[from] ProfileError),
    #[error("client error: {0}")]
    Client(#[from] RemoteError),
    #[error("scenario failed: {0}")]
    Scenario(#[from] ScenarioError),
    #[error("cleanup failed: {0}")]
    Cleanup(#[from] CleanupError),
}

/// Everything a subcommand needs once configuration has been resolved.
struct Context {
    config: E2eConfig,
    client: GarmClient,
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();
    let exit_code = match dispatch(cli).await {
        Ok(()) => 0,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .try_init()
        .ok();
}

async fn dispatch(cli: Cli) -> Result<(), CliError> {
    let context = load_context()?;
    let shutdown = shutdown_token();
    match cli {
        Cli::Run(command) => run_scenario(&context, &command, shutdown).await,
        Cli::Cleanup(command) => run_cleanup(&context, &command, shutdown).await,
    }
}

fn load_context() -> Result<Context, CliError> {
    let config = E2eConfig::load_without_cli_args()?;
    config.validate()?;
    let profile = ClientProfile::resolve(&config)?;
    let client = GarmClient::new(&profile)?;
    info!(api_base = client.api_base(), "using control plane");
    Ok(Context { config, client })
}

/// Token cancelled on Ctrl-C so in-flight waits stop promptly.
fn shutdown_token() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling waits");
            trigger.cancel();
        }
    });
    token
}

fn poller_for(config: &E2eConfig, unbounded: bool, shutdown: CancellationToken) -> Poller {
    let policy = if unbounded {
        config.poll_policy().with_max_attempts(None)
    } else {
        config.poll_policy()
    };
    Poller::new(policy).with_cancellation(shutdown)
}

const fn variant_for(arg: ScenarioArg) -> ScenarioVariant {
    match arg {
        ScenarioArg::Repository => ScenarioVariant::Repository,
        ScenarioArg::RepositoryAndOrganization => ScenarioVariant::RepositoryAndOrganization,
        ScenarioArg::Full => ScenarioVariant::Full,
    }
}

async fn run_scenario(
    context: &Context,
    command: &RunCommand,
    shutdown: CancellationToken,
) -> Result<(), CliError> {
    let poller = poller_for(&context.config, command.unbounded_polling, shutdown);
    let settings = ScenarioSettings::from(&context.config);
    let plan = ScenarioPlan::for_variant(variant_for(command.scenario), &settings);

    info!(scenario = ?command.scenario, scopes = plan.scopes.len(), "starting scenario");
    let scenario_report = Scenario::new(&context.client, &poller).run(&plan).await?;
    info!(
        pools = scenario_report.teardown.deleted_pools.len(),
        scopes = scenario_report.teardown.deleted_scopes.len(),
        "scenario complete"
    );
    report::log_response("scenario report", &scenario_report);
    Ok(())
}

async fn run_cleanup(
    context: &Context,
    command: &CleanupCommand,
    shutdown: CancellationToken,
) -> Result<(), CliError> {
    let poller = poller_for(&context.config, false, shutdown);
    let kinds = cleanup_kinds(command);
    let summary = Cleanup::new(
        &context.client,
        &poller,
        CleanupFilter::from(&context.config),
    )
    .sweep(&kinds)
    .await?;
    info!(
        instances = summary.deleted_instances.len(),
        pools = summary.deleted_pools.len(),
        scopes = summary.deleted_scopes.len(),
        "cleanup complete"
    );
    Ok(())
}

fn cleanup_kinds(command: &CleanupCommand) -> Vec<ScopeKind> {
    if command.repositories_only {
        vec![ScopeKind::Repository]
    } else if command.organizations_only {
        vec![ScopeKind::Organization]
    } else {
        vec![ScopeKind::Repository, ScopeKind::Organization]
    }
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}
