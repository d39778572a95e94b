//! Command-line interface definitions for the `garm-e2e` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::{Parser, ValueEnum};

/// Top-level CLI for the `garm-e2e` binary.
#[derive(Debug, Parser)]
#[command(
    name = "garm-e2e",
    about = "Exercise a GARM control plane end to end: provision, verify, mutate, tear down",
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// Run an end-to-end scenario.
    #[command(name = "run", about = "Run an end-to-end scenario")]
    Run(RunCommand),
    /// Remove resources left behind by an aborted run.
    #[command(name = "cleanup", about = "Remove resources left behind by an aborted run")]
    Cleanup(CleanupCommand),
}

/// Scenario shapes selectable from the command line.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, ValueEnum)]
pub(crate) enum ScenarioArg {
    /// A single repository scope.
    Repository,
    /// Repository and organization scopes.
    RepositoryAndOrganization,
    /// Repository and organization scopes plus a scope-less pool.
    #[default]
    Full,
}

/// Arguments for the `garm-e2e run` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct RunCommand {
    /// Scenario to run.
    #[arg(long, value_enum, default_value_t = ScenarioArg::Full)]
    pub(crate) scenario: ScenarioArg,
    /// Poll until every awaited state is reached, ignoring the attempt budget.
    ///
    /// A control plane that never reaches the awaited state makes the run
    /// hang; interrupt it with Ctrl-C.
    #[arg(long)]
    pub(crate) unbounded_polling: bool,
}

/// Arguments for the `garm-e2e cleanup` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct CleanupCommand {
    /// Only sweep repositories.
    #[arg(long, conflicts_with = "organizations_only")]
    pub(crate) repositories_only: bool,
    /// Only sweep organizations.
    #[arg(long, conflicts_with = "repositories_only")]
    pub(crate) organizations_only: bool,
}
