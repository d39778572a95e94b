//! BDD step definitions for cleanup behaviour.

use garm_e2e::api::{RemoteError, ScopeKind};
use garm_e2e::{Cleanup, CleanupFilter};
use rstest_bdd_macros::{given, then, when};
use tokio::runtime::Runtime;

use super::test_helpers::{CleanupContext, SweepOutcome, fast_poller, seed_leftover};

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("assertion failed: {0}")]
    Assertion(String),
}

#[given("leftovers for organization \"{org}\" and repository \"{repo}\"")]
fn leftovers(mut cleanup_context: CleanupContext, org: String, repo: String) -> CleanupContext {
    let org_name = org.trim();
    let repo_name = repo.trim();
    seed_leftover(&cleanup_context.api, ScopeKind::Repository, Some(org_name), repo_name);
    seed_leftover(&cleanup_context.api, ScopeKind::Organization, None, org_name);
    cleanup_context.filter = Some(CleanupFilter {
        org_name: org_name.to_owned(),
        repo_name: repo_name.to_owned(),
    });
    cleanup_context
}

#[given("an unrelated repository \"{repo}\" owned by \"{owner}\"")]
fn unrelated_repository(cleanup_context: CleanupContext, repo: String, owner: String) -> CleanupContext {
    cleanup_context
        .api
        .seed_scope(ScopeKind::Repository, Some(owner.trim()), repo.trim());
    cleanup_context
}

#[given("deleting a pool fails with status {status:u16}")]
fn pool_deletion_fails(cleanup_context: CleanupContext, status: u16) -> CleanupContext {
    cleanup_context.api.fail_next(
        "delete_pool",
        RemoteError::Status {
            endpoint: String::from("pools/pool-1"),
            status,
            message: String::from("internal error"),
        },
    );
    cleanup_context
}

#[when("I run the cleanup sweep")]
fn run_sweep(mut cleanup_context: CleanupContext) -> Result<CleanupContext, StepError> {
    let runtime = Runtime::new().map_err(|err| StepError::Assertion(err.to_string()))?;
    let filter = cleanup_context
        .filter
        .clone()
        .ok_or_else(|| StepError::Assertion(String::from("test setup requires leftovers")))?;
    let api = cleanup_context.api.clone();
    let poller = fast_poller();

    let result = runtime.block_on(async move {
        Cleanup::new(&api, &poller, filter)
            .sweep(&[ScopeKind::Repository, ScopeKind::Organization])
            .await
    });
    cleanup_context.outcome = Some(match result {
        Ok(summary) => SweepOutcome::Success(summary),
        Err(err) => SweepOutcome::Failure(err.to_string()),
    });
    Ok(cleanup_context)
}

#[then("the sweep reports deleting {pools:u32} pools and {scopes:u32} scopes")]
fn reports_deletions(
    cleanup_context: &CleanupContext,
    pools: u32,
    scopes: u32,
) -> Result<(), StepError> {
    let Some(outcome) = cleanup_context.outcome.as_ref() else {
        return Err(StepError::Assertion(String::from("missing outcome")));
    };
    let SweepOutcome::Success(summary) = outcome else {
        return Err(StepError::Assertion(format!(
            "expected success, got: {outcome:?}"
        )));
    };
    if summary.deleted_pools.len() == pools as usize && summary.deleted_scopes.len() == scopes as usize
    {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected {pools} pools and {scopes} scopes, got {summary:?}"
        )))
    }
}

#[then("instances were deleted before their pools")]
fn instances_before_pools(cleanup_context: &CleanupContext) -> Result<(), StepError> {
    let mutations = cleanup_context.api.mutations();
    let position = |prefix: &str| mutations.iter().position(|call| call.starts_with(prefix));
    let last_instance = mutations
        .iter()
        .rposition(|call| call.starts_with("delete_instance"))
        .ok_or_else(|| StepError::Assertion(String::from("no instance was deleted")))?;
    let first_pool = position("delete_pool")
        .ok_or_else(|| StepError::Assertion(String::from("no pool was deleted")))?;
    let first_scope = position("delete_scope")
        .ok_or_else(|| StepError::Assertion(String::from("no scope was deleted")))?;
    if last_instance < first_pool && first_pool < first_scope {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "deletions out of order: {mutations:?}"
        )))
    }
}

#[then("no matching scope remains")]
fn nothing_remains(cleanup_context: &CleanupContext) -> Result<(), StepError> {
    let scopes = cleanup_context.api.scopes();
    if scopes.is_empty() && cleanup_context.api.pools().is_empty() {
        Ok(())
    } else {
        Err(StepError::Assertion(format!("scopes remain: {scopes:?}")))
    }
}

#[then("the repository \"{repo}\" still exists")]
fn repository_survives(cleanup_context: &CleanupContext, repo: String) -> Result<(), StepError> {
    let scopes = cleanup_context.api.scopes();
    if scopes.iter().any(|scope| scope.name == repo.trim()) {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected {repo} to survive, got {scopes:?}"
        )))
    }
}

#[then("the sweep fails mentioning \"{fragment}\"")]
fn sweep_fails(cleanup_context: &CleanupContext, fragment: String) -> Result<(), StepError> {
    let Some(outcome) = cleanup_context.outcome.as_ref() else {
        return Err(StepError::Assertion(String::from("missing outcome")));
    };
    let SweepOutcome::Failure(message) = outcome else {
        return Err(StepError::Assertion(String::from(
            "expected sweep to fail, got success",
        )));
    };
    if message.contains(fragment.trim()) {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected failure mentioning {fragment}, got: {message}"
        )))
    }
}
