//! BDD scenarios for the cleanup sweep.

use rstest_bdd_macros::scenario;

use super::test_helpers::{CleanupContext, cleanup_context};

#[scenario(
    path = "tests/features/cleanup.feature",
    name = "Remove leftover scopes and everything beneath them"
)]
fn scenario_remove_leftovers(cleanup_context: CleanupContext) {
    let _ = cleanup_context;
}

#[scenario(
    path = "tests/features/cleanup.feature",
    name = "Leave unrelated scopes alone"
)]
fn scenario_leave_unrelated(cleanup_context: CleanupContext) {
    let _ = cleanup_context;
}

#[scenario(
    path = "tests/features/cleanup.feature",
    name = "Surface a failed pool deletion"
)]
fn scenario_surface_failure(cleanup_context: CleanupContext) {
    let _ = cleanup_context;
}
