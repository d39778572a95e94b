//! End-to-end scenario runs against the scripted control plane.

use std::time::Duration;

use garm_e2e::api::ScopeKind;
use garm_e2e::scenario::plan::{ORG_LABEL, REPO_LABEL};
use garm_e2e::test_support::ScriptedControlPlane;
use garm_e2e::{
    PollPolicy, Poller, Scenario, ScenarioPlan, ScenarioSettings, ScenarioVariant, report,
};
use rstest::{fixture, rstest};

#[fixture]
fn poller() -> Poller {
    Poller::new(
        PollPolicy::default()
            .with_interval(Duration::from_secs(5))
            .with_max_attempts(Some(10)),
    )
}

#[fixture]
fn settings() -> ScenarioSettings {
    ScenarioSettings {
        org_name: String::from("test-garm-org"),
        repo_name: String::from("test-garm-repo"),
        credentials_name: String::from("gh-creds"),
        repo_webhook_secret: String::from("repo-secret"),
        org_webhook_secret: String::from("org-secret"),
    }
}

#[rstest]
#[case::repository(ScenarioVariant::Repository, &[REPO_LABEL], 1)]
#[case::repository_and_organization(ScenarioVariant::RepositoryAndOrganization, &[REPO_LABEL, ORG_LABEL], 2)]
#[case::full(ScenarioVariant::Full, &[REPO_LABEL, ORG_LABEL], 3)]
#[tokio::test(start_paused = true)]
async fn every_variant_leaves_the_control_plane_empty(
    poller: Poller,
    settings: ScenarioSettings,
    #[case] variant: ScenarioVariant,
    #[case] labels: &[&str],
    #[case] pools: usize,
) {
    let api = ScriptedControlPlane::new().with_ready_after(3).with_delete_lag(2);
    let plan = ScenarioPlan::for_variant(variant, &settings);

    let outcome = Scenario::new(&api, &poller)
        .run(&plan)
        .await
        .unwrap_or_else(|err| panic!("{variant:?} scenario failed: {err}"));

    let recorded: Vec<&str> = outcome
        .scopes
        .iter()
        .map(|session| session.label.as_str())
        .collect();
    assert_eq!(recorded, labels);
    assert!(
        outcome
            .scopes
            .iter()
            .all(|session| session.instance_name.is_some()),
        "every scope should record its runner: {outcome:?}"
    );
    assert_eq!(outcome.teardown.deleted_pools.len(), pools);
    assert!(api.scopes().is_empty(), "scopes left: {:?}", api.scopes());
    assert!(api.pools().is_empty(), "pools left: {:?}", api.pools());
    assert!(api.instances().is_empty(), "instances left: {:?}", api.instances());
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn rerun_after_partial_failure_reuses_existing_scopes(
    poller: Poller,
    settings: ScenarioSettings,
) {
    let api = ScriptedControlPlane::new();
    api.seed_scope(ScopeKind::Repository, Some("test-garm-org"), "test-garm-repo");
    api.seed_scope(ScopeKind::Organization, None, "test-garm-org");
    let plan = ScenarioPlan::for_variant(ScenarioVariant::RepositoryAndOrganization, &settings);

    Scenario::new(&api, &poller)
        .run(&plan)
        .await
        .unwrap_or_else(|err| panic!("scenario failed: {err}"));

    assert_eq!(api.count("create_scope"), 0);
    assert_eq!(api.count("create_scope_pool"), 2);
    assert_eq!(api.count("delete_scope"), 2);
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn scenario_report_renders_as_json(poller: Poller, settings: ScenarioSettings) {
    let api = ScriptedControlPlane::new();
    let plan = ScenarioPlan::for_variant(ScenarioVariant::Repository, &settings);

    let outcome = Scenario::new(&api, &poller)
        .run(&plan)
        .await
        .unwrap_or_else(|err| panic!("scenario failed: {err}"));

    let rendered = report::render(&outcome);
    assert!(rendered.contains("\"instance_name\": \"garm-1\""), "{rendered}");
    assert!(rendered.contains("\"deleted_instances\""), "{rendered}");
}
