//! Tests for the teardown state machine.

use std::time::Duration;

use rstest::{fixture, rstest};

use super::*;
use crate::api::ScopeKind;
use crate::poller::PollPolicy;
use crate::test_support::ScriptedControlPlane;

#[fixture]
fn poller() -> Poller {
    Poller::new(
        PollPolicy::default()
            .with_interval(Duration::from_millis(10))
            .with_max_attempts(Some(5)),
    )
}

/// Repository and organization scopes, one pool and one ready instance each.
fn seeded(api: &ScriptedControlPlane) -> Vec<TeardownTarget> {
    [
        (ScopeKind::Repository, Some("acme")),
        (ScopeKind::Organization, None),
    ]
    .into_iter()
    .map(|(kind, owner)| {
        let scope = api.seed_scope(kind, owner, "acme");
        let scope_ref = ScopeRef::new(kind, scope.id);
        let pool = api.seed_pool(&scope_ref, "ubuntu:22.04");
        let instance = api.seed_instance(&pool.id);
        TeardownTarget {
            pool: PoolRef::Scoped {
                scope: scope_ref.clone(),
                pool_id: pool.id,
            },
            instances: vec![instance.name],
            scope: Some(scope_ref),
        }
    })
    .collect()
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn stages_run_breadth_first_in_ownership_order(poller: Poller) {
    let api = ScriptedControlPlane::new();
    let targets = seeded(&api);

    let summary = Teardown::new(&api, &poller)
        .run(&targets)
        .await
        .expect("teardown should succeed");

    assert_eq!(
        api.mutations(),
        vec![
            "update_pool pool-1 enabled=false",
            "update_pool pool-2 enabled=false",
            "delete_instance garm-1",
            "delete_instance garm-2",
            "delete_pool pool-1",
            "delete_pool pool-2",
            "delete_scope repo-1",
            "delete_scope org-1",
        ]
    );
    assert_eq!(summary.deleted_instances, vec!["garm-1", "garm-2"]);
    assert_eq!(summary.deleted_scopes.len(), 2);
    assert!(api.scopes().is_empty());
    assert!(api.pools().is_empty());
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn instance_delete_waits_for_disappearance(poller: Poller) {
    let api = ScriptedControlPlane::new().with_delete_lag(2);
    let targets = seeded(&api);
    let single = targets.into_iter().take(1).collect::<Vec<_>>();

    Teardown::new(&api, &poller)
        .run(&single)
        .await
        .expect("teardown should succeed");

    let calls = api.calls();
    let delete_at = calls
        .iter()
        .position(|call| call.op == "delete_instance")
        .expect("instance delete recorded");
    let listings_before_pool_wait = calls
        .iter()
        .skip(delete_at)
        .take_while(|call| call.op != "get_pool")
        .filter(|call| call.op == "list_instances")
        .count();
    assert_eq!(listings_before_pool_wait, 3);
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn shared_scope_is_deleted_once_after_all_pools(poller: Poller) {
    let api = ScriptedControlPlane::new();
    let scope = api.seed_scope(ScopeKind::Repository, Some("acme"), "repo");
    let scope_ref = ScopeRef::new(ScopeKind::Repository, scope.id);
    let targets: Vec<TeardownTarget> = (0..2)
        .map(|_| {
            let pool = api.seed_pool(&scope_ref, "ubuntu:22.04");
            TeardownTarget {
                pool: PoolRef::Global { pool_id: pool.id },
                instances: Vec::new(),
                scope: Some(scope_ref.clone()),
            }
        })
        .collect();

    let summary = Teardown::new(&api, &poller)
        .run(&targets)
        .await
        .expect("teardown should succeed");

    assert_eq!(summary.deleted_scopes, vec![scope_ref]);
    assert_eq!(
        api.mutations().last().map(String::as_str),
        Some("delete_scope repo-1")
    );
    assert_eq!(api.count("delete_scope"), 1);
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn instances_listed_after_disable_are_deleted(poller: Poller) {
    let api = ScriptedControlPlane::new();
    let mut targets = seeded(&api);
    for target in &mut targets {
        target.instances.clear();
    }
    let late = api.seed_instance("pool-1");

    let summary = Teardown::new(&api, &poller)
        .run(&targets)
        .await
        .expect("teardown should discover pool instances");

    assert_eq!(summary.deleted_instances, vec!["garm-1", late.name.as_str(), "garm-2"]);
    assert!(api.instances().is_empty());
    assert!(api.pools().is_empty());
    let calls = api.calls();
    let disabled_at = calls
        .iter()
        .rposition(|call| call.op == "update_pool")
        .expect("disable recorded");
    let first_read = calls
        .iter()
        .position(|call| call.op == "get_pool")
        .expect("pool re-read recorded");
    assert!(disabled_at < first_read, "calls: {calls:?}");
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn lingering_instance_stalls_the_disabling_stage(poller: Poller) {
    let api = ScriptedControlPlane::new().with_delete_lag(100);
    let targets = seeded(&api);

    let err = Teardown::new(&api, &poller)
        .run(&targets)
        .await
        .expect_err("instance wait should time out");

    assert!(matches!(
        err,
        TeardownError::Wait {
            stage: TeardownStage::Disabling,
            source: PollError::Timeout { attempts: 5, .. },
        }
    ));
    assert_eq!(api.count("delete_instance"), 1);
    assert_eq!(api.count("delete_pool"), 0);
    assert_eq!(api.count("delete_scope"), 0);
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn targets_naming_one_pool_are_torn_down_once(poller: Poller) {
    let api = ScriptedControlPlane::new();
    let mut targets = seeded(&api);
    targets.truncate(1);
    let scoped = targets.first().cloned().expect("seeded target");
    targets.push(TeardownTarget {
        pool: PoolRef::Global {
            pool_id: scoped.pool.pool_id().to_owned(),
        },
        instances: scoped.instances.clone(),
        scope: None,
    });

    let summary = Teardown::new(&api, &poller)
        .run(&targets)
        .await
        .expect("duplicate targets should not fail");

    assert_eq!(
        api.mutations(),
        vec![
            "update_pool pool-1 enabled=false",
            "delete_instance garm-1",
            "delete_pool pool-1",
            "delete_scope repo-1",
        ]
    );
    assert_eq!(summary.deleted_pools, vec![scoped.pool]);
    assert_eq!(summary.deleted_scopes.len(), 1);
}

#[rstest]
#[tokio::test(start_paused = true)]
async fn first_failure_aborts_remaining_stages(poller: Poller) {
    let api = ScriptedControlPlane::new();
    let targets = seeded(&api);
    api.fail_next(
        "update_pool",
        RemoteError::Status {
            endpoint: String::from("repositories/repo-1/pools/pool-1"),
            status: 500,
            message: String::from("boom"),
        },
    );

    let err = Teardown::new(&api, &poller)
        .run(&targets)
        .await
        .expect_err("disable failure should abort");

    assert!(matches!(
        err,
        TeardownError::Remote { action: "disable", .. }
    ));
    assert_eq!(api.mutations(), vec!["update_pool pool-1 enabled=false"]);
    assert_eq!(api.instances().len(), 2);
}

#[test]
fn stage_sequence_is_linear_and_terminal() {
    let mut stage = TeardownStage::Active;
    let mut seen = vec![stage];
    while stage != TeardownStage::Done {
        stage = stage.next();
        seen.push(stage);
    }
    assert_eq!(
        seen,
        vec![
            TeardownStage::Active,
            TeardownStage::Disabling,
            TeardownStage::Draining,
            TeardownStage::Drained,
            TeardownStage::PoolDeleted,
            TeardownStage::Done,
        ]
    );
    assert_eq!(TeardownStage::Done.next(), TeardownStage::Done);
}
