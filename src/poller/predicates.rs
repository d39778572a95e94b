//! Predicate families evaluated by the [`Poller`](super::Poller).

use crate::api::{Instance, InstanceStatus, Pool, RunnerStatus};

/// Holds once the first listed instance reports both target statuses.
///
/// Later entries are not consulted.
pub fn first_instance_ready<L>(
    status: InstanceStatus,
    runner: RunnerStatus,
) -> impl Fn(&L) -> bool
where
    L: AsRef<[Instance]>,
{
    move |instances: &L| {
        instances
            .as_ref()
            .first()
            .is_some_and(|instance| instance.status == status && instance.runner_status == runner)
    }
}

/// Holds once the pool reports no instances.
#[must_use]
pub fn pool_drained(pool: &Pool) -> bool {
    pool.instances.is_empty()
}

/// Holds once no listed instance carries `name`.
pub fn instance_absent<L>(name: &str) -> impl Fn(&L) -> bool + '_
where
    L: AsRef<[Instance]>,
{
    move |instances: &L| {
        instances
            .as_ref()
            .iter()
            .all(|instance| instance.name != name)
    }
}
