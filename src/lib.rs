//! Core library for the `garm-e2e` exerciser.
//!
//! The crate drives a GARM runner-fleet control plane through a full
//! lifecycle: provision scopes and pools idempotently, wait for runner
//! instances to come up, mutate pool sizing, then tear everything down in
//! dependency order (instances → pools → scopes).

pub mod api;
pub mod cleanup;
pub mod config;
pub mod garm;
pub mod poller;
pub mod profile;
pub mod provision;
pub mod report;
pub mod scenario;
pub mod session;
pub mod teardown;
pub mod test_support;

pub use api::{ControlPlane, ParamsError, PoolRef, RemoteError, ScopeKind, ScopeRef};
pub use cleanup::{Cleanup, CleanupError, CleanupFilter};
pub use config::{ConfigError, E2eConfig};
pub use garm::GarmClient;
pub use poller::{PollError, PollPolicy, Polled, Poller};
pub use profile::{ClientProfile, ProfileError};
pub use provision::{ProvisionError, Provisioned, Provisioner};
pub use scenario::{
    PhaseOrder, Scenario, ScenarioError, ScenarioPlan, ScenarioReport, ScenarioSettings,
    ScenarioVariant,
};
pub use session::{MissingReference, ScopeSession};
pub use teardown::{Teardown, TeardownError, TeardownStage, TeardownSummary, TeardownTarget};
