use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// State machine shared by group, host, and all-hosts runs.
///
/// `idle` is represented by the progress cache entry being absent rather
/// than an explicit variant (§4.6: "readers treat a missing entry as no
/// active run").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Containers/policy are being loaded, groups are being built.
    Preparing,
    /// Availability checks are running.
    Checking,
    /// At least one group/container is being recreated.
    Updating,
    /// Pruning images (host-scoped only, after all groups finish).
    Pruning,
    /// Finished without a fatal error.
    Done,
    /// Finished with a fatal error; no further progress will be written.
    Error,
}

/// Per-container/per-spec availability outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckResult {
    /// No newer image, or the image spec/platform is unknown.
    NotAvailable,
    /// A newer image exists and has not been reported before.
    Available,
    /// A newer image exists but was already reported in a prior run.
    AvailableNotified,
}

/// A container's name and image spec, carried alongside the aggregate
/// counters so the notifier can name names instead of just counting.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContainerOutcome {
    pub name: String,
    pub spec: String,
}

/// Progress record for one group, keyed by `host_key:group_name`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GroupProgress {
    /// Current phase of the group's run.
    pub status: Option<RunStatus>,
    /// Containers found to have a newer image this run.
    pub available: u32,
    /// Containers successfully recreated this run.
    pub updated: u32,
    /// Containers rolled back after a failed update.
    pub rolled_back: u32,
    /// Containers whose rollback also failed.
    pub failed: u32,
    /// Name+spec of each container counted in `available`.
    #[serde(default)]
    pub available_items: Vec<ContainerOutcome>,
    /// Name+spec of each container counted in `updated`.
    #[serde(default)]
    pub updated_items: Vec<ContainerOutcome>,
    /// Name+spec of each container counted in `rolled_back`.
    #[serde(default)]
    pub rolled_back_items: Vec<ContainerOutcome>,
    /// Name+spec of each container counted in `failed`.
    #[serde(default)]
    pub failed_items: Vec<ContainerOutcome>,
}

/// Progress record for one host, keyed by `host_id:host_name`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostProgress {
    /// Current phase of the host's run.
    pub status: Option<RunStatus>,
    /// Containers found to have a newer image this run.
    pub available: u32,
    /// Containers successfully recreated this run.
    pub updated: u32,
    /// Containers rolled back after a failed update.
    pub rolled_back: u32,
    /// Containers whose rollback also failed.
    pub failed: u32,
    /// Name+spec of each container counted in `available`, across all groups.
    #[serde(default)]
    pub available_items: Vec<ContainerOutcome>,
    /// Name+spec of each container counted in `updated`, across all groups.
    #[serde(default)]
    pub updated_items: Vec<ContainerOutcome>,
    /// Name+spec of each container counted in `rolled_back`, across all groups.
    #[serde(default)]
    pub rolled_back_items: Vec<ContainerOutcome>,
    /// Name+spec of each container counted in `failed`, across all groups.
    #[serde(default)]
    pub failed_items: Vec<ContainerOutcome>,
    /// Per-group results once each group finishes, keyed by group name.
    pub groups: HashMap<String, GroupProgress>,
}

/// Progress record for a global fan-out run, keyed by the fixed all-hosts
/// cache key.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AllProgress {
    /// Current phase of the fan-out.
    pub status: Option<RunStatus>,
    /// Per-host results once each host finishes; `None` marks a host whose
    /// run itself failed (its own progress carries the detail).
    pub hosts: HashMap<String, Option<HostProgress>>,
}
