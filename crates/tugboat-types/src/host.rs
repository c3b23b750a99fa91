use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A container-engine host the controller can reach through an agent.
///
/// A Host Client (see `tugboat-core::host_client`) is registered for a host
/// iff `enabled` is true; the Host Registry removes and re-creates the
/// client on every transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Host {
    /// Stable identity.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Whether this host participates in check/update runs at all.
    pub enabled: bool,
    /// Base URL of the agent, e.g. `https://10.0.0.4:9443`.
    pub url: String,
    /// Shared secret for request signing. `None` disables signing for this host.
    pub secret: Option<String>,
    /// Per-call timeout for Host Client operations.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Deadline for the health-wait loop after a recreate. Falls back to a
    /// controller-wide default when unset.
    #[serde(with = "humantime_serde")]
    pub container_hc_timeout: Duration,
    /// Whether to prune dangling images after a host run completes.
    pub prune: bool,
    /// Whether `prune` should remove all unused images, not just dangling ones.
    pub prune_all: bool,
}

/// Persisted per-container policy row, uniquely keyed by `(host_id, name)`.
///
/// Rows are created lazily on first policy write; the engine never creates
/// rows on its own, only updates existing ones via the Store Adapter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContainerPolicyRow {
    /// Owning host.
    pub host_id: String,
    /// Container name, unique within the host.
    pub name: String,
    /// Gates participation in check/update runs at all.
    pub check_enabled: bool,
    /// Permits the engine to actually recreate the container, not just check it.
    pub update_enabled: bool,
    /// Whether the last check found a newer image.
    pub update_available: bool,
    /// Last observed local image id.
    pub image_id: Option<String>,
    /// Platform-specific digest set last verified against the local image.
    pub local_digests: Vec<String>,
    /// Digest set from the last notified availability; suppresses duplicate
    /// notifications for the same remote image.
    pub remote_digests: Vec<String>,
    /// When this row was last checked.
    pub checked_at: Option<DateTime<Utc>>,
    /// When this row was last successfully updated.
    pub updated_at: Option<DateTime<Utc>>,
    /// Row creation time.
    pub created_at: DateTime<Utc>,
    /// Last modification time, regardless of field.
    pub modified_at: DateTime<Utc>,
}

impl ContainerPolicyRow {
    /// A fresh row for a container the store has never seen, with policy
    /// gates left closed until an operator opts the container in.
    pub fn new(host_id: impl Into<String>, name: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            host_id: host_id.into(),
            name: name.into(),
            check_enabled: false,
            update_enabled: false,
            update_available: false,
            image_id: None,
            local_digests: Vec::new(),
            remote_digests: Vec::new(),
            checked_at: None,
            updated_at: None,
            created_at: now,
            modified_at: now,
        }
    }
}
