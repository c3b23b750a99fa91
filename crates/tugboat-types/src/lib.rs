//! Domain types for the tugboat fleet controller: hosts, container/image
//! inspect results, manifests, dependency groups, and run-scoped progress
//! records.

mod error;
mod group;
mod host;
mod inspect;
mod manifest;
mod progress;

pub use error::{ErrorKind, TugboatError};
pub use group::{Action, CreateContainerBody, Group, GroupItem, ItemResult};
pub use host::{ContainerPolicyRow, Host};
pub use inspect::{ContainerConfig, ContainerInspect, ContainerState, HealthState, ImageConfig, ImageInspect};
pub use manifest::{ManifestDescriptor, Platform, PlatformManifest};
pub use progress::{AllProgress, CheckResult, ContainerOutcome, GroupProgress, HostProgress, RunStatus};

/// Label marking a container as ineligible for any automated lifecycle
/// change. Exposed as a constant rather than hard-coded in call sites per
/// spec.md's open question on the exact key being a configuration matter.
pub const PROTECTED_LABEL: &str = "tugtainer.protected";

/// Compose label carrying the project name.
pub const LABEL_COMPOSE_PROJECT: &str = "com.docker.compose.project";
/// Compose label carrying the project's config file list.
pub const LABEL_COMPOSE_CONFIG_FILES: &str = "com.docker.compose.project.config_files";
/// Compose label carrying the service name within a project.
pub const LABEL_COMPOSE_SERVICE: &str = "com.docker.compose.service";
/// Compose label carrying comma-separated `service:condition` dependency entries.
pub const LABEL_COMPOSE_DEPENDS_ON: &str = "com.docker.compose.depends_on";
