use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Authoritative container view reported by an agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContainerInspect {
    /// Engine-assigned container id.
    pub id: String,
    /// Container name.
    pub name: Option<String>,
    /// Image id currently backing this container.
    pub image: Option<String>,
    /// Creation-time configuration, including labels and the requested image spec.
    pub config: ContainerConfig,
    /// Current runtime state.
    pub state: ContainerState,
}

/// Fields of a container's creation config relevant to grouping and config merge.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContainerConfig {
    /// Image reference as requested at creation time, e.g. `app:latest`.
    pub image: Option<String>,
    /// Labels attached at creation time.
    #[serde(default)]
    pub labels: HashMap<String, String>,
    /// `KEY=VALUE` environment entries.
    #[serde(default)]
    pub env: Vec<String>,
    /// Entrypoint override, if any.
    pub entrypoint: Option<Vec<String>>,
    /// Command override, if any.
    pub cmd: Option<Vec<String>>,
    /// Working directory override, if any.
    pub working_dir: Option<String>,
}

/// Current runtime state of a container.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContainerState {
    /// Engine status string, e.g. `running`, `exited`, `created`.
    pub status: String,
    /// Healthcheck state, absent when the container has no healthcheck defined.
    pub health: Option<HealthState>,
}

impl ContainerState {
    /// Whether this container is currently running.
    pub fn is_running(&self) -> bool {
        self.status == "running"
    }
}

/// Healthcheck status as reported by the engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HealthState {
    /// One of `starting`, `healthy`, `unhealthy`, `unknown`.
    pub status: String,
}

/// Authoritative image view reported by an agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImageInspect {
    /// Engine-assigned image id.
    pub id: String,
    /// Repository digest references, e.g. `app@sha256:...`.
    #[serde(default)]
    pub repo_digests: Vec<String>,
    /// Target architecture, e.g. `amd64`. Absent when unknown.
    pub architecture: Option<String>,
    /// Target OS, e.g. `linux`. Absent when unknown.
    pub os: Option<String>,
    /// The image's own default configuration, used for config merge.
    #[serde(default)]
    pub config: ImageConfig,
}

/// The defaults an image supplies, used to subtract redundant fields from a
/// container's recreate body.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImageConfig {
    /// Image-default entrypoint.
    pub entrypoint: Option<Vec<String>>,
    /// Image-default command.
    pub cmd: Option<Vec<String>>,
    /// Image-default working directory.
    pub working_dir: Option<String>,
    /// Image-default environment entries.
    #[serde(default)]
    pub env: Vec<String>,
    /// Image-default labels.
    #[serde(default)]
    pub labels: HashMap<String, String>,
}
