use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::{ContainerInspect, ImageInspect};

/// What the engine intends to do with a container this run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Check for a newer image but never recreate.
    Check,
    /// Check for a newer image and recreate if one is found.
    Update,
}

/// Outcome recorded on a group item once its apply-phase attempt concludes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemResult {
    /// The container was recreated with the newer image and passed its health wait.
    Updated,
    /// The update failed health and the container was restored to the prior image.
    RolledBack,
    /// Both the update and the rollback failed; the container is left stopped.
    Failed,
}

/// The body passed to `container.create` after config merge (§4.7.3).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CreateContainerBody {
    /// Image reference to create from.
    pub image: String,
    /// Environment entries surviving subtraction against the image defaults.
    #[serde(default)]
    pub env: Vec<String>,
    /// Labels surviving subtraction and key-format filtering.
    #[serde(default)]
    pub labels: HashMap<String, String>,
    /// Entrypoint override, omitted when the image already supplies one.
    pub entrypoint: Option<Vec<String>>,
    /// Command override, omitted when the image already supplies one.
    pub command: Option<Vec<String>>,
    /// Working directory override, omitted when the image already supplies one.
    pub workdir: Option<String>,
}

/// One container within a [`Group`], with scratch fields populated as the
/// run progresses through check, pull, stop, and apply phases.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupItem {
    /// The container as last inspected.
    pub container: ContainerInspect,
    /// What to do with this container this run; `None` means "not participating".
    pub action: Option<Action>,
    /// Whether the protection label forces this item out of every phase.
    #[serde(default)]
    pub protected: bool,
    /// Whether a newer image was found for this container's spec.
    #[serde(default)]
    pub available: bool,
    /// Set during the decide step (§4.7.2 step 2): available, actionable,
    /// unprotected, and currently running.
    #[serde(default)]
    pub will_update: bool,
    /// The image spec the container was created from, e.g. `app:latest`.
    pub image_spec: Option<String>,
    /// Merged recreate body, computed during the stop phase.
    pub config: Option<CreateContainerBody>,
    /// The container's full pre-merge config, captured alongside `config`
    /// in the stop phase. Rollback recreates with this, not `config`.
    pub original_config: Option<CreateContainerBody>,
    /// Post-create shell commands (e.g. network alias connects).
    #[serde(default)]
    pub commands: Vec<Vec<String>>,
    /// The image backing the container before this run touched it.
    pub old_image: Option<ImageInspect>,
    /// The image the container was (attempted to be) recreated with.
    pub new_image: Option<ImageInspect>,
    /// Final outcome of this item's apply-phase attempt, if any.
    pub temp_result: Option<ItemResult>,
}

impl GroupItem {
    /// A fresh item with no scratch state populated yet.
    pub fn new(container: ContainerInspect, action: Option<Action>, protected: bool) -> Self {
        Self {
            image_spec: container.config.image.clone(),
            container,
            action,
            protected,
            available: false,
            will_update: false,
            config: None,
            original_config: None,
            commands: Vec::new(),
            old_image: None,
            new_image: None,
            temp_result: None,
        }
    }

    /// Service name for dependency-ordering purposes: the compose service
    /// label, falling back to the container name.
    pub fn service_name(&self) -> String {
        self.container
            .config
            .labels
            .get(crate::LABEL_COMPOSE_SERVICE)
            .cloned()
            .unwrap_or_else(|| self.container.name.clone().unwrap_or_default())
    }

    /// Dependency service names from the `depends_on` label. Only the first
    /// colon-delimited segment of each comma-separated entry is a service name.
    pub fn dependencies(&self) -> Vec<String> {
        let label = self
            .container
            .config
            .labels
            .get(crate::LABEL_COMPOSE_DEPENDS_ON)
            .map(String::as_str)
            .unwrap_or("");

        if label.is_empty() {
            return Vec::new();
        }

        label
            .split(',')
            .filter_map(|dep| dep.split(':').next())
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect()
    }
}

/// A dependency-ordered set of containers processed as a unit. The list is
/// ordered first-most-depended-upon to last-most-dependent: stop iterates
/// it in reverse, apply iterates it forward.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Group {
    /// Group key: compose project+config-files, the container's own name
    /// for standalone containers, or the reserved name `self_container`.
    pub name: String,
    /// Whether this is the reserved group holding the controller's own container.
    pub is_self: bool,
    /// Dependency-ordered items.
    pub items: Vec<GroupItem>,
}

impl Group {
    /// Whether any item in this group is marked `will_update`.
    pub fn has_updates(&self) -> bool {
        self.items.iter().any(|item| item.will_update)
    }
}
