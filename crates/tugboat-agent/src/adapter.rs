//! The engine adapter boundary.
//!
//! The embedded container engine itself is an external collaborator: the
//! agent's job is to authenticate, route, pool, and time-box calls against
//! this trait, not to talk to a container runtime directly. Wire in a real
//! adapter (Docker, Podman, ...) by implementing [`EngineAdapter`].

use serde_json::Value;
use tugboat_types::{ContainerInspect, CreateContainerBody, ImageInspect, ManifestDescriptor, TugboatError};

/// Everything the agent's HTTP surface needs from the container engine.
pub trait EngineAdapter: Send + Sync {
    fn container_list(&self, all: bool) -> Result<Vec<ContainerInspect>, TugboatError>;
    fn container_exists(&self, container_ref: &str) -> Result<bool, TugboatError>;
    fn container_inspect(&self, container_ref: &str) -> Result<ContainerInspect, TugboatError>;
    fn container_create(&self, body: &CreateContainerBody) -> Result<ContainerInspect, TugboatError>;
    fn container_start(&self, container_ref: &str) -> Result<String, TugboatError>;
    fn container_stop(&self, container_ref: &str) -> Result<String, TugboatError>;
    fn container_restart(&self, container_ref: &str) -> Result<String, TugboatError>;
    fn container_kill(&self, container_ref: &str) -> Result<String, TugboatError>;
    fn container_pause(&self, container_ref: &str) -> Result<String, TugboatError>;
    fn container_unpause(&self, container_ref: &str) -> Result<String, TugboatError>;
    fn container_remove(&self, container_ref: &str) -> Result<String, TugboatError>;
    fn image_list(&self, filters: Option<Value>) -> Result<Vec<ImageInspect>, TugboatError>;
    fn image_inspect(&self, spec_or_id: &str) -> Result<ImageInspect, TugboatError>;
    fn image_pull(&self, image: &str) -> Result<ImageInspect, TugboatError>;
    fn image_tag(&self, spec_or_id: &str, tag: &str) -> Result<(), TugboatError>;
    fn image_prune(&self, all: bool) -> Result<String, TugboatError>;
    fn manifest_inspect(&self, spec_or_digest: &str) -> Result<ManifestDescriptor, TugboatError>;
    fn command_run(&self, argv: &[String]) -> Result<(String, String), TugboatError>;
}

/// An adapter with no engine wired in. Every call fails with `engine_error`,
/// which the HTTP layer maps to 424 exactly like a real engine failure
/// would. Useful for standing up the HTTP surface (routing, signing,
/// timeouts) independent of any particular container runtime.
pub struct UnconfiguredEngine;

impl EngineAdapter for UnconfiguredEngine {
    fn container_list(&self, _all: bool) -> Result<Vec<ContainerInspect>, TugboatError> {
        Err(not_configured())
    }
    fn container_exists(&self, _container_ref: &str) -> Result<bool, TugboatError> {
        Err(not_configured())
    }
    fn container_inspect(&self, _container_ref: &str) -> Result<ContainerInspect, TugboatError> {
        Err(not_configured())
    }
    fn container_create(&self, _body: &CreateContainerBody) -> Result<ContainerInspect, TugboatError> {
        Err(not_configured())
    }
    fn container_start(&self, _container_ref: &str) -> Result<String, TugboatError> {
        Err(not_configured())
    }
    fn container_stop(&self, _container_ref: &str) -> Result<String, TugboatError> {
        Err(not_configured())
    }
    fn container_restart(&self, _container_ref: &str) -> Result<String, TugboatError> {
        Err(not_configured())
    }
    fn container_kill(&self, _container_ref: &str) -> Result<String, TugboatError> {
        Err(not_configured())
    }
    fn container_pause(&self, _container_ref: &str) -> Result<String, TugboatError> {
        Err(not_configured())
    }
    fn container_unpause(&self, _container_ref: &str) -> Result<String, TugboatError> {
        Err(not_configured())
    }
    fn container_remove(&self, _container_ref: &str) -> Result<String, TugboatError> {
        Err(not_configured())
    }
    fn image_list(&self, _filters: Option<Value>) -> Result<Vec<ImageInspect>, TugboatError> {
        Err(not_configured())
    }
    fn image_inspect(&self, _spec_or_id: &str) -> Result<ImageInspect, TugboatError> {
        Err(not_configured())
    }
    fn image_pull(&self, _image: &str) -> Result<ImageInspect, TugboatError> {
        Err(not_configured())
    }
    fn image_tag(&self, _spec_or_id: &str, _tag: &str) -> Result<(), TugboatError> {
        Err(not_configured())
    }
    fn image_prune(&self, _all: bool) -> Result<String, TugboatError> {
        Err(not_configured())
    }
    fn manifest_inspect(&self, _spec_or_digest: &str) -> Result<ManifestDescriptor, TugboatError> {
        Err(not_configured())
    }
    fn command_run(&self, _argv: &[String]) -> Result<(String, String), TugboatError> {
        Err(not_configured())
    }
}

fn not_configured() -> TugboatError {
    TugboatError::new(tugboat_types::ErrorKind::EngineError, "no container engine adapter is configured on this agent")
}
