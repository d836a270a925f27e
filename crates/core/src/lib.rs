//! rollcall core types: deploy targets, replica health and the seams the
//! reconciliation engine talks to.

#![forbid(unsafe_code)]

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub mod mock;
mod pending;
mod registry;

pub use pending::PendingTracker;
pub use registry::{MatchMode, RegistryError, TargetRegistry};

/// A deployable workload: `(namespace, workload name)`.
///
/// Join key between the update path and the poll path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TargetKey {
    pub namespace: String,
    pub workload: String,
}

impl TargetKey {
    pub fn new(namespace: impl Into<String>, workload: impl Into<String>) -> Self {
        Self { namespace: namespace.into(), workload: workload.into() }
    }
}

impl fmt::Display for TargetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.workload)
    }
}

/// One row of the alias table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetSpec {
    pub alias: String,
    pub namespace: String,
    pub workload: String,
}

impl TargetSpec {
    pub fn new(alias: impl Into<String>, namespace: impl Into<String>, workload: impl Into<String>) -> Self {
        Self { alias: alias.into(), namespace: namespace.into(), workload: workload.into() }
    }

    pub fn key(&self) -> TargetKey {
        TargetKey::new(self.namespace.clone(), self.workload.clone())
    }
}

/// Rollout state of a single target as observed by one poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub key: TargetKey,
    pub desired: i32,
    pub ready: i32,
    pub available: i32,
    pub updated: i32,
    pub is_healthy: bool,
}

impl HealthStatus {
    /// Healthy means every desired replica is ready and at least one is desired.
    pub fn new(key: TargetKey, desired: i32, ready: i32, available: i32, updated: i32) -> Self {
        let is_healthy = ready == desired && desired > 0;
        Self { key, desired, ready, available, updated, is_healthy }
    }
}

/// Full image reference submitted to the cluster.
pub fn image_reference(image: &str, tag: &str) -> String {
    format!("{}:{}", image, tag)
}

/// Failure to update a workload's image.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UpdateError {
    #[error("workload not found: {0}")]
    NotFound(String),
    #[error("workload {0} has no containers in its pod template")]
    NoContainers(TargetKey),
    #[error("cluster api: {0}")]
    Api(String),
    #[error("cluster call timed out after {0:?}")]
    Timeout(Duration),
}

/// Failure to read a workload's rollout state.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PollError {
    #[error("workload not found: {0}")]
    NotFound(String),
    #[error("cluster api: {0}")]
    Api(String),
    #[error("cluster call timed out after {0:?}")]
    Timeout(Duration),
}

/// Cluster side of the engine: image updates and rollout reads.
///
/// Implementations do not retry; callers own timeouts and error policy.
#[async_trait::async_trait]
pub trait Workloads: Send + Sync {
    /// Point the primary container of `target` at `image:tag`.
    async fn apply_image(&self, target: &TargetKey, image: &str, tag: &str) -> Result<(), UpdateError>;

    /// Fetch the current replica counts of `target`.
    async fn health(&self, target: &TargetKey) -> Result<HealthStatus, PollError>;
}

pub mod prelude {
    pub use super::{
        image_reference, HealthStatus, MatchMode, PendingTracker, PollError, TargetKey, TargetRegistry, TargetSpec,
        UpdateError, Workloads,
    };
}
