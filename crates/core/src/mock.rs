//! In-memory `Workloads` for tests and local dry runs.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use crate::{image_reference, HealthStatus, PollError, TargetKey, UpdateError, Workloads};

#[derive(Debug, Clone)]
enum Observed {
    Counts { desired: i32, ready: i32, available: i32, updated: i32 },
    Fail(String),
    Hang,
}

#[derive(Debug, Default)]
struct State {
    observed: HashMap<TargetKey, Observed>,
    apply_failures: HashMap<TargetKey, String>,
    applied: Vec<(TargetKey, String)>,
    polls: HashMap<TargetKey, usize>,
}

/// Scriptable fake cluster. Unknown targets poll as not found.
#[derive(Debug, Default)]
pub struct MemoryWorkloads {
    state: Mutex<State>,
}

impl MemoryWorkloads {
    pub fn new() -> Self { Self::default() }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Report `ready` of `desired` replicas; available and updated follow `ready`.
    pub fn set_replicas(&self, key: &TargetKey, desired: i32, ready: i32) {
        self.set_counts(key, desired, ready, ready, ready);
    }

    pub fn set_counts(&self, key: &TargetKey, desired: i32, ready: i32, available: i32, updated: i32) {
        self.lock().observed.insert(key.clone(), Observed::Counts { desired, ready, available, updated });
    }

    /// Make polls of `key` fail with an api error.
    pub fn fail_poll(&self, key: &TargetKey, message: &str) {
        self.lock().observed.insert(key.clone(), Observed::Fail(message.to_string()));
    }

    /// Make polls of `key` never complete.
    pub fn hang_poll(&self, key: &TargetKey) {
        self.lock().observed.insert(key.clone(), Observed::Hang);
    }

    pub fn fail_apply(&self, key: &TargetKey, message: &str) {
        self.lock().apply_failures.insert(key.clone(), message.to_string());
    }

    /// Successful updates as `(target, image:tag)` in call order.
    pub fn applied(&self) -> Vec<(TargetKey, String)> {
        self.lock().applied.clone()
    }

    pub fn polls(&self, key: &TargetKey) -> usize {
        self.lock().polls.get(key).copied().unwrap_or(0)
    }
}

#[async_trait::async_trait]
impl Workloads for MemoryWorkloads {
    async fn apply_image(&self, target: &TargetKey, image: &str, tag: &str) -> Result<(), UpdateError> {
        let mut state = self.lock();
        if let Some(message) = state.apply_failures.get(target) {
            return Err(UpdateError::Api(message.clone()));
        }
        state.applied.push((target.clone(), image_reference(image, tag)));
        Ok(())
    }

    async fn health(&self, target: &TargetKey) -> Result<HealthStatus, PollError> {
        let observed = {
            let mut state = self.lock();
            *state.polls.entry(target.clone()).or_insert(0) += 1;
            state.observed.get(target).cloned()
        };
        match observed {
            Some(Observed::Counts { desired, ready, available, updated }) => {
                Ok(HealthStatus::new(target.clone(), desired, ready, available, updated))
            }
            Some(Observed::Fail(message)) => Err(PollError::Api(message)),
            Some(Observed::Hang) => std::future::pending().await,
            None => Err(PollError::NotFound(target.to_string())),
        }
    }
}
