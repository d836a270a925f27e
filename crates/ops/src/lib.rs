//! rollcall ops: the deployment reconciliation engine.
//!
//! Webhooks call [`RelayContext::trigger_update`]; the [`Poller`] watches every
//! registered target and confirms pending rollouts exactly once.

#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Instant;

use metrics::counter;
use rollcall_core::{image_reference, PendingTracker, TargetKey, TargetRegistry, UpdateError, Workloads};
use rollcall_notify::Notifier;
use tracing::{info, warn};

pub mod messages;
mod poller;

pub use poller::{CycleReport, Poller, PollerConfig};

/// Process-wide state shared by the webhook handlers and the poller.
pub struct RelayContext {
    pub registry: TargetRegistry,
    pub tracker: PendingTracker,
    pub workloads: Arc<dyn Workloads>,
    pub notifier: Notifier,
}

/// What happened to a registry push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// No alias matched; nothing was done.
    Unmapped,
    /// Patch submitted and target marked pending.
    Applied { target: TargetKey, image: String },
    Failed { target: TargetKey, image: String, error: UpdateError },
}

impl RelayContext {
    pub fn new(registry: TargetRegistry, workloads: Arc<dyn Workloads>, notifier: Notifier) -> Self {
        Self { registry, tracker: PendingTracker::new(), workloads, notifier }
    }

    /// Resolve `image`, patch the target and mark it pending. The pending
    /// entry exists before this returns, so it precedes the webhook response.
    pub async fn trigger_update(&self, image: &str, tag: &str) -> UpdateOutcome {
        let Some(target) = self.registry.resolve(image) else {
            info!(image = %image, tag = %tag, "no target mapping; ignoring push");
            return UpdateOutcome::Unmapped;
        };
        let reference = image_reference(image, tag);
        let t0 = Instant::now();
        match self.workloads.apply_image(&target, image, tag).await {
            Ok(()) => {
                counter!("rollcall_updates_total", 1u64);
                let fresh = self.tracker.mark_pending(target.clone());
                info!(target = %target, image = %reference, fresh, took_ms = %t0.elapsed().as_millis(), "update applied; awaiting rollout");
                self.notifier.notify(messages::update_applied(&target, &reference));
                UpdateOutcome::Applied { target, image: reference }
            }
            Err(error) => {
                counter!("rollcall_update_failures_total", 1u64);
                warn!(target = %target, image = %reference, error = %error, "update failed");
                self.notifier.notify(messages::update_failed(&target, &reference, &error));
                UpdateOutcome::Failed { target, image: reference, error }
            }
        }
    }
}
