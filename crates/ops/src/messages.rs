//! Human-readable notification texts for the deployment path.

use std::time::Duration;

use rollcall_core::{HealthStatus, TargetKey, UpdateError};

pub fn update_applied(target: &TargetKey, image: &str) -> String {
    format!("🚀 Update applied to {}\nImage: {}\nAwaiting rollout…", target, image)
}

pub fn update_failed(target: &TargetKey, image: &str, error: &UpdateError) -> String {
    format!("❌ Update of {} failed\nImage: {}\nError: {}", target, image, error)
}

pub fn rollout_healthy(status: &HealthStatus) -> String {
    format!(
        "✅ {} is healthy\nReplicas: {}/{} ready, {} available, {} updated",
        status.key, status.ready, status.desired, status.available, status.updated
    )
}

pub fn rollout_stalled(target: &TargetKey, waited: Duration) -> String {
    format!("⚠️ {} did not converge within {}s of its update", target, waited.as_secs())
}
