//! rollcall kubehub: kube client wiring plus the `Workloads` implementation
//! backed by `apps/v1` Deployments.

#![forbid(unsafe_code)]

use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::Context;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Container;
use kube::{
    api::{Api, Patch, PatchParams},
    config::{KubeConfigOptions, Kubeconfig},
    Client, Config,
};
use metrics::{counter, histogram};
use rollcall_core::{image_reference, HealthStatus, PollError, TargetKey, UpdateError, Workloads};
use tracing::{debug, info, warn};

/// Build a client from an explicit kubeconfig, or infer one (`$KUBECONFIG` /
/// `~/.kube/config`, then in-cluster). Connect and read timeouts are bounded by `call_timeout`.
pub async fn connect(kubeconfig: Option<&Path>, call_timeout: Duration) -> anyhow::Result<Client> {
    let mut config = match kubeconfig {
        Some(path) => {
            let kc = Kubeconfig::read_from(path).with_context(|| format!("reading kubeconfig at {}", path.display()))?;
            Config::from_custom_kubeconfig(kc, &KubeConfigOptions::default())
                .await
                .with_context(|| format!("loading kubeconfig at {}", path.display()))?
        }
        None => Config::infer().await.context("inferring cluster credentials")?,
    };
    config.connect_timeout = Some(call_timeout);
    config.read_timeout = Some(call_timeout);
    let client = Client::try_from(config).context("building kube client")?;
    Ok(client)
}

/// Log the api server version. Failure is logged only.
pub async fn probe(client: &Client, call_timeout: Duration) {
    match tokio::time::timeout(call_timeout, client.apiserver_version()).await {
        Ok(Ok(info)) => info!(version = %info.git_version, platform = %info.platform, "cluster reachable"),
        Ok(Err(e)) => warn!(error = %e, "cluster version probe failed"),
        Err(_) => warn!(timeout_ms = %call_timeout.as_millis(), "cluster version probe timed out"),
    }
}

/// Deployment-backed workloads. Every cluster call is bounded by `call_timeout`.
#[derive(Clone)]
pub struct KubeWorkloads {
    client: Client,
    call_timeout: Duration,
}

impl KubeWorkloads {
    pub fn new(client: Client, call_timeout: Duration) -> Self {
        Self { client, call_timeout }
    }

    fn api(&self, namespace: &str) -> Api<Deployment> {
        Api::namespaced(self.client.clone(), namespace)
    }

    async fn fetch(&self, target: &TargetKey) -> Result<Result<Deployment, kube::Error>, Duration> {
        let api = self.api(&target.namespace);
        tokio::time::timeout(self.call_timeout, api.get(&target.workload))
            .await
            .map_err(|_| self.call_timeout)
    }
}

#[async_trait::async_trait]
impl Workloads for KubeWorkloads {
    async fn apply_image(&self, target: &TargetKey, image: &str, tag: &str) -> Result<(), UpdateError> {
        let t0 = Instant::now();
        let reference = image_reference(image, tag);
        let deploy = self.fetch(target).await.map_err(UpdateError::Timeout)?.map_err(update_error)?;

        let containers = pod_containers(&deploy);
        let (containers, primary) =
            retarget_containers(containers, &target.workload, &reference).ok_or_else(|| UpdateError::NoContainers(target.clone()))?;

        // Merge patch replaces the list wholesale; every other template field is untouched.
        let patch = serde_json::json!({
            "spec": {"template": {"spec": {"containers": containers}}}
        });
        let api = self.api(&target.namespace);
        let pp = PatchParams::default();
        tokio::time::timeout(self.call_timeout, api.patch(&target.workload, &pp, &Patch::Merge(&patch)))
            .await
            .map_err(|_| UpdateError::Timeout(self.call_timeout))?
            .map_err(update_error)?;

        histogram!("rollcall_update_ms", t0.elapsed().as_secs_f64() * 1000.0);
        info!(target = %target, container = %primary, image = %reference, took_ms = %t0.elapsed().as_millis(), "image patch submitted");
        Ok(())
    }

    async fn health(&self, target: &TargetKey) -> Result<HealthStatus, PollError> {
        let deploy = self.fetch(target).await.map_err(PollError::Timeout)?.map_err(poll_error)?;
        let status = health_of(target, &deploy);
        debug!(target = %target, desired = status.desired, ready = status.ready, "rollout observed");
        Ok(status)
    }
}

fn pod_containers(deploy: &Deployment) -> Vec<Container> {
    deploy
        .spec
        .as_ref()
        .and_then(|s| s.template.spec.as_ref())
        .map(|p| p.containers.clone())
        .unwrap_or_default()
}

/// Point the primary container at `reference`: the container named after the
/// workload, else the first one. Returns the new list and the primary's name,
/// or `None` when there are no containers.
pub fn retarget_containers(mut containers: Vec<Container>, workload: &str, reference: &str) -> Option<(Vec<Container>, String)> {
    let idx = containers
        .iter()
        .position(|c| c.name == workload)
        .or_else(|| (!containers.is_empty()).then_some(0))?;
    let primary = &mut containers[idx];
    primary.image = Some(reference.to_string());
    let name = primary.name.clone();
    Some((containers, name))
}

/// Replica counts of a Deployment. An unset `spec.replicas` means one.
pub fn health_of(target: &TargetKey, deploy: &Deployment) -> HealthStatus {
    let desired = deploy.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);
    let status = deploy.status.as_ref();
    let ready = status.and_then(|s| s.ready_replicas).unwrap_or(0);
    let available = status.and_then(|s| s.available_replicas).unwrap_or(0);
    let updated = status.and_then(|s| s.updated_replicas).unwrap_or(0);
    HealthStatus::new(target.clone(), desired, ready, available, updated)
}

fn update_error(e: kube::Error) -> UpdateError {
    counter!("rollcall_kube_errors_total", 1u64);
    match e {
        kube::Error::Api(ae) if ae.code == 404 => UpdateError::NotFound(ae.message),
        other => UpdateError::Api(other.to_string()),
    }
}

fn poll_error(e: kube::Error) -> PollError {
    counter!("rollcall_kube_errors_total", 1u64);
    match e {
        kube::Error::Api(ae) if ae.code == 404 => PollError::NotFound(ae.message),
        other => PollError::Api(other.to_string()),
    }
}
