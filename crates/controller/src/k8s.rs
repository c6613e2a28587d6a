//! Kubernetes-backed profile and workload stores
//!
//! The `ResourceOptimizerProfile` custom resource is validated here, at the
//! store boundary, before the engine ever sees it.

use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::PodTemplateSpec;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::{Client, CustomResource, ResourceExt};
use optimizer_lib::sources::{async_trait, ProfileStore, WorkloadStore};
use optimizer_lib::{
    parse_duration, ContainerResources, CpuQuantity, LabelSelector, Profile, ProfileKey,
    ProfileSpec, ProfileStatus, ScalableWorkload, SourceError, Thresholds, ValidationError,
    WorkloadKind,
};
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Field manager recorded on every patch
pub const FIELD_MANAGER: &str = "k20s-controller";

#[derive(CustomResource, Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "optimizer.example.com",
    version = "v1",
    kind = "ResourceOptimizerProfile",
    namespaced,
    status = "ResourceOptimizerProfileStatus",
    shortname = "rop",
    printcolumn = r#"{"name":"Policy","type":"string","jsonPath":".spec.optimizationPolicy"}"#,
    printcolumn = r#"{"name":"CPU","type":"string","jsonPath":".status.observedMetrics.cpu_usage"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ResourceOptimizerProfileSpec {
    #[serde(default)]
    pub selector: SelectorSpec,
    pub cpu_thresholds: ThresholdSpec,
    /// One of `Scale`, `Resize`, `Recommend`
    pub optimization_policy: String,
    /// Go-style duration such as `5m` or `90s`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cooldown_period: Option<String>,
    #[serde(default, rename = "minCPU", skip_serializing_if = "Option::is_none")]
    pub min_cpu: Option<String>,
    #[serde(default, rename = "maxCPU", skip_serializing_if = "Option::is_none")]
    pub max_cpu: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SelectorSpec {
    #[serde(default)]
    pub match_labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ThresholdSpec {
    pub min: i32,
    pub max: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceOptimizerProfileStatus {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub observed_metrics: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_action: Option<LastActionStatus>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recommendations: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct LastActionStatus {
    #[serde(rename = "type")]
    pub action_type: String,
    /// RFC3339 timestamp
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub details: String,
}

impl TryFrom<&ResourceOptimizerProfileSpec> for ProfileSpec {
    type Error = ValidationError;

    fn try_from(crd: &ResourceOptimizerProfileSpec) -> Result<Self, Self::Error> {
        let thresholds = Thresholds::new(crd.cpu_thresholds.min, crd.cpu_thresholds.max);
        let mut spec = ProfileSpec::new(
            LabelSelector::from_labels(crd.selector.match_labels.clone()),
            thresholds,
            crd.optimization_policy.parse()?,
        );
        spec.cooldown_period = crd.cooldown_period.as_deref().map(parse_duration).transpose()?;
        spec.min_cpu = crd.min_cpu.as_deref().map(str::parse::<CpuQuantity>).transpose()?;
        spec.max_cpu = crd.max_cpu.as_deref().map(str::parse::<CpuQuantity>).transpose()?;
        spec.validate()?;
        Ok(spec)
    }
}

/// Re-encode between the CRD and engine status types, which share field names
fn convert<T: Serialize, U: DeserializeOwned>(value: &T) -> Result<U, SourceError> {
    serde_json::to_value(value)
        .and_then(serde_json::from_value)
        .map_err(|e| SourceError::Decode(e.to_string()))
}

/// Validate a watched object and turn it into an engine profile
pub fn to_profile(obj: &ResourceOptimizerProfile) -> Result<Profile, SourceError> {
    let namespace = obj.namespace().ok_or_else(|| {
        SourceError::Rejected(format!("profile {} has no namespace", obj.name_any()))
    })?;
    let key = ProfileKey::new(namespace, obj.name_any());

    let spec = ProfileSpec::try_from(&obj.spec)
        .map_err(|e| SourceError::Rejected(format!("invalid profile {}: {}", key, e)))?;
    let status = match &obj.status {
        Some(status) => convert::<_, ProfileStatus>(status)?,
        None => ProfileStatus::default(),
    };

    Ok(Profile {
        key,
        spec,
        status,
        resource_version: obj.resource_version(),
    })
}

/// Map API failures onto the engine's collaborator errors
pub fn source_error(err: kube::Error) -> SourceError {
    match err {
        kube::Error::Api(resp) => match resp.code {
            404 => SourceError::NotFound(resp.message),
            409 => SourceError::Conflict(resp.message),
            400 | 403 | 422 => SourceError::Rejected(resp.message),
            _ => SourceError::Transport(format!("{} ({})", resp.message, resp.code)),
        },
        kube::Error::SerdeError(e) => SourceError::Decode(e.to_string()),
        other => SourceError::Transport(other.to_string()),
    }
}

/// Profile store over the custom resource and its status subresource
#[derive(Clone)]
pub struct KubeProfileStore {
    client: Client,
}

impl KubeProfileStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<ResourceOptimizerProfile> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl ProfileStore for KubeProfileStore {
    async fn get(&self, key: &ProfileKey) -> Result<Profile, SourceError> {
        let obj = self
            .api(&key.namespace)
            .get_opt(&key.name)
            .await
            .map_err(source_error)?
            .ok_or_else(|| SourceError::NotFound(format!("profile {}", key)))?;
        to_profile(&obj)
    }

    async fn write_status(
        &self,
        profile: &Profile,
        status: &ProfileStatus,
    ) -> Result<(), SourceError> {
        // Every field is spelled out so emptied lists and maps are cleared by
        // the merge patch; resourceVersion makes the API server reject the
        // write if the profile changed since it was read.
        let patch = json!({
            "metadata": { "resourceVersion": profile.resource_version },
            "status": {
                "observedMetrics": status.observed_metrics,
                "lastAction": status.last_action,
                "recommendations": status.recommendations,
            }
        });
        let params = PatchParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..PatchParams::default()
        };

        self.api(&profile.key.namespace)
            .patch_status(&profile.key.name, &params, &Patch::Merge(&patch))
            .await
            .map_err(source_error)?;
        debug!(profile = %profile.key, "Wrote profile status");
        Ok(())
    }
}

fn container_resources(template: &PodTemplateSpec, workload: &str) -> Vec<ContainerResources> {
    let Some(pod) = &template.spec else {
        return Vec::new();
    };
    pod.containers
        .iter()
        .map(|container| {
            let raw = container
                .resources
                .as_ref()
                .and_then(|r| r.requests.as_ref())
                .and_then(|requests| requests.get("cpu"));
            match raw.map(|q| (q, q.0.parse::<CpuQuantity>())) {
                None => ContainerResources::new(container.name.clone(), None),
                Some((_, Ok(quantity))) => {
                    ContainerResources::new(container.name.clone(), Some(quantity))
                }
                Some((q, Err(e))) => {
                    warn!(
                        workload = %workload,
                        container = %container.name,
                        quantity = %q.0,
                        error = %e,
                        "Unparseable cpu request, resizes will skip this workload"
                    );
                    ContainerResources::unparsed(container.name.clone(), q.0.clone())
                }
            }
        })
        .collect()
}

fn snapshot(
    kind: WorkloadKind,
    metadata: &ObjectMeta,
    replicas: Option<i32>,
    template: Option<&PodTemplateSpec>,
) -> ScalableWorkload {
    let name = metadata.name.clone().unwrap_or_default();
    ScalableWorkload {
        kind,
        namespace: metadata.namespace.clone().unwrap_or_default(),
        labels: metadata.labels.clone().unwrap_or_default(),
        replicas,
        containers: template.map(|t| container_resources(t, &name)).unwrap_or_default(),
        name,
    }
}

pub fn deployment_snapshot(deployment: &Deployment) -> ScalableWorkload {
    let spec = deployment.spec.as_ref();
    snapshot(
        WorkloadKind::Deployment,
        &deployment.metadata,
        spec.and_then(|s| s.replicas),
        spec.map(|s| &s.template),
    )
}

pub fn statefulset_snapshot(statefulset: &StatefulSet) -> ScalableWorkload {
    let spec = statefulset.spec.as_ref();
    snapshot(
        WorkloadKind::StatefulSet,
        &statefulset.metadata,
        spec.and_then(|s| s.replicas),
        spec.map(|s| &s.template),
    )
}

/// Strategic-merge patch setting one container's cpu request, keyed by container name
pub fn cpu_request_patch(container: &str, quantity: CpuQuantity) -> serde_json::Value {
    json!({
        "spec": {
            "template": {
                "spec": {
                    "containers": [{
                        "name": container,
                        "resources": { "requests": { "cpu": quantity.to_string() } }
                    }]
                }
            }
        }
    })
}

/// Workload store over Deployments and StatefulSets
#[derive(Clone)]
pub struct KubeWorkloadStore {
    client: Client,
}

impl KubeWorkloadStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn patch(
        &self,
        workload: &ScalableWorkload,
        patch: Patch<serde_json::Value>,
    ) -> Result<(), SourceError> {
        let params = PatchParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..PatchParams::default()
        };
        let client = self.client.clone();
        let namespace = workload.namespace.as_str();
        match workload.kind {
            WorkloadKind::Deployment => {
                let api: Api<Deployment> = Api::namespaced(client, namespace);
                api.patch(&workload.name, &params, &patch).await.map_err(source_error)?;
            }
            WorkloadKind::StatefulSet => {
                let api: Api<StatefulSet> = Api::namespaced(client, namespace);
                api.patch(&workload.name, &params, &patch).await.map_err(source_error)?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl WorkloadStore for KubeWorkloadStore {
    async fn list_scalable(
        &self,
        namespace: &str,
        selector: &LabelSelector,
    ) -> Result<Vec<ScalableWorkload>, SourceError> {
        let params = ListParams::default().labels(&selector.to_query());

        let deployments: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        let statefulsets: Api<StatefulSet> = Api::namespaced(self.client.clone(), namespace);

        let mut workloads: Vec<ScalableWorkload> = deployments
            .list(&params)
            .await
            .map_err(source_error)?
            .iter()
            .map(deployment_snapshot)
            .collect();
        workloads.extend(
            statefulsets
                .list(&params)
                .await
                .map_err(source_error)?
                .iter()
                .map(statefulset_snapshot),
        );

        debug!(
            namespace = %namespace,
            selector = %selector.to_query(),
            count = workloads.len(),
            "Listed workloads"
        );
        Ok(workloads)
    }

    async fn apply_replica_change(
        &self,
        workload: &ScalableWorkload,
        replicas: i32,
    ) -> Result<(), SourceError> {
        self.patch(workload, Patch::Merge(json!({ "spec": { "replicas": replicas } })))
            .await
    }

    async fn apply_quantity_change(
        &self,
        workload: &ScalableWorkload,
        container_index: usize,
        quantity: CpuQuantity,
    ) -> Result<(), SourceError> {
        let container = workload.containers.get(container_index).ok_or_else(|| {
            SourceError::Rejected(format!(
                "{} has no container at index {}",
                workload.reference(),
                container_index
            ))
        })?;
        self.patch(workload, Patch::Strategic(cpu_request_patch(&container.name, quantity)))
            .await
    }
}
