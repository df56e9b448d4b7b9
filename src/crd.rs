use kube_derive::CustomResource;
use kube_runtime::wait::Condition;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, PartialEq, Default)]
#[kube(
    group = "apps.kubeblocks.io",
    version = "v1",
    kind = "Cluster",
    status = "ClusterStatus",
    shortname = "cl",
    schema = "disabled",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_def: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topology: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClusterPhase {
    Creating,
    Running,
    Updating,
    Stopping,
    Stopped,
    Deleting,
    Failed,
    Abnormal,
    #[serde(other)]
    Unknown,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<ClusterPhase>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, PartialEq, Default)]
#[kube(
    group = "apps.kubeblocks.io",
    version = "v1",
    kind = "Component",
    status = "ComponentStatus",
    shortname = "cmp",
    schema = "disabled",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct ComponentSpec {
    #[serde(default)]
    pub comp_def: String,
    #[serde(default)]
    pub replicas: i32,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ComponentPhase {
    Creating,
    Running,
    Updating,
    Starting,
    Stopping,
    Stopped,
    Deleting,
    Failed,
    Abnormal,
    #[serde(other)]
    Unknown,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ComponentStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<ComponentPhase>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, PartialEq, Default)]
#[kube(
    group = "workloads.kubeblocks.io",
    version = "v1",
    kind = "InstanceSet",
    status = "InstanceSetStatus",
    shortname = "its",
    schema = "disabled",
    scale = r#"{"specReplicasPath":".spec.replicas", "statusReplicasPath":".status.replicas"}"#,
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct InstanceSetSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
}

pub const INSTANCE_READY_CONDITION: &str = "InstanceReady";

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InstanceSetCondition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InstanceSetStatus {
    #[serde(default)]
    pub observed_generation: i64,
    #[serde(default)]
    pub replicas: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ready_replicas: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub available_replicas: Option<i32>,
    #[serde(default)]
    pub conditions: Vec<InstanceSetCondition>,
}

impl InstanceSet {
    // instances are ready once the latest generation is observed and the
    // controller reports the InstanceReady condition.
    pub fn is_instances_ready(&self) -> bool {
        let status = match &self.status {
            Some(s) => s,
            None => return false,
        };
        if Some(status.observed_generation) != self.metadata.generation {
            return false;
        }
        status
            .conditions
            .iter()
            .any(|c| c.type_ == INSTANCE_READY_CONDITION && c.status == "True")
    }
}

pub fn is_cluster_running() -> impl Condition<Cluster> {
    |obj: Option<&Cluster>| {
        obj.and_then(|c| c.status.as_ref())
            .and_then(|s| s.phase)
            .map_or(false, |p| p == ClusterPhase::Running)
    }
}

pub fn is_component_running() -> impl Condition<Component> {
    |obj: Option<&Component>| {
        obj.and_then(|c| c.status.as_ref())
            .and_then(|s| s.phase)
            .map_or(false, |p| p == ComponentPhase::Running)
    }
}

pub fn is_instances_ready() -> impl Condition<InstanceSet> {
    |obj: Option<&InstanceSet>| obj.map_or(false, InstanceSet::is_instances_ready)
}
