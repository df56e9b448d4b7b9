use k8s_openapi::api::core::v1::EnvVar;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Readiness gate evaluated before an action is dispatched.
///
/// Values outside the known set are kept verbatim so that the checker can
/// reject them instead of failing to load the action definitions.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(from = "String", into = "String")]
pub enum PreConditionType {
    Immediately,
    RuntimeReady,
    ComponentReady,
    ClusterReady,
    Other(String),
}

impl From<String> for PreConditionType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "Immediately" => PreConditionType::Immediately,
            "RuntimeReady" => PreConditionType::RuntimeReady,
            "ComponentReady" => PreConditionType::ComponentReady,
            "ClusterReady" => PreConditionType::ClusterReady,
            _ => PreConditionType::Other(s),
        }
    }
}

impl From<PreConditionType> for String {
    fn from(p: PreConditionType) -> Self {
        p.to_string()
    }
}

impl fmt::Display for PreConditionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PreConditionType::Immediately => f.write_str("Immediately"),
            PreConditionType::RuntimeReady => f.write_str("RuntimeReady"),
            PreConditionType::ComponentReady => f.write_str("ComponentReady"),
            PreConditionType::ClusterReady => f.write_str("ClusterReady"),
            PreConditionType::Other(s) => f.write_str(s),
        }
    }
}

/// Policy choosing which pods of a component receive an action.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(from = "String", into = "String")]
pub enum TargetPodSelector {
    AnyReplica,
    AllReplicas,
    RoleSelector,
    OrdinalSelector,
    Other(String),
}

impl From<String> for TargetPodSelector {
    fn from(s: String) -> Self {
        match s.as_str() {
            "Any" => TargetPodSelector::AnyReplica,
            "All" => TargetPodSelector::AllReplicas,
            "Role" => TargetPodSelector::RoleSelector,
            "Ordinal" => TargetPodSelector::OrdinalSelector,
            _ => TargetPodSelector::Other(s),
        }
    }
}

impl From<TargetPodSelector> for String {
    fn from(s: TargetPodSelector) -> Self {
        s.to_string()
    }
}

impl fmt::Display for TargetPodSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetPodSelector::AnyReplica => f.write_str("Any"),
            TargetPodSelector::AllReplicas => f.write_str("All"),
            TargetPodSelector::RoleSelector => f.write_str("Role"),
            TargetPodSelector::OrdinalSelector => f.write_str("Ordinal"),
            TargetPodSelector::Other(s) => f.write_str(s),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    #[serde(default)]
    pub max_retries: i32,
    /// seconds between two attempts
    #[serde(default)]
    pub retry_interval: i32,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ExecAction {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    // Deprecated: superseded by Action.targetPodSelector.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_pod_selector: Option<TargetPodSelector>,
    // Deprecated: superseded by Action.matchingKey.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matching_key: Option<String>,
    /// container whose image is borrowed when no image is given
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Action {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exec: Option<ExecAction>,
    #[serde(default)]
    pub timeout_seconds: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_policy: Option<RetryPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_condition: Option<PreConditionType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_pod_selector: Option<TargetPodSelector>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matching_key: Option<String>,
}

impl Action {
    pub fn defined(&self) -> bool {
        self.exec.is_some()
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Probe {
    #[serde(flatten)]
    pub action: Action,
    #[serde(default)]
    pub initial_delay_seconds: i32,
    #[serde(default)]
    pub period_seconds: i32,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ComponentLifecycleActions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_provision: Option<Action>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_terminate: Option<Action>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role_probe: Option<Probe>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub switchover: Option<Action>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub member_join: Option<Action>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub member_leave: Option<Action>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dump: Option<Action>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_load: Option<Action>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reconfigure: Option<Action>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_provision: Option<Action>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ShardingLifecycleActions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_provision: Option<Action>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_terminate: Option<Action>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shard_add: Option<Action>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shard_remove: Option<Action>,
}
