use crate::apis::{Action, TargetPodSelector};
use crate::constant::ROLE_LABEL_KEY;
use crate::errors::*;
use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use rand::Rng;

/// Picks the pods an action runs on.
///
/// Without a selector the primary `pod` is the only target. The selector on
/// the action wins over the one nested in its exec block.
pub fn select_target_pods<'a>(
    pods: &'a [Pod],
    pod: &'a Pod,
    spec: &Action,
) -> Result<Vec<&'a Pod>> {
    let (selector, matching_key) = match (&spec.target_pod_selector, &spec.exec) {
        (Some(selector), _) => (Some(selector), spec.matching_key.as_deref()),
        (None, Some(exec)) => (exec.target_pod_selector.as_ref(), exec.matching_key.as_deref()),
        (None, None) => (None, None),
    };

    match selector {
        None => Ok(vec![pod]),
        Some(TargetPodSelector::AnyReplica) => {
            if pods.is_empty() {
                return Ok(vec![]);
            }
            let i = rand::thread_rng().gen_range(0..pods.len());
            Ok(vec![&pods[i]])
        }
        Some(TargetPodSelector::AllReplicas) => Ok(pods.iter().collect()),
        Some(TargetPodSelector::RoleSelector) => {
            let role = matching_key.unwrap_or_default();
            Ok(pods
                .iter()
                .filter(|p| p.labels().get(ROLE_LABEL_KEY).map(String::as_str) == Some(role))
                .collect())
        }
        Some(TargetPodSelector::OrdinalSelector) => bail!("ordinal selector is not supported"),
        Some(TargetPodSelector::Other(s)) => bail!("unknown pod selector: {}", s),
    }
}
