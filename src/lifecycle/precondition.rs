use super::Scope;
use crate::apis::{Action, PreConditionType};
use crate::constant::{cluster_component_name, workload_name};
use crate::crd::{is_cluster_running, is_component_running, is_instances_ready};
use crate::errors::*;
use crate::reader::{self, Reader};
use kube::Resource;
use kube_runtime::wait::Condition;
use log::debug;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;

/// Gates `action` on the readiness its spec asks for.
///
/// With `labels`, every object of the kind carrying them must be ready
/// instead of the single object named after the scope.
pub(crate) async fn check(
    reader: &dyn Reader,
    scope: &Scope,
    spec: &Action,
    action: &str,
    labels: Option<&BTreeMap<String, String>>,
) -> Result<()> {
    let pre_condition = match &spec.pre_condition {
        Some(p) => p,
        None => return Ok(()),
    };
    let labels = labels.filter(|l| !l.is_empty());
    match pre_condition {
        PreConditionType::Immediately => Ok(()),
        PreConditionType::RuntimeReady => {
            let name = workload_name(&scope.cluster_name, &scope.comp_name);
            let cond = is_instances_ready();
            ready(reader, &scope.namespace, &name, labels, "runtime", action, cond).await
        }
        PreConditionType::ComponentReady => {
            let name = cluster_component_name(&scope.cluster_name, &scope.comp_name);
            let cond = is_component_running();
            ready(reader, &scope.namespace, &name, labels, "component", action, cond).await
        }
        PreConditionType::ClusterReady => {
            let name = &scope.cluster_name;
            let cond = is_cluster_running();
            ready(reader, &scope.namespace, name, labels, "cluster", action, cond).await
        }
        PreConditionType::Other(t) => bail!("unknown precondition type {}", t),
    }
}

async fn ready<K, C>(
    reader: &dyn Reader,
    namespace: &str,
    name: &str,
    labels: Option<&BTreeMap<String, String>>,
    kind: &str,
    action: &str,
    condition: C,
) -> Result<()>
where
    K: Resource<DynamicType = ()> + DeserializeOwned + Send,
    C: Condition<K> + Send,
{
    let objs: Vec<K> = match labels {
        None => vec![reader::get(reader, namespace, name)
            .await
            .chain_err(|| format!("precondition check error for {} ready", kind))?],
        Some(labels) => reader::list(reader, namespace, labels)
            .await
            .chain_err(|| format!("precondition check error for {} ready", kind))?,
    };
    if objs.is_empty() {
        bail!(ErrorKind::PreconditionFailed(format!(
            "no {} found, action: {}",
            kind, action
        )));
    }
    if !objs.iter().all(|o| condition.matches_object(Some(o))) {
        bail!(ErrorKind::PreconditionFailed(format!(
            "{} is not ready, action: {}",
            kind, action
        )));
    }
    debug!("{} is ready for action {}", kind, action);
    Ok(())
}
