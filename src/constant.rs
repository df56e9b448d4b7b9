use std::collections::BTreeMap;

pub const ROLE_LABEL_KEY: &str = "kubeblocks.io/role";
pub const APP_INSTANCE_LABEL_KEY: &str = "app.kubernetes.io/instance";
pub const APP_MANAGED_BY_LABEL_KEY: &str = "app.kubernetes.io/managed-by";
pub const APP_NAME: &str = "kubeblocks";
pub const KB_APP_COMPONENT_LABEL_KEY: &str = "apps.kubeblocks.io/component-name";
pub const KB_APP_SHARDING_NAME_LABEL_KEY: &str = "apps.kubeblocks.io/sharding-name";
pub const KB_LIFECYCLE_ACTION_LABEL_KEY: &str = "apps.kubeblocks.io/lifecycle-action";
pub const COMPONENT_SCALE_IN_ANNOTATION_KEY: &str = "apps.kubeblocks.io/component-scale-in";

// set on every pod by the job controller
pub const JOB_NAME_LABEL_KEY: &str = "job-name";

pub const DEFAULT_CLUSTER_DOMAIN: &str = "cluster.local";

/// Name of the Component object owned by a cluster.
pub fn cluster_component_name(cluster: &str, comp: &str) -> String {
    format!("{}-{}", cluster, comp)
}

/// Name of the InstanceSet running a component's pods.
pub fn workload_name(cluster: &str, comp: &str) -> String {
    format!("{}-{}", cluster, comp)
}

pub fn pod_fqdn(namespace: &str, cluster: &str, comp: &str, pod: &str, domain: &str) -> String {
    format!(
        "{}.{}-headless.{}.svc.{}",
        pod,
        workload_name(cluster, comp),
        namespace,
        domain
    )
}

/// Short component name of a Component object, read from its component label
/// and falling back to stripping the `<cluster>-` prefix.
pub fn short_component_name(
    cluster: &str,
    name: &str,
    labels: &BTreeMap<String, String>,
) -> String {
    if let Some(n) = labels.get(KB_APP_COMPONENT_LABEL_KEY) {
        return n.clone();
    }
    name.strip_prefix(&format!("{}-", cluster))
        .unwrap_or(name)
        .to_string()
}

/// Renders labels as a `k=v,k=v` selector, the format `ListParams::labels` expects.
pub fn label_selector(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}

pub fn sharding_labels(cluster: &str, sharding: &str) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(APP_INSTANCE_LABEL_KEY.to_string(), cluster.to_string());
    labels.insert(KB_APP_SHARDING_NAME_LABEL_KEY.to_string(), sharding.to_string());
    labels
}
