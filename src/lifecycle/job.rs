//! Runs an action as a one-shot Kubernetes Job, for pods without an agent.

use super::{Executor, LifecycleAction, Target};
use crate::apis::{Action, ExecAction};
use crate::config::JobConfig;
use crate::constant::{
    APP_INSTANCE_LABEL_KEY, APP_MANAGED_BY_LABEL_KEY, APP_NAME, JOB_NAME_LABEL_KEY,
    KB_APP_COMPONENT_LABEL_KEY, KB_LIFECYCLE_ACTION_LABEL_KEY,
};
use crate::errors::*;
use crate::proto::ActionRequest;
use async_trait::async_trait;
use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{Container, EnvVar, Pod, PodSpec, PodTemplateSpec};
use kube::api::{Api, DeleteParams, ListParams, LogParams, ObjectMeta, PostParams};
use kube::{Client, ResourceExt};
use kube_runtime::wait::Condition;
use log::{debug, info, warn};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

pub const POD_NAME_LIST: &str = "KB_CLUSTER_COMPONENT_POD_NAME_LIST";
pub const POD_IP_LIST: &str = "KB_CLUSTER_COMPONENT_POD_IP_LIST";
pub const POD_HOST_NAME_LIST: &str = "KB_CLUSTER_COMPONENT_POD_HOST_NAME_LIST";
pub const POD_HOST_IP_LIST: &str = "KB_CLUSTER_COMPONENT_POD_HOST_IP_LIST";

/// Job operations the executor needs from the API server.
#[async_trait]
pub trait JobRunner: Send + Sync {
    async fn create(&self, namespace: &str, job: &Job) -> Result<()>;

    async fn get(&self, namespace: &str, name: &str) -> Result<Option<Job>>;

    /// Pods spawned by the job, in listing order.
    async fn pods(&self, namespace: &str, job_name: &str) -> Result<Vec<Pod>>;

    async fn logs(&self, namespace: &str, pod: &str, container: &str) -> Result<String>;

    async fn delete(&self, namespace: &str, name: &str) -> Result<()>;
}

pub struct KubeJobRunner {
    client: Client,
}

impl KubeJobRunner {
    pub fn new(client: Client) -> Self {
        KubeJobRunner { client }
    }
}

#[async_trait]
impl JobRunner for KubeJobRunner {
    async fn create(&self, namespace: &str, job: &Job) -> Result<()> {
        let jobs: Api<Job> = Api::namespaced(self.client.clone(), namespace);
        jobs.create(&PostParams::default(), job).await?;
        Ok(())
    }

    async fn get(&self, namespace: &str, name: &str) -> Result<Option<Job>> {
        let jobs: Api<Job> = Api::namespaced(self.client.clone(), namespace);
        Ok(jobs.get_opt(name).await?)
    }

    async fn pods(&self, namespace: &str, job_name: &str) -> Result<Vec<Pod>> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let lp = ListParams::default().labels(&format!("{}={}", JOB_NAME_LABEL_KEY, job_name));
        Ok(pods.list(&lp).await?.items)
    }

    async fn logs(&self, namespace: &str, pod: &str, container: &str) -> Result<String> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let lp = LogParams {
            container: Some(container.to_string()),
            ..LogParams::default()
        };
        Ok(pods.logs(pod, &lp).await?)
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<()> {
        let jobs: Api<Job> = Api::namespaced(self.client.clone(), namespace);
        // background propagation takes the job's pods with it
        jobs.delete(name, &DeleteParams::background()).await?;
        Ok(())
    }
}

/// Waits between two polls of a job.
#[async_trait]
pub trait Ticker: Send + Sync {
    async fn tick(&self, interval: Duration);
}

pub struct TokioTicker;

#[async_trait]
impl Ticker for TokioTicker {
    async fn tick(&self, interval: Duration) {
        tokio::time::sleep(interval).await;
    }
}

pub fn job_succeeded() -> impl Condition<Job> {
    |obj: Option<&Job>| {
        obj.and_then(|j| j.status.as_ref())
            .and_then(|s| s.succeeded)
            .map_or(false, |n| n >= 1)
    }
}

pub fn job_failed() -> impl Condition<Job> {
    |obj: Option<&Job>| {
        obj.and_then(|j| j.status.as_ref())
            .and_then(|s| s.failed)
            .map_or(false, |n| n >= 1)
    }
}

/// Job name for an action: a valid DNS label of at most 63 characters.
pub fn job_name(cluster: &str, comp: &str, action: &str) -> String {
    let raw = format!("{}-{}-{}", cluster, comp, action).to_lowercase();
    let name: String = raw
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '-' })
        .take(63)
        .collect();
    name.trim_end_matches('-').to_string()
}

pub struct JobExecutor {
    runner: Arc<dyn JobRunner>,
    ticker: Arc<dyn Ticker>,
    cfg: JobConfig,
}

impl JobExecutor {
    pub fn new(runner: Arc<dyn JobRunner>, cfg: JobConfig) -> Self {
        JobExecutor {
            runner,
            ticker: Arc::new(TokioTicker),
            cfg,
        }
    }

    pub fn with_ticker(mut self, ticker: Arc<dyn Ticker>) -> Self {
        self.ticker = ticker;
        self
    }

    fn build_job(
        &self,
        target: &Target,
        spec: &Action,
        action: &str,
        req: &ActionRequest,
    ) -> Result<Job> {
        let exec = spec
            .exec
            .as_ref()
            .ok_or_else(|| Error::from(ErrorKind::ActionNotDefined(action.to_string())))?;
        let image = image(exec, &target.pod)
            .ok_or_else(|| format!("no image to run action {} as a job", action))?;
        let scope = &target.scope;
        let name = job_name(&scope.cluster_name, &scope.comp_name, action);

        let mut env = pod_list_env(&target.pods);
        env.extend(exec.env.iter().cloned());
        env.extend(req.parameters.iter().map(|(k, v)| EnvVar {
            name: k.clone(),
            value: Some(v.clone()),
            ..EnvVar::default()
        }));
        env.push(EnvVar {
            name: self.cfg.request_env.clone(),
            value: Some(serde_json::to_string(req)?),
            ..EnvVar::default()
        });

        let mut labels = BTreeMap::new();
        labels.insert(APP_MANAGED_BY_LABEL_KEY.to_string(), APP_NAME.to_string());
        labels.insert(APP_INSTANCE_LABEL_KEY.to_string(), scope.cluster_name.clone());
        labels.insert(KB_APP_COMPONENT_LABEL_KEY.to_string(), scope.comp_name.clone());
        labels.insert(KB_LIFECYCLE_ACTION_LABEL_KEY.to_string(), action.to_string());

        Ok(Job {
            metadata: ObjectMeta {
                name: Some(name),
                namespace: Some(scope.namespace.clone()),
                labels: Some(labels.clone()),
                ..ObjectMeta::default()
            },
            spec: Some(JobSpec {
                backoff_limit: Some(0),
                active_deadline_seconds: req.timeout_seconds.map(i64::from),
                template: PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        labels: Some(labels),
                        ..ObjectMeta::default()
                    }),
                    spec: Some(PodSpec {
                        restart_policy: Some("Never".to_string()),
                        containers: vec![Container {
                            name: self.cfg.container_name.clone(),
                            image: Some(image),
                            image_pull_policy: Some("IfNotPresent".to_string()),
                            command: Some(exec.command.clone()).filter(|c| !c.is_empty()),
                            args: Some(exec.args.clone()).filter(|a| !a.is_empty()),
                            env: Some(env),
                            ..Container::default()
                        }],
                        ..PodSpec::default()
                    }),
                },
                ..JobSpec::default()
            }),
            status: None,
        })
    }

    async fn wait(&self, namespace: &str, name: &str, action: &str) -> Result<Vec<u8>> {
        let succeeded = job_succeeded();
        let failed = job_failed();
        for _ in 0..self.cfg.max_polls() {
            self.ticker.tick(self.cfg.poll_interval()).await;
            let job = self.runner.get(namespace, name).await?;
            if failed.matches_object(job.as_ref()) {
                bail!("job failed: {}", name);
            }
            if succeeded.matches_object(job.as_ref()) {
                return self.output(namespace, name).await;
            }
        }
        bail!(ErrorKind::ActionTimedOut(format!(
            "job {} of action {} did not finish within {}s",
            name, action, self.cfg.max_wait_seconds
        )))
    }

    // Logs of every pod of the job, concatenated.
    async fn output(&self, namespace: &str, name: &str) -> Result<Vec<u8>> {
        let mut output = String::new();
        for pod in self.runner.pods(namespace, name).await? {
            let logs = self
                .runner
                .logs(namespace, &pod.name_any(), &self.cfg.container_name)
                .await?;
            output.push_str(&logs);
        }
        Ok(output.into_bytes())
    }
}

// Names, IPs, node names and node IPs of the component's pods, index aligned.
fn pod_list_env(pods: &[Pod]) -> Vec<EnvVar> {
    fn joined(pods: &[Pod], f: fn(&Pod) -> Option<String>) -> String {
        pods.iter()
            .map(|p| f(p).unwrap_or_default())
            .collect::<Vec<_>>()
            .join(",")
    }
    let lists = [
        (POD_NAME_LIST, joined(pods, |p| Some(p.name_any()))),
        (
            POD_IP_LIST,
            joined(pods, |p| p.status.as_ref().and_then(|s| s.pod_ip.clone())),
        ),
        (
            POD_HOST_NAME_LIST,
            joined(pods, |p| p.spec.as_ref().and_then(|s| s.node_name.clone())),
        ),
        (
            POD_HOST_IP_LIST,
            joined(pods, |p| p.status.as_ref().and_then(|s| s.host_ip.clone())),
        ),
    ];
    lists
        .into_iter()
        .map(|(name, value)| EnvVar {
            name: name.to_string(),
            value: Some(value),
            ..EnvVar::default()
        })
        .collect()
}

// The action's own image, else the image of the container it names, else the
// first container of the primary pod.
fn image(exec: &ExecAction, pod: &Pod) -> Option<String> {
    if let Some(image) = exec.image.as_ref().filter(|i| !i.is_empty()) {
        return Some(image.clone());
    }
    let containers = &pod.spec.as_ref()?.containers;
    let container = match &exec.container {
        Some(name) => containers.iter().find(|c| &c.name == name),
        None => containers.first(),
    };
    container.and_then(|c| c.image.clone())
}

#[async_trait]
impl Executor for JobExecutor {
    async fn execute(
        &self,
        target: &Target,
        spec: &Action,
        lfa: &LifecycleAction,
        req: &ActionRequest,
    ) -> Result<Option<Vec<u8>>> {
        let action = lfa.name();
        let job = self.build_job(target, spec, &action, req)?;
        let name = job.name_any();
        let namespace = &target.scope.namespace;

        self.runner
            .create(namespace, &job)
            .await
            .chain_err(|| format!("failed to create job {} for action {}", name, action))?;
        info!("created job {}/{} for action {}", namespace, name, action);

        let result = self.wait(namespace, &name, &action).await;
        match self.runner.delete(namespace, &name).await {
            Ok(()) => debug!("deleted job {}/{}", namespace, name),
            Err(e) => warn!("failed to delete job {}/{}: {}", namespace, name, e),
        }
        result.map(Some)
    }
}
