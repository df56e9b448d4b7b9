//! In-memory fakes for the reader, the agent transport and the job runner.

use crate::client::{AgentClient, AgentConnector, Endpoint, TransportMode};
use crate::constant::{
    cluster_component_name, workload_name, APP_INSTANCE_LABEL_KEY, KB_APP_COMPONENT_LABEL_KEY,
    ROLE_LABEL_KEY,
};
use crate::crd::{
    Cluster, ClusterPhase, ClusterSpec, ClusterStatus, Component, ComponentPhase, ComponentSpec,
    ComponentStatus, InstanceSet, InstanceSetCondition, InstanceSetSpec, InstanceSetStatus,
    INSTANCE_READY_CONDITION,
};
use crate::errors::*;
use crate::lifecycle::{JobRunner, Ticker};
use crate::proto::{ActionRequest, ActionResponse};
use crate::reader::Reader;
use async_trait::async_trait;
use k8s_openapi::api::batch::v1::{Job, JobStatus};
use k8s_openapi::api::core::v1::{Container, ContainerPort, Pod, PodSpec, PodStatus};
use kube::api::{ApiResource, DynamicObject, ObjectMeta, TypeMeta};
use kube::{Resource, ResourceExt};
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
pub struct MemoryReader {
    objects: Vec<DynamicObject>,
}

impl MemoryReader {
    pub fn add<K>(&mut self, obj: &K)
    where
        K: Resource<DynamicType = ()> + Serialize,
    {
        let mut dynamic: DynamicObject =
            serde_json::from_value(serde_json::to_value(obj).unwrap()).unwrap();
        dynamic.types = Some(TypeMeta {
            api_version: K::api_version(&()).to_string(),
            kind: K::kind(&()).to_string(),
        });
        self.objects.push(dynamic);
    }

    fn matching<'a>(
        &'a self,
        resource: &'a ApiResource,
        namespace: &'a str,
    ) -> impl Iterator<Item = &'a DynamicObject> + 'a {
        self.objects.iter().filter(move |o| {
            o.types.as_ref().map(|t| t.kind.as_str()) == Some(resource.kind.as_str())
                && o.metadata.namespace.as_deref() == Some(namespace)
        })
    }
}

#[async_trait]
impl Reader for MemoryReader {
    async fn get(
        &self,
        resource: &ApiResource,
        namespace: &str,
        name: &str,
    ) -> Result<DynamicObject> {
        match self
            .matching(resource, namespace)
            .find(|o| o.metadata.name.as_deref() == Some(name))
        {
            Some(obj) => Ok(obj.clone()),
            None => bail!("{} {}/{} not found", resource.kind, namespace, name),
        }
    }

    async fn list(
        &self,
        resource: &ApiResource,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<DynamicObject>> {
        Ok(self
            .matching(resource, namespace)
            .filter(|o| {
                let have = o.labels();
                labels.iter().all(|(k, v)| have.get(k) == Some(v))
            })
            .cloned()
            .collect())
    }
}

fn meta(namespace: &str, name: &str, cluster: &str) -> ObjectMeta {
    let mut labels = BTreeMap::new();
    labels.insert(APP_INSTANCE_LABEL_KEY.to_string(), cluster.to_string());
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        labels: Some(labels),
        generation: Some(1),
        ..ObjectMeta::default()
    }
}

pub fn cluster(namespace: &str, name: &str, phase: Option<ClusterPhase>) -> Cluster {
    Cluster {
        metadata: meta(namespace, name, name),
        spec: ClusterSpec::default(),
        status: Some(ClusterStatus {
            phase,
            ..ClusterStatus::default()
        }),
    }
}

pub fn component(
    namespace: &str,
    cluster: &str,
    comp: &str,
    phase: Option<ComponentPhase>,
) -> Component {
    let mut metadata = meta(namespace, &cluster_component_name(cluster, comp), cluster);
    metadata
        .labels
        .get_or_insert_with(BTreeMap::new)
        .insert(KB_APP_COMPONENT_LABEL_KEY.to_string(), comp.to_string());
    Component {
        metadata,
        spec: ComponentSpec::default(),
        status: Some(ComponentStatus {
            phase,
            ..ComponentStatus::default()
        }),
    }
}

pub fn instance_set(namespace: &str, cluster: &str, comp: &str, ready: bool) -> InstanceSet {
    InstanceSet {
        metadata: meta(namespace, &workload_name(cluster, comp), cluster),
        spec: InstanceSetSpec { replicas: Some(1) },
        status: Some(InstanceSetStatus {
            observed_generation: 1,
            replicas: 1,
            conditions: vec![InstanceSetCondition {
                type_: INSTANCE_READY_CONDITION.to_string(),
                status: if ready { "True" } else { "False" }.to_string(),
                ..InstanceSetCondition::default()
            }],
            ..InstanceSetStatus::default()
        }),
    }
}

/// A pod with a `kbagent` container listening on the `http` port.
pub fn pod(name: &str, role: Option<&str>) -> Pod {
    let mut labels = BTreeMap::new();
    if let Some(role) = role {
        labels.insert(ROLE_LABEL_KEY.to_string(), role.to_string());
    }
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some("demo".to_string()),
            labels: Some(labels),
            ..ObjectMeta::default()
        },
        spec: Some(PodSpec {
            containers: vec![
                Container {
                    name: "postgresql".to_string(),
                    image: Some("postgres:16".to_string()),
                    ..Container::default()
                },
                Container {
                    name: "kbagent".to_string(),
                    image: Some("kbagent:1.0".to_string()),
                    ports: Some(vec![ContainerPort {
                        name: Some("http".to_string()),
                        container_port: 3501,
                        ..ContainerPort::default()
                    }]),
                    ..Container::default()
                },
            ],
            ..PodSpec::default()
        }),
        status: Some(PodStatus {
            pod_ip: Some("10.0.0.1".to_string()),
            ..PodStatus::default()
        }),
    }
}

type Handler = dyn Fn(&str, &ActionRequest) -> Result<ActionResponse> + Send + Sync;

/// Agent transport answering from a closure and recording every call as
/// `(pod, request)`.
#[derive(Clone)]
pub struct MockAgent {
    handler: Arc<Handler>,
    calls: Arc<Mutex<Vec<(String, ActionRequest)>>>,
}

impl MockAgent {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&str, &ActionRequest) -> Result<ActionResponse> + Send + Sync + 'static,
    {
        MockAgent {
            handler: Arc::new(handler),
            calls: Arc::new(Mutex::new(vec![])),
        }
    }

    pub fn ok() -> Self {
        MockAgent::new(|_, _| Ok(ActionResponse::default()))
    }

    pub fn transport(&self) -> TransportMode {
        TransportMode::Custom(Arc::new(self.clone()))
    }

    pub fn calls(&self) -> Vec<(String, ActionRequest)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn called_pods(&self) -> Vec<String> {
        self.calls().into_iter().map(|(pod, _)| pod).collect()
    }
}

#[async_trait]
impl AgentConnector for MockAgent {
    async fn connect(&self, pod: &Pod, _endpoint: &Endpoint) -> Result<Box<dyn AgentClient>> {
        Ok(Box::new(MockClient {
            pod: pod.name_any(),
            agent: self.clone(),
        }))
    }
}

struct MockClient {
    pod: String,
    agent: MockAgent,
}

#[async_trait]
impl AgentClient for MockClient {
    async fn action(&mut self, req: &ActionRequest) -> Result<ActionResponse> {
        self.agent
            .calls
            .lock()
            .unwrap()
            .push((self.pod.clone(), req.clone()));
        (self.agent.handler)(&self.pod, req)
    }
}

#[derive(Default)]
pub struct JobRunnerState {
    pub created: Vec<Job>,
    pub deleted: Vec<String>,
    pub polls: usize,
}

/// Job runner replaying a scripted sequence of statuses, one per poll. Once
/// the script runs out the job reports no progress.
#[derive(Default)]
pub struct MockJobRunner {
    pub statuses: Mutex<VecDeque<JobStatus>>,
    pub pods: Vec<Pod>,
    pub logs: BTreeMap<String, String>,
    pub fail_create: bool,
    pub state: Mutex<JobRunnerState>,
}

impl MockJobRunner {
    pub fn with_statuses(statuses: Vec<JobStatus>) -> Self {
        MockJobRunner {
            statuses: Mutex::new(statuses.into()),
            ..MockJobRunner::default()
        }
    }

    pub fn created(&self) -> Vec<Job> {
        self.state.lock().unwrap().created.clone()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.state.lock().unwrap().deleted.clone()
    }

    pub fn polls(&self) -> usize {
        self.state.lock().unwrap().polls
    }
}

pub fn succeeded() -> JobStatus {
    JobStatus {
        succeeded: Some(1),
        ..JobStatus::default()
    }
}

pub fn failed() -> JobStatus {
    JobStatus {
        failed: Some(1),
        ..JobStatus::default()
    }
}

#[async_trait]
impl JobRunner for MockJobRunner {
    async fn create(&self, _namespace: &str, job: &Job) -> Result<()> {
        if self.fail_create {
            bail!("admission webhook denied the request");
        }
        self.state.lock().unwrap().created.push(job.clone());
        Ok(())
    }

    async fn get(&self, _namespace: &str, name: &str) -> Result<Option<Job>> {
        let mut state = self.state.lock().unwrap();
        state.polls += 1;
        let mut job = match state.created.iter().find(|j| j.name_any() == name) {
            Some(job) => job.clone(),
            None => return Ok(None),
        };
        job.status = self.statuses.lock().unwrap().pop_front();
        Ok(Some(job))
    }

    async fn pods(&self, _namespace: &str, _job_name: &str) -> Result<Vec<Pod>> {
        Ok(self.pods.clone())
    }

    async fn logs(&self, _namespace: &str, pod: &str, _container: &str) -> Result<String> {
        Ok(self.logs.get(pod).cloned().unwrap_or_default())
    }

    async fn delete(&self, _namespace: &str, name: &str) -> Result<()> {
        self.state.lock().unwrap().deleted.push(name.to_string());
        Ok(())
    }
}

/// Ticker that returns immediately and counts its ticks.
#[derive(Default)]
pub struct NoWaitTicker {
    pub ticks: AtomicUsize,
}

#[async_trait]
impl Ticker for NoWaitTicker {
    async fn tick(&self, _interval: Duration) {
        self.ticks.fetch_add(1, Ordering::SeqCst);
    }
}
