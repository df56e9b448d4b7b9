//! Lifecycle action dispatch.
//!
//! A `Dispatcher` is bound to one component and resolves a hook to its action
//! definition, gates it on its precondition, merges parameters and hands the
//! request to an `Executor`. Two executors exist: `AgentExecutor` calls the
//! agent sidecar of each selected pod, `JobExecutor` runs the action as a
//! one-shot Job when no agent is reachable.

mod agent;
mod job;
mod lfa;
mod precondition;
mod selector;
mod sharding;

pub use agent::{format_error, AgentExecutor};
pub use job::{
    job_failed, job_name, job_succeeded, JobExecutor, JobRunner, KubeJobRunner, Ticker,
    TokioTicker,
};
pub use lfa::{ConfigFileChanges, LifecycleAction};
pub use selector::select_target_pods;
pub use sharding::{
    new_sharding_lifecycle, FanOutError, FanOutResult, Shard, ShardMember, ShardingAgent,
    ShardingLifecycle,
};

use crate::apis::{Action, ComponentLifecycleActions, RetryPolicy};
use crate::client::TransportMode;
use crate::config::Config;
use crate::constant::{DEFAULT_CLUSTER_DOMAIN, ROLE_LABEL_KEY};
use crate::errors::*;
use crate::proto::ActionRequest;
use crate::reader::Reader;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use log::debug;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Per-call overrides.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Options {
    pub non_blocking: Option<bool>,
    pub timeout_seconds: Option<i32>,
    pub retry_policy: Option<RetryPolicy>,
    /// Scopes readiness checks to every object carrying these labels.
    pub pre_condition_check_labels: Option<BTreeMap<String, String>>,
}

#[async_trait]
pub trait Lifecycle: Send + Sync {
    async fn post_provision(&self, reader: &dyn Reader, opts: Option<&Options>) -> Result<()>;

    async fn pre_terminate(&self, reader: &dyn Reader, opts: Option<&Options>) -> Result<()>;

    /// Returns the first output reported by the probed pods.
    async fn role_probe(
        &self,
        reader: &dyn Reader,
        opts: Option<&Options>,
    ) -> Result<Option<Vec<u8>>>;

    async fn switchover(
        &self,
        reader: &dyn Reader,
        opts: Option<&Options>,
        candidate: Option<&str>,
    ) -> Result<()>;

    async fn member_join(&self, reader: &dyn Reader, opts: Option<&Options>) -> Result<()>;

    async fn member_leave(&self, reader: &dyn Reader, opts: Option<&Options>) -> Result<()>;

    async fn data_dump(&self, reader: &dyn Reader, opts: Option<&Options>) -> Result<()>;

    async fn data_load(&self, reader: &dyn Reader, opts: Option<&Options>) -> Result<()>;

    async fn reconfigure(
        &self,
        reader: &dyn Reader,
        opts: Option<&Options>,
        changes: &ConfigFileChanges,
    ) -> Result<()>;

    async fn account_provision(
        &self,
        reader: &dyn Reader,
        opts: Option<&Options>,
        statement: &str,
        user: &str,
        password: &str,
    ) -> Result<()>;

    async fn user_defined(
        &self,
        reader: &dyn Reader,
        opts: Option<&Options>,
        name: &str,
        action: &Action,
        args: &BTreeMap<String, String>,
    ) -> Result<()>;
}

/// Tolerates hooks a component simply does not declare.
pub fn ignore_not_defined(result: Result<()>) -> Result<()> {
    match result {
        Err(e) if e.is_not_defined() => Ok(()),
        other => other,
    }
}

/// Component an action is addressed to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Scope {
    pub namespace: String,
    pub cluster_name: String,
    pub comp_name: String,
    pub cluster_domain: String,
}

impl Scope {
    pub fn new(namespace: &str, cluster_name: &str, comp_name: &str) -> Self {
        Scope {
            namespace: namespace.to_string(),
            cluster_name: cluster_name.to_string(),
            comp_name: comp_name.to_string(),
            cluster_domain: DEFAULT_CLUSTER_DOMAIN.to_string(),
        }
    }

    pub fn with_cluster_domain(mut self, domain: &str) -> Self {
        self.cluster_domain = domain.to_string();
        self
    }
}

/// The pods an action may run on: `pods` is the candidate set, `pod` the
/// primary target (for a switchover, the current pod).
#[derive(Clone, Debug)]
pub struct Target {
    pub scope: Scope,
    pub pods: Vec<Pod>,
    pub pod: Pod,
}

impl Target {
    pub fn new(scope: Scope, pod: Option<Pod>, pods: Vec<Pod>) -> Result<Self> {
        let (pod, pods) = match (pod, pods.is_empty()) {
            (None, true) => {
                bail!("either pod or pods must be provided to call lifecycle actions")
            }
            (Some(pod), true) => (pod.clone(), vec![pod]),
            (Some(pod), false) => (pod, pods),
            (None, false) => (pods[0].clone(), pods),
        };
        Ok(Target { scope, pods, pod })
    }

    pub fn select_target_pods(&self, spec: &Action) -> Result<Vec<&Pod>> {
        select_target_pods(&self.pods, &self.pod, spec)
    }
}

/// Runs a fully built request for one action.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(
        &self,
        target: &Target,
        spec: &Action,
        lfa: &LifecycleAction,
        req: &ActionRequest,
    ) -> Result<Option<Vec<u8>>>;
}

pub struct Dispatcher<E> {
    target: Target,
    actions: ComponentLifecycleActions,
    template_vars: BTreeMap<String, String>,
    executor: E,
}

/// Dispatcher calling the agent sidecar of each selected pod.
pub fn new_agent_lifecycle(
    target: Target,
    actions: ComponentLifecycleActions,
    template_vars: BTreeMap<String, String>,
    transport: &TransportMode,
    cfg: &Config,
) -> Result<Dispatcher<AgentExecutor>> {
    let executor = AgentExecutor::new(transport, &cfg.agent)?;
    Ok(Dispatcher::new(target, actions, template_vars, executor))
}

/// Dispatcher running each action as a one-shot Job.
pub fn new_job_lifecycle(
    target: Target,
    actions: ComponentLifecycleActions,
    template_vars: BTreeMap<String, String>,
    runner: Arc<dyn JobRunner>,
    cfg: &Config,
) -> Dispatcher<JobExecutor> {
    let executor = JobExecutor::new(runner, cfg.job.clone());
    Dispatcher::new(target, actions, template_vars, executor)
}

impl<E: Executor> Dispatcher<E> {
    pub fn new(
        target: Target,
        actions: ComponentLifecycleActions,
        template_vars: BTreeMap<String, String>,
        executor: E,
    ) -> Self {
        Dispatcher {
            target,
            actions,
            template_vars,
            executor,
        }
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    fn scope(&self) -> Scope {
        self.target.scope.clone()
    }

    pub(crate) async fn checked_call(
        &self,
        reader: &dyn Reader,
        spec: Option<&Action>,
        lfa: &LifecycleAction,
        opts: Option<&Options>,
    ) -> Result<Option<Vec<u8>>> {
        let spec = defined(spec, lfa)?;
        let labels = opts.and_then(|o| o.pre_condition_check_labels.as_ref());
        precondition::check(reader, &self.target.scope, spec, &lfa.name(), labels).await?;
        self.call(reader, spec, lfa, opts).await
    }

    /// Dispatches without evaluating the precondition; the caller has
    /// already checked it.
    pub(crate) async fn call(
        &self,
        reader: &dyn Reader,
        spec: &Action,
        lfa: &LifecycleAction,
        opts: Option<&Options>,
    ) -> Result<Option<Vec<u8>>> {
        let req = self.build_request(reader, spec, lfa, opts).await?;
        debug!(
            "calling action {} of {}/{}",
            req.action, self.target.scope.cluster_name, self.target.scope.comp_name
        );
        self.executor.execute(&self.target, spec, lfa, &req).await
    }

    pub async fn build_request(
        &self,
        reader: &dyn Reader,
        spec: &Action,
        lfa: &LifecycleAction,
        opts: Option<&Options>,
    ) -> Result<ActionRequest> {
        let parameters = self.parameters(reader, lfa).await?;
        let mut req = ActionRequest {
            action: lfa.name(),
            parameters,
            non_blocking: None,
            timeout_seconds: Some(spec.timeout_seconds).filter(|t| *t > 0),
            retry_policy: spec.retry_policy.map(Into::into),
        };
        if let Some(opts) = opts {
            if opts.non_blocking.is_some() {
                req.non_blocking = opts.non_blocking;
            }
            if opts.timeout_seconds.is_some() {
                req.timeout_seconds = opts.timeout_seconds;
            }
            if let Some(policy) = opts.retry_policy {
                req.retry_policy = Some(policy.into());
            }
        }
        Ok(req)
    }

    async fn parameters(
        &self,
        reader: &dyn Reader,
        lfa: &LifecycleAction,
    ) -> Result<BTreeMap<String, String>> {
        let mut m = self.template_vars.clone();
        for (k, v) in lfa.parameters(reader).await? {
            // template vars take precedence
            m.entry(k).or_insert(v);
        }
        Ok(m)
    }
}

fn defined<'a>(spec: Option<&'a Action>, lfa: &LifecycleAction) -> Result<&'a Action> {
    match spec {
        Some(spec) if spec.defined() => Ok(spec),
        _ => Err(ErrorKind::ActionNotDefined(lfa.name()).into()),
    }
}

#[async_trait]
impl<E: Executor> Lifecycle for Dispatcher<E> {
    async fn post_provision(&self, reader: &dyn Reader, opts: Option<&Options>) -> Result<()> {
        let lfa = LifecycleAction::PostProvision(self.scope());
        self.checked_call(reader, self.actions.post_provision.as_ref(), &lfa, opts)
            .await
            .map(drop)
    }

    async fn pre_terminate(&self, reader: &dyn Reader, opts: Option<&Options>) -> Result<()> {
        let lfa = LifecycleAction::PreTerminate(self.scope());
        self.checked_call(reader, self.actions.pre_terminate.as_ref(), &lfa, opts)
            .await
            .map(drop)
    }

    async fn role_probe(
        &self,
        reader: &dyn Reader,
        opts: Option<&Options>,
    ) -> Result<Option<Vec<u8>>> {
        let spec = self.actions.role_probe.as_ref().map(|p| &p.action);
        self.checked_call(reader, spec, &LifecycleAction::RoleProbe, opts)
            .await
    }

    async fn switchover(
        &self,
        reader: &dyn Reader,
        opts: Option<&Options>,
        candidate: Option<&str>,
    ) -> Result<()> {
        let pod = &self.target.pod;
        let lfa = LifecycleAction::Switchover {
            scope: self.scope(),
            role: pod.labels().get(ROLE_LABEL_KEY).cloned().unwrap_or_default(),
            current: pod.name_any(),
            candidate: candidate.filter(|c| !c.is_empty()).map(str::to_string),
        };
        self.checked_call(reader, self.actions.switchover.as_ref(), &lfa, opts)
            .await
            .map(drop)
    }

    async fn member_join(&self, reader: &dyn Reader, opts: Option<&Options>) -> Result<()> {
        let lfa = LifecycleAction::MemberJoin {
            scope: self.scope(),
            pod: self.target.pod.name_any(),
        };
        self.checked_call(reader, self.actions.member_join.as_ref(), &lfa, opts)
            .await
            .map(drop)
    }

    async fn member_leave(&self, reader: &dyn Reader, opts: Option<&Options>) -> Result<()> {
        let lfa = LifecycleAction::MemberLeave {
            scope: self.scope(),
            pod: self.target.pod.name_any(),
        };
        self.checked_call(reader, self.actions.member_leave.as_ref(), &lfa, opts)
            .await
            .map(drop)
    }

    async fn data_dump(&self, reader: &dyn Reader, opts: Option<&Options>) -> Result<()> {
        let spec = self.actions.data_dump.as_ref();
        self.checked_call(reader, spec, &LifecycleAction::DataDump, opts)
            .await
            .map(drop)
    }

    async fn data_load(&self, reader: &dyn Reader, opts: Option<&Options>) -> Result<()> {
        let spec = self.actions.data_load.as_ref();
        self.checked_call(reader, spec, &LifecycleAction::DataLoad, opts)
            .await
            .map(drop)
    }

    async fn reconfigure(
        &self,
        reader: &dyn Reader,
        opts: Option<&Options>,
        changes: &ConfigFileChanges,
    ) -> Result<()> {
        let lfa = LifecycleAction::Reconfigure(changes.clone());
        self.checked_call(reader, self.actions.reconfigure.as_ref(), &lfa, opts)
            .await
            .map(drop)
    }

    async fn account_provision(
        &self,
        reader: &dyn Reader,
        opts: Option<&Options>,
        statement: &str,
        user: &str,
        password: &str,
    ) -> Result<()> {
        let lfa = LifecycleAction::AccountProvision {
            statement: statement.to_string(),
            user: user.to_string(),
            password: password.to_string(),
        };
        self.checked_call(reader, self.actions.account_provision.as_ref(), &lfa, opts)
            .await
            .map(drop)
    }

    async fn user_defined(
        &self,
        reader: &dyn Reader,
        opts: Option<&Options>,
        name: &str,
        action: &Action,
        args: &BTreeMap<String, String>,
    ) -> Result<()> {
        let lfa = LifecycleAction::UserDefined {
            name: name.to_string(),
            args: args.clone(),
        };
        self.checked_call(reader, Some(action), &lfa, opts)
            .await
            .map(drop)
    }
}
