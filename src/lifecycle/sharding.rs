//! Fan-out of sharding-level actions over the shard components.

use super::{
    defined, precondition, AgentExecutor, Dispatcher, Executor, LifecycleAction, Options, Scope,
    Target,
};
use crate::apis::{Action, ComponentLifecycleActions, PreConditionType, ShardingLifecycleActions};
use crate::client::TransportMode;
use crate::config::Config;
use crate::constant::sharding_labels;
use crate::errors::*;
use crate::reader::Reader;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use log::{info, warn};
use std::collections::BTreeMap;
use std::fmt;

/// A sharding of a cluster.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Shard {
    pub namespace: String,
    pub cluster_name: String,
    pub sharding_name: String,
}

/// One shard component and its pods.
#[derive(Clone, Debug, Default)]
pub struct ShardMember {
    pub comp_name: String,
    pub pod: Option<Pod>,
    pub pods: Vec<Pod>,
}

/// Error of a fan-out that stopped early. `completed` lists the shard
/// components that finished before `error` was hit.
#[derive(Debug)]
pub struct FanOutError {
    pub completed: Vec<String>,
    pub error: Error,
}

impl FanOutError {
    fn before_any(error: Error) -> Self {
        FanOutError {
            completed: vec![],
            error,
        }
    }
}

impl fmt::Display for FanOutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)
    }
}

impl std::error::Error for FanOutError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

impl From<FanOutError> for Error {
    fn from(e: FanOutError) -> Self {
        e.error
    }
}

/// Shard components reached, in order.
pub type FanOutResult = std::result::Result<Vec<String>, FanOutError>;

#[async_trait]
pub trait ShardingLifecycle: Send + Sync {
    async fn post_provision(&self, reader: &dyn Reader, opts: Option<&Options>) -> FanOutResult;

    async fn pre_terminate(&self, reader: &dyn Reader, opts: Option<&Options>) -> FanOutResult;

    async fn shard_add(&self, reader: &dyn Reader, opts: Option<&Options>) -> FanOutResult;

    async fn shard_remove(&self, reader: &dyn Reader, opts: Option<&Options>) -> FanOutResult;
}

pub struct ShardingAgent<E> {
    shard: Shard,
    actions: ShardingLifecycleActions,
    members: Vec<Dispatcher<E>>,
}

/// Sharding dispatcher calling the agents of the shard components.
pub fn new_sharding_lifecycle(
    shard: Shard,
    actions: ShardingLifecycleActions,
    template_vars: BTreeMap<String, String>,
    members: Vec<ShardMember>,
    transport: &TransportMode,
    cfg: &Config,
) -> Result<ShardingAgent<AgentExecutor>> {
    let executor = AgentExecutor::new(transport, &cfg.agent)?;
    ShardingAgent::new(shard, actions, template_vars, members, executor)
}

impl<E: Executor + Clone> ShardingAgent<E> {
    pub fn new(
        shard: Shard,
        actions: ShardingLifecycleActions,
        template_vars: BTreeMap<String, String>,
        members: Vec<ShardMember>,
        executor: E,
    ) -> Result<Self> {
        if members.is_empty() {
            bail!(
                "sharding {} has no shard to call lifecycle actions",
                shard.sharding_name
            );
        }
        let members = members
            .into_iter()
            .map(|m| {
                let scope = Scope::new(&shard.namespace, &shard.cluster_name, &m.comp_name);
                let target = Target::new(scope, m.pod, m.pods)?;
                Ok(Dispatcher::new(
                    target,
                    ComponentLifecycleActions::default(),
                    template_vars.clone(),
                    executor.clone(),
                ))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(ShardingAgent {
            shard,
            actions,
            members,
        })
    }
}

impl<E: Executor> ShardingAgent<E> {
    // Readiness of the whole sharding, judged once before any shard is called.
    async fn check_sharding(
        &self,
        reader: &dyn Reader,
        spec: &Action,
        action: &str,
    ) -> Result<()> {
        let first = &self.members[0].target().scope;
        match &spec.pre_condition {
            Some(PreConditionType::ComponentReady) | Some(PreConditionType::RuntimeReady) => {
                let labels = sharding_labels(&self.shard.cluster_name, &self.shard.sharding_name);
                precondition::check(reader, first, spec, action, Some(&labels)).await
            }
            _ => precondition::check(reader, first, spec, action, None).await,
        }
    }

    async fn fan_out_once(
        &self,
        reader: &dyn Reader,
        spec: Option<&Action>,
        lfa: LifecycleAction,
        opts: Option<&Options>,
    ) -> FanOutResult {
        let action = lfa.name();
        let spec = defined(spec, &lfa).map_err(FanOutError::before_any)?;
        self.check_sharding(reader, spec, &action)
            .await
            .map_err(FanOutError::before_any)?;

        let mut completed = vec![];
        for member in &self.members {
            let comp = &member.target().scope.comp_name;
            if let Err(error) = member.call(reader, spec, &lfa, opts).await {
                warn!("action {} failed at shard {}: {}", action, comp, error);
                return Err(FanOutError { completed, error });
            }
            completed.push(comp.clone());
        }
        info!(
            "action {} done on {} shards of {}",
            action,
            completed.len(),
            self.shard.sharding_name
        );
        Ok(completed)
    }

    async fn fan_out_each(
        &self,
        reader: &dyn Reader,
        spec: Option<&Action>,
        lfa: LifecycleAction,
        opts: Option<&Options>,
    ) -> FanOutResult {
        let mut completed = vec![];
        for member in &self.members {
            let comp = &member.target().scope.comp_name;
            if let Err(error) = member.checked_call(reader, spec, &lfa, opts).await {
                warn!("action {} failed at shard {}: {}", lfa.name(), comp, error);
                return Err(FanOutError { completed, error });
            }
            completed.push(comp.clone());
        }
        Ok(completed)
    }
}

#[async_trait]
impl<E: Executor> ShardingLifecycle for ShardingAgent<E> {
    async fn post_provision(&self, reader: &dyn Reader, opts: Option<&Options>) -> FanOutResult {
        let spec = self.actions.post_provision.as_ref();
        self.fan_out_once(reader, spec, LifecycleAction::ShardPostProvision, opts)
            .await
    }

    async fn pre_terminate(&self, reader: &dyn Reader, opts: Option<&Options>) -> FanOutResult {
        let spec = self.actions.pre_terminate.as_ref();
        self.fan_out_once(reader, spec, LifecycleAction::ShardPreTerminate, opts)
            .await
    }

    async fn shard_add(&self, reader: &dyn Reader, opts: Option<&Options>) -> FanOutResult {
        let spec = self.actions.shard_add.as_ref();
        self.fan_out_each(reader, spec, LifecycleAction::ShardAdd, opts)
            .await
    }

    async fn shard_remove(&self, reader: &dyn Reader, opts: Option<&Options>) -> FanOutResult {
        let spec = self.actions.shard_remove.as_ref();
        self.fan_out_each(reader, spec, LifecycleAction::ShardRemove, opts)
            .await
    }
}
