#[macro_use]
extern crate error_chain;

use k8s_openapi::api::core::v1::Pod;
use kbaction::apis::{Action, ComponentLifecycleActions};
use kbaction::client::TransportMode;
use kbaction::config::Config;
use kbaction::constant::{label_selector, APP_INSTANCE_LABEL_KEY, KB_APP_COMPONENT_LABEL_KEY};
use kbaction::errors::*;
use kbaction::lifecycle::{
    self, ignore_not_defined, ConfigFileChanges, KubeJobRunner, Lifecycle, Options, Scope,
    Target,
};
use kbaction::reader::KubeReader;
use kube::api::{Api, ListParams};
use kube::{Client, ResourceExt};
use log::{error, info};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;

const CONFIG_ENV: &str = "KBACTION_CONFIG";

/// One action to run against one component, read from a YAML file.
#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct Invocation {
    namespace: String,
    cluster: String,
    component: String,
    action: String,
    actions: ComponentLifecycleActions,
    /// primary pod; defaults to the first pod of the component
    #[serde(default)]
    pod: Option<String>,
    #[serde(default)]
    candidate: Option<String>,
    /// run the action as a Job instead of calling the agent
    #[serde(default)]
    job: bool,
    #[serde(default)]
    template_vars: BTreeMap<String, String>,
    #[serde(default)]
    non_blocking: Option<bool>,
    #[serde(default)]
    timeout_seconds: Option<i32>,
    #[serde(default)]
    account: Option<Account>,
    #[serde(default)]
    config_files: Option<ConfigFiles>,
    #[serde(default)]
    user_defined: Option<UserDefined>,
}

/// A user-defined action, run as `udf-<name>`.
#[derive(Deserialize, Debug)]
struct UserDefined {
    name: String,
    action: Action,
    #[serde(default)]
    args: BTreeMap<String, String>,
}

#[derive(Deserialize, Debug)]
struct Account {
    statement: String,
    user: String,
    password: String,
}

#[derive(Deserialize, Debug, Default)]
#[serde(default)]
struct ConfigFiles {
    created: Vec<String>,
    removed: Vec<String>,
    updated: BTreeMap<String, String>,
}

#[tokio::main]
async fn main() {
    env_logger::init();
    if let Err(e) = run().await {
        error!("{}", e);
        for cause in e.iter().skip(1) {
            error!("caused by: {}", cause);
        }
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cfg = match std::env::var(CONFIG_ENV) {
        Ok(path) => Config::load(path)?,
        Err(_) => Config::default(),
    };
    let path = std::env::args()
        .nth(1)
        .ok_or("usage: kbaction <invocation.yaml>")?;
    let raw = std::fs::read_to_string(&path)
        .chain_err(|| format!("failed to read invocation {}", path))?;
    let inv: Invocation = serde_yaml::from_str(&raw)?;

    let client = Client::try_default().await?;
    // pod IPs are only routable from inside the cluster
    let transport = if kube::Config::incluster().is_ok() {
        TransportMode::InCluster
    } else {
        TransportMode::PortForward(client.clone())
    };
    info!("reaching agents via {:?}", transport);

    let pods = component_pods(&client, &inv).await?;
    let pod = match &inv.pod {
        Some(name) => {
            let pod = pods.iter().find(|p| &p.name_any() == name).cloned();
            Some(pod.ok_or_else(|| {
                format!("pod {} is not part of component {}", name, inv.component)
            })?)
        }
        None => None,
    };
    let scope = Scope::new(&inv.namespace, &inv.cluster, &inv.component)
        .with_cluster_domain(&cfg.cluster_domain);
    let target = Target::new(scope, pod, pods)?;
    let actions = inv.actions.clone();
    let template_vars = inv.template_vars.clone();
    let lc: Box<dyn Lifecycle> = if inv.job {
        let runner = Arc::new(KubeJobRunner::new(client.clone()));
        Box::new(lifecycle::new_job_lifecycle(
            target,
            actions,
            template_vars,
            runner,
            &cfg,
        ))
    } else {
        Box::new(lifecycle::new_agent_lifecycle(
            target,
            actions,
            template_vars,
            &transport,
            &cfg,
        )?)
    };

    let reader = KubeReader::new(client);
    let opts = Options {
        non_blocking: inv.non_blocking,
        timeout_seconds: inv.timeout_seconds,
        ..Options::default()
    };
    let opts = Some(&opts);

    match inv.action.as_str() {
        "postProvision" => ignore_not_defined(lc.post_provision(&reader, opts).await)?,
        "preTerminate" => ignore_not_defined(lc.pre_terminate(&reader, opts).await)?,
        "roleProbe" => {
            if let Some(output) = lc.role_probe(&reader, opts).await? {
                println!("{}", String::from_utf8_lossy(&output));
            }
        }
        "switchover" => lc.switchover(&reader, opts, inv.candidate.as_deref()).await?,
        "memberJoin" => lc.member_join(&reader, opts).await?,
        "memberLeave" => lc.member_leave(&reader, opts).await?,
        "dataDump" => lc.data_dump(&reader, opts).await?,
        "dataLoad" => lc.data_load(&reader, opts).await?,
        "reconfigure" => {
            let files = inv.config_files.unwrap_or_default();
            let changes = ConfigFileChanges {
                created: files.created,
                removed: files.removed,
                updated: files.updated.into_iter().collect(),
            };
            lc.reconfigure(&reader, opts, &changes).await?
        }
        "accountProvision" => {
            let account = inv
                .account
                .as_ref()
                .ok_or("accountProvision needs an account")?;
            lc.account_provision(
                &reader,
                opts,
                &account.statement,
                &account.user,
                &account.password,
            )
            .await?
        }
        "userDefined" => {
            let udf = inv
                .user_defined
                .as_ref()
                .ok_or("userDefined needs a userDefined action")?;
            lc.user_defined(&reader, opts, &udf.name, &udf.action, &udf.args)
                .await?
        }
        other => bail!("unsupported action {}", other),
    }
    info!("action {} of {}/{} done", inv.action, inv.cluster, inv.component);
    Ok(())
}

async fn component_pods(client: &Client, inv: &Invocation) -> Result<Vec<Pod>> {
    let mut labels = BTreeMap::new();
    labels.insert(APP_INSTANCE_LABEL_KEY.to_string(), inv.cluster.clone());
    labels.insert(KB_APP_COMPONENT_LABEL_KEY.to_string(), inv.component.clone());
    let api: Api<Pod> = Api::namespaced(client.clone(), &inv.namespace);
    let lp = ListParams::default().labels(&label_selector(&labels));
    Ok(api.list(&lp).await?.items)
}
