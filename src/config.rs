use crate::constant::DEFAULT_CLUSTER_DOMAIN;
use crate::errors::*;
use crate::proto::ActionRequest;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub agent: AgentConfig,
    pub job: JobConfig,
    pub cluster_domain: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            agent: AgentConfig::default(),
            job: JobConfig::default(),
            cluster_domain: DEFAULT_CLUSTER_DOMAIN.to_string(),
        }
    }
}

impl Config {
    pub fn from_yaml(s: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(s)?)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .chain_err(|| format!("failed to read config {}", path.display()))?;
        Self::from_yaml(&raw)
    }
}

/// Where the agent sidecar listens inside a pod.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentConfig {
    pub container_name: String,
    pub port_name: String,
    pub action_path: String,
    /// deadline of calls whose request carries no timeout
    pub request_timeout_seconds: u64,
    /// added on top of the time the agent may spend on a timed request
    pub timeout_margin_seconds: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        AgentConfig {
            container_name: "kbagent".to_string(),
            port_name: "http".to_string(),
            action_path: "/v1.0/action".to_string(),
            request_timeout_seconds: 60,
            timeout_margin_seconds: 5,
        }
    }
}

impl AgentConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    /// Client-side deadline of one agent call.
    ///
    /// The agent runs the action's timeout and retries itself, so a timed
    /// request may take every attempt plus the intervals between them.
    pub fn call_timeout(&self, req: &ActionRequest) -> Duration {
        let timeout = match req.timeout_seconds {
            Some(t) if t > 0 => t as u64,
            _ => return self.request_timeout(),
        };
        let (retries, interval) = req
            .retry_policy
            .map(|p| (p.max_retries.max(0) as u64, p.retry_interval.max(0) as u64))
            .unwrap_or((0, 0));
        let budget = timeout * (retries + 1) + interval * retries;
        Duration::from_secs(budget + self.timeout_margin_seconds)
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct JobConfig {
    pub container_name: String,
    pub request_env: String,
    pub poll_interval_seconds: u64,
    pub max_wait_seconds: u64,
}

impl Default for JobConfig {
    fn default() -> Self {
        JobConfig {
            container_name: "kb-lifecycle-action-job".to_string(),
            request_env: "KB_ACTION_REQUEST".to_string(),
            poll_interval_seconds: 1,
            max_wait_seconds: 300,
        }
    }
}

impl JobConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds)
    }

    /// Number of polls before giving up, never less than one.
    pub fn max_polls(&self) -> u64 {
        if self.poll_interval_seconds == 0 {
            return self.max_wait_seconds.max(1);
        }
        (self.max_wait_seconds / self.poll_interval_seconds).max(1)
    }
}
