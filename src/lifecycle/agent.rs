use super::{Executor, LifecycleAction, Target};
use crate::apis::Action;
use crate::client::{AgentConnector, Endpoint, TransportMode};
use crate::config::AgentConfig;
use crate::errors::*;
use crate::proto::{ActionRequest, ActionResponse, ErrorCode};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use log::{debug, trace, warn};
use std::sync::Arc;

/// Calls the agent sidecar of every selected pod, one after another.
#[derive(Clone)]
pub struct AgentExecutor {
    connector: Arc<dyn AgentConnector>,
    container_name: String,
    port_name: String,
}

impl AgentExecutor {
    pub fn new(transport: &TransportMode, cfg: &AgentConfig) -> Result<Self> {
        Ok(AgentExecutor {
            connector: transport.connector(cfg)?,
            container_name: cfg.container_name.clone(),
            port_name: cfg.port_name.clone(),
        })
    }

    // None when the pod runs no agent.
    fn server_endpoint(&self, pod: &Pod) -> Result<Option<Endpoint>> {
        let port = pod
            .spec
            .iter()
            .flat_map(|s| s.containers.iter())
            .filter(|c| c.name == self.container_name)
            .flat_map(|c| c.ports.iter().flatten())
            .find(|p| p.name.as_deref() == Some(self.port_name.as_str()))
            .map(|p| p.container_port);
        let port = match port {
            Some(port) => port,
            None => return Ok(None),
        };
        let host = pod
            .status
            .as_ref()
            .and_then(|s| s.pod_ip.clone())
            .filter(|ip| !ip.is_empty())
            .ok_or_else(|| format!("pod {} has no ip", pod.name_any()))?;
        Ok(Some(Endpoint { host, port }))
    }
}

#[async_trait]
impl Executor for AgentExecutor {
    async fn execute(
        &self,
        target: &Target,
        spec: &Action,
        lfa: &LifecycleAction,
        req: &ActionRequest,
    ) -> Result<Option<Vec<u8>>> {
        let action = lfa.name();
        let pods = target.select_target_pods(spec)?;
        if pods.is_empty() {
            bail!("no available pod to execute action {}", action);
        }

        let mut output = None;
        for pod in pods {
            let pod_name = pod.name_any();
            let endpoint = self.server_endpoint(pod).chain_err(|| {
                format!("pod {} is unavailable to execute action {}", pod_name, action)
            })?;
            let endpoint = match endpoint {
                Some(endpoint) => endpoint,
                None => {
                    trace!("pod {} has no agent, skip action {}", pod_name, action);
                    continue;
                }
            };

            let mut client = self
                .connector
                .connect(pod, &endpoint)
                .await
                .chain_err(|| format!("failed to connect to agent of pod {}", pod_name))?;
            debug!("calling action {} at pod {}", action, pod_name);
            let rsp = client.action(req).await;
            if let Err(e) = client.close().await {
                warn!("failed to close agent client of pod {}: {}", pod_name, e);
            }
            let rsp = rsp.chain_err(|| {
                format!(
                    "http error occurred when executing action {} at pod {}",
                    action, pod_name
                )
            })?;

            if !rsp.error.is_empty() {
                return Err(format_error(&action, &rsp));
            }
            if output.is_none() {
                output = rsp.output.map(|o| o.0).filter(|o| !o.is_empty());
            }
        }
        Ok(output)
    }
}

/// Maps an error reported by the agent onto the dispatcher's error kinds.
pub fn format_error(action: &str, rsp: &ActionResponse) -> Error {
    let ctx = format!("action: {}, error: {}", action, rsp.message);
    let code = match ErrorCode::parse(&rsp.error) {
        Some(code) => code,
        None => return ErrorKind::AgentError(rsp.error.clone(), ctx).into(),
    };
    match code {
        ErrorCode::NotDefined => ErrorKind::ActionNotDefined(ctx),
        ErrorCode::NotImplemented => ErrorKind::ActionNotImplemented(ctx),
        ErrorCode::PreconditionFailed => ErrorKind::PreconditionFailed(ctx),
        ErrorCode::InProgress => ErrorKind::ActionInProgress(ctx),
        ErrorCode::Busy => ErrorKind::ActionBusy(ctx),
        ErrorCode::TimedOut => ErrorKind::ActionTimedOut(ctx),
        ErrorCode::Failed => ErrorKind::ActionFailed(ctx),
        ErrorCode::BadRequest | ErrorCode::InternalError => ErrorKind::ActionInternalError(ctx),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apis::{ExecAction, TargetPodSelector};
    use crate::lifecycle::Scope;
    use crate::testing::{pod, MockAgent};

    fn target(pods: Vec<Pod>) -> Target {
        Target::new(Scope::new("demo", "pg", "postgresql"), None, pods).unwrap()
    }

    fn all() -> Action {
        Action {
            exec: Some(ExecAction::default()),
            target_pod_selector: Some(TargetPodSelector::AllReplicas),
            ..Action::default()
        }
    }

    fn request() -> ActionRequest {
        ActionRequest {
            action: "roleProbe".to_string(),
            ..ActionRequest::default()
        }
    }

    #[tokio::test]
    async fn all_replicas_stop_at_first_failure() {
        let agent = MockAgent::new(|pod, _| {
            Ok(match pod {
                "pg-1" => ActionResponse::with_error(ErrorCode::Failed, "exit 1"),
                "pg-2" => ActionResponse::with_output("late"),
                _ => ActionResponse::default(),
            })
        });
        let executor = AgentExecutor::new(&agent.transport(), &AgentConfig::default()).unwrap();
        let pods = vec![pod("pg-0", None), pod("pg-1", None), pod("pg-2", None)];

        let err = executor
            .execute(&target(pods), &all(), &LifecycleAction::RoleProbe, &request())
            .await
            .unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::ActionFailed(_)));
        assert_eq!(err.to_string(), "action: roleProbe, error: exit 1: action failed");
        assert_eq!(agent.called_pods(), vec!["pg-0", "pg-1"]);
    }

    #[tokio::test]
    async fn first_output_wins() {
        let agent = MockAgent::new(|pod, _| {
            Ok(match pod {
                "pg-0" => ActionResponse::default(),
                other => ActionResponse::with_output(other),
            })
        });
        let executor = AgentExecutor::new(&agent.transport(), &AgentConfig::default()).unwrap();
        let pods = vec![pod("pg-0", None), pod("pg-1", None), pod("pg-2", None)];

        let output = executor
            .execute(&target(pods), &all(), &LifecycleAction::RoleProbe, &request())
            .await
            .unwrap();
        assert_eq!(output, Some(b"pg-1".to_vec()));
        assert_eq!(agent.called_pods().len(), 3);
    }

    #[tokio::test]
    async fn pods_without_agent_are_skipped() {
        let agent = MockAgent::ok();
        let executor = AgentExecutor::new(&agent.transport(), &AgentConfig::default()).unwrap();
        let mut bare = pod("pg-0", None);
        if let Some(spec) = bare.spec.as_mut() {
            spec.containers.retain(|c| c.name != "kbagent");
        }
        let pods = vec![bare, pod("pg-1", None)];

        executor
            .execute(&target(pods), &all(), &LifecycleAction::RoleProbe, &request())
            .await
            .unwrap();
        assert_eq!(agent.called_pods(), vec!["pg-1"]);
    }

    #[tokio::test]
    async fn pod_without_ip_is_unavailable() {
        let agent = MockAgent::ok();
        let executor = AgentExecutor::new(&agent.transport(), &AgentConfig::default()).unwrap();
        let mut pending = pod("pg-0", None);
        pending.status = None;

        let err = executor
            .execute(&target(vec![pending]), &all(), &LifecycleAction::RoleProbe, &request())
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "pod pg-0 is unavailable to execute action roleProbe"
        );
        assert!(agent.calls().is_empty());
    }

    #[tokio::test]
    async fn empty_role_match_has_no_pod() {
        let agent = MockAgent::ok();
        let executor = AgentExecutor::new(&agent.transport(), &AgentConfig::default()).unwrap();
        let spec = Action {
            exec: Some(ExecAction::default()),
            target_pod_selector: Some(TargetPodSelector::RoleSelector),
            matching_key: Some("leader".to_string()),
            ..Action::default()
        };

        let err = executor
            .execute(
                &target(vec![pod("pg-0", Some("primary"))]),
                &spec,
                &LifecycleAction::RoleProbe,
                &request(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "no available pod to execute action roleProbe");
    }

    #[tokio::test]
    async fn transport_error_is_wrapped() {
        let agent = MockAgent::new(|_, _| bail!("connection refused"));
        let executor = AgentExecutor::new(&agent.transport(), &AgentConfig::default()).unwrap();

        let err = executor
            .execute(
                &target(vec![pod("pg-0", None), pod("pg-1", None)]),
                &all(),
                &LifecycleAction::RoleProbe,
                &request(),
            )
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "http error occurred when executing action roleProbe at pod pg-0"
        );
        assert_eq!(agent.called_pods(), vec!["pg-0"]);
    }

    #[test]
    fn error_codes_map_to_kinds() {
        let rsp = |code| ActionResponse::with_error(code, "boom");
        assert!(format_error("a", &rsp(ErrorCode::NotDefined)).is_not_defined());
        assert!(format_error("a", &rsp(ErrorCode::PreconditionFailed)).is_precondition_failed());
        assert!(matches!(
            format_error("a", &rsp(ErrorCode::BadRequest)).kind(),
            ErrorKind::ActionInternalError(_)
        ));
        assert!(matches!(
            format_error("a", &rsp(ErrorCode::Busy)).kind(),
            ErrorKind::ActionBusy(_)
        ));

        let unknown = ActionResponse {
            error: "exploded".to_string(),
            message: "boom".to_string(),
            ..ActionResponse::default()
        };
        let err = format_error("a", &unknown);
        assert!(matches!(err.kind(), ErrorKind::AgentError(code, _) if code == "exploded"));
        assert_eq!(err.to_string(), "action: a, error: boom: exploded");
    }
}
