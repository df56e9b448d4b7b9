use super::Scope;
use crate::constant::{
    cluster_component_name, pod_fqdn, short_component_name, APP_INSTANCE_LABEL_KEY,
    COMPONENT_SCALE_IN_ANNOTATION_KEY,
};
use crate::crd::Component;
use crate::errors::*;
use crate::reader::{self, Reader};
use kube::ResourceExt;
use std::collections::BTreeMap;

pub const COMPONENT_LIST: &str = "KB_CLUSTER_COMPONENT_LIST";
pub const DELETING_COMPONENT_LIST: &str = "KB_CLUSTER_COMPONENT_DELETING_LIST";
pub const UNDELETED_COMPONENT_LIST: &str = "KB_CLUSTER_COMPONENT_UNDELETED_LIST";
pub const COMPONENT_IS_SCALING_IN: &str = "KB_CLUSTER_COMPONENT_IS_SCALING_IN";

pub const SWITCHOVER_CURRENT_NAME: &str = "KB_SWITCHOVER_CURRENT_NAME";
pub const SWITCHOVER_CURRENT_FQDN: &str = "KB_SWITCHOVER_CURRENT_FQDN";
pub const SWITCHOVER_ROLE: &str = "KB_SWITCHOVER_ROLE";
pub const SWITCHOVER_CANDIDATE_NAME: &str = "KB_SWITCHOVER_CANDIDATE_NAME";
pub const SWITCHOVER_CANDIDATE_FQDN: &str = "KB_SWITCHOVER_CANDIDATE_FQDN";

pub const JOIN_MEMBER_POD_NAME: &str = "KB_JOIN_MEMBER_POD_NAME";
pub const JOIN_MEMBER_POD_FQDN: &str = "KB_JOIN_MEMBER_POD_FQDN";
pub const LEAVE_MEMBER_POD_NAME: &str = "KB_LEAVE_MEMBER_POD_NAME";
pub const LEAVE_MEMBER_POD_FQDN: &str = "KB_LEAVE_MEMBER_POD_FQDN";

pub const ACCOUNT_STATEMENT: &str = "KB_ACCOUNT_STATEMENT";
pub const ACCOUNT_NAME: &str = "KB_ACCOUNT_NAME";
pub const ACCOUNT_PASSWORD: &str = "KB_ACCOUNT_PASSWORD";

pub const CONFIG_FILES_CREATED: &str = "KB_CONFIG_FILES_CREATED";
pub const CONFIG_FILES_REMOVED: &str = "KB_CONFIG_FILES_REMOVED";
pub const CONFIG_FILES_UPDATED: &str = "KB_CONFIG_FILES_UPDATED";

/// Config files touched by a reconfiguration.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConfigFileChanges {
    pub created: Vec<String>,
    pub removed: Vec<String>,
    /// file name and checksum of its new content
    pub updated: Vec<(String, String)>,
}

/// One entry of the action catalog. Carries whatever the action needs to
/// compute its system parameters.
#[derive(Clone, Debug, PartialEq)]
pub enum LifecycleAction {
    PostProvision(Scope),
    PreTerminate(Scope),
    RoleProbe,
    Switchover {
        scope: Scope,
        role: String,
        current: String,
        candidate: Option<String>,
    },
    MemberJoin {
        scope: Scope,
        pod: String,
    },
    MemberLeave {
        scope: Scope,
        pod: String,
    },
    DataDump,
    DataLoad,
    Reconfigure(ConfigFileChanges),
    AccountProvision {
        statement: String,
        user: String,
        password: String,
    },
    UserDefined {
        name: String,
        args: BTreeMap<String, String>,
    },
    ShardPostProvision,
    ShardPreTerminate,
    ShardAdd,
    ShardRemove,
}

impl LifecycleAction {
    /// Name sent on the wire.
    pub fn name(&self) -> String {
        match self {
            LifecycleAction::PostProvision(_) => "postProvision".to_string(),
            LifecycleAction::PreTerminate(_) => "preTerminate".to_string(),
            LifecycleAction::RoleProbe => "roleProbe".to_string(),
            LifecycleAction::Switchover { .. } => "switchover".to_string(),
            LifecycleAction::MemberJoin { .. } => "memberJoin".to_string(),
            LifecycleAction::MemberLeave { .. } => "memberLeave".to_string(),
            LifecycleAction::DataDump => "dataDump".to_string(),
            LifecycleAction::DataLoad => "dataLoad".to_string(),
            LifecycleAction::Reconfigure(_) => "reconfigure".to_string(),
            LifecycleAction::AccountProvision { .. } => "accountProvision".to_string(),
            LifecycleAction::UserDefined { name, .. } => format!("udf-{}", name),
            LifecycleAction::ShardPostProvision => "shardPostProvision".to_string(),
            LifecycleAction::ShardPreTerminate => "shardPreTerminate".to_string(),
            LifecycleAction::ShardAdd => "shardAdd".to_string(),
            LifecycleAction::ShardRemove => "shardRemove".to_string(),
        }
    }

    pub async fn parameters(&self, reader: &dyn Reader) -> Result<BTreeMap<String, String>> {
        let mut m = BTreeMap::new();
        match self {
            LifecycleAction::PostProvision(scope) => {
                component_lists(reader, scope, &mut m).await?;
            }
            LifecycleAction::PreTerminate(scope) => {
                let comps = component_lists(reader, scope, &mut m).await?;
                let own = cluster_component_name(&scope.cluster_name, &scope.comp_name);
                let scaling_in = comps
                    .iter()
                    .find(|c| c.name_any() == own)
                    .and_then(|c| c.annotations().get(COMPONENT_SCALE_IN_ANNOTATION_KEY));
                if let Some(v) = scaling_in {
                    m.insert(COMPONENT_IS_SCALING_IN.to_string(), v.clone());
                }
            }
            LifecycleAction::Switchover {
                scope,
                role,
                current,
                candidate,
            } => {
                m.insert(SWITCHOVER_CURRENT_NAME.to_string(), current.clone());
                m.insert(SWITCHOVER_CURRENT_FQDN.to_string(), fqdn(scope, current));
                m.insert(SWITCHOVER_ROLE.to_string(), role.clone());
                if let Some(candidate) = candidate {
                    m.insert(SWITCHOVER_CANDIDATE_NAME.to_string(), candidate.clone());
                    m.insert(SWITCHOVER_CANDIDATE_FQDN.to_string(), fqdn(scope, candidate));
                }
            }
            LifecycleAction::MemberJoin { scope, pod } => {
                m.insert(JOIN_MEMBER_POD_NAME.to_string(), pod.clone());
                m.insert(JOIN_MEMBER_POD_FQDN.to_string(), fqdn(scope, pod));
            }
            LifecycleAction::MemberLeave { scope, pod } => {
                m.insert(LEAVE_MEMBER_POD_NAME.to_string(), pod.clone());
                m.insert(LEAVE_MEMBER_POD_FQDN.to_string(), fqdn(scope, pod));
            }
            LifecycleAction::Reconfigure(changes) => {
                m.insert(CONFIG_FILES_CREATED.to_string(), changes.created.join(","));
                m.insert(CONFIG_FILES_REMOVED.to_string(), changes.removed.join(","));
                let updated: Vec<String> = changes
                    .updated
                    .iter()
                    .map(|(file, checksum)| format!("{}:{}", file, checksum))
                    .collect();
                m.insert(CONFIG_FILES_UPDATED.to_string(), updated.join(","));
            }
            LifecycleAction::AccountProvision {
                statement,
                user,
                password,
            } => {
                m.insert(ACCOUNT_STATEMENT.to_string(), statement.clone());
                m.insert(ACCOUNT_NAME.to_string(), user.clone());
                m.insert(ACCOUNT_PASSWORD.to_string(), password.clone());
            }
            LifecycleAction::UserDefined { args, .. } => {
                m.extend(args.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
            LifecycleAction::RoleProbe
            | LifecycleAction::DataDump
            | LifecycleAction::DataLoad
            | LifecycleAction::ShardPostProvision
            | LifecycleAction::ShardPreTerminate
            | LifecycleAction::ShardAdd
            | LifecycleAction::ShardRemove => {}
        }
        Ok(m)
    }
}

fn fqdn(scope: &Scope, pod: &str) -> String {
    pod_fqdn(
        &scope.namespace,
        &scope.cluster_name,
        &scope.comp_name,
        pod,
        &scope.cluster_domain,
    )
}

// Fills the three component lists of the cluster, in listing order, and
// hands back the listed components for callers that need more.
async fn component_lists(
    reader: &dyn Reader,
    scope: &Scope,
    m: &mut BTreeMap<String, String>,
) -> Result<Vec<Component>> {
    let mut labels = BTreeMap::new();
    labels.insert(APP_INSTANCE_LABEL_KEY.to_string(), scope.cluster_name.clone());
    let comps: Vec<Component> = reader::list(reader, &scope.namespace, &labels)
        .await
        .chain_err(|| format!("failed to list components of cluster {}", scope.cluster_name))?;

    let mut all = vec![];
    let mut deleting = vec![];
    let mut undeleted = vec![];
    for comp in &comps {
        let name = short_component_name(&scope.cluster_name, &comp.name_any(), comp.labels());
        if comp.metadata.deletion_timestamp.is_some() {
            deleting.push(name.clone());
        } else {
            undeleted.push(name.clone());
        }
        all.push(name);
    }
    m.insert(COMPONENT_LIST.to_string(), all.join(","));
    m.insert(DELETING_COMPONENT_LIST.to_string(), deleting.join(","));
    m.insert(UNDELETED_COMPONENT_LIST.to_string(), undeleted.join(","));
    Ok(comps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{component, MemoryReader};

    fn scope() -> Scope {
        Scope::new("demo", "pg", "postgresql")
    }

    #[test]
    fn wire_names() {
        assert_eq!(LifecycleAction::PostProvision(scope()).name(), "postProvision");
        assert_eq!(LifecycleAction::RoleProbe.name(), "roleProbe");
        assert_eq!(LifecycleAction::ShardPreTerminate.name(), "shardPreTerminate");
        let udf = LifecycleAction::UserDefined {
            name: "backup".to_string(),
            args: BTreeMap::new(),
        };
        assert_eq!(udf.name(), "udf-backup");
    }

    #[tokio::test]
    async fn switchover_parameters() {
        let reader = MemoryReader::default();
        let lfa = LifecycleAction::Switchover {
            scope: scope(),
            role: "primary".to_string(),
            current: "pg-postgresql-0".to_string(),
            candidate: Some("pg-postgresql-1".to_string()),
        };
        let m = lfa.parameters(&reader).await.unwrap();
        assert_eq!(m[SWITCHOVER_CURRENT_NAME], "pg-postgresql-0");
        assert_eq!(
            m[SWITCHOVER_CURRENT_FQDN],
            "pg-postgresql-0.pg-postgresql-headless.demo.svc.cluster.local"
        );
        assert_eq!(m[SWITCHOVER_ROLE], "primary");
        assert_eq!(
            m[SWITCHOVER_CANDIDATE_FQDN],
            "pg-postgresql-1.pg-postgresql-headless.demo.svc.cluster.local"
        );

        let lfa = LifecycleAction::Switchover {
            scope: scope(),
            role: "primary".to_string(),
            current: "pg-postgresql-0".to_string(),
            candidate: None,
        };
        let m = lfa.parameters(&reader).await.unwrap();
        assert!(!m.contains_key(SWITCHOVER_CANDIDATE_NAME));
        assert_eq!(m.len(), 3);
    }

    #[tokio::test]
    async fn component_lists_follow_listing_order() {
        let mut reader = MemoryReader::default();
        reader.add(&component("demo", "pg", "postgresql", None));
        let mut proxy = component("demo", "pg", "proxy", None);
        proxy.metadata.deletion_timestamp =
            Some(serde_json::from_value(serde_json::json!("2024-05-01T10:00:00Z")).unwrap());
        reader.add(&proxy);
        reader.add(&component("other", "pg", "ignored", None));

        let m = LifecycleAction::PostProvision(scope())
            .parameters(&reader)
            .await
            .unwrap();
        assert_eq!(m[COMPONENT_LIST], "postgresql,proxy");
        assert_eq!(m[DELETING_COMPONENT_LIST], "proxy");
        assert_eq!(m[UNDELETED_COMPONENT_LIST], "postgresql");
        assert!(!m.contains_key(COMPONENT_IS_SCALING_IN));
    }

    #[tokio::test]
    async fn pre_terminate_reports_scale_in() {
        let mut reader = MemoryReader::default();
        let mut own = component("demo", "pg", "postgresql", None);
        own.annotations_mut()
            .insert(COMPONENT_SCALE_IN_ANNOTATION_KEY.to_string(), "true".to_string());
        reader.add(&own);

        let m = LifecycleAction::PreTerminate(scope())
            .parameters(&reader)
            .await
            .unwrap();
        assert_eq!(m[COMPONENT_IS_SCALING_IN], "true");
        assert_eq!(m[COMPONENT_LIST], "postgresql");

        let m = LifecycleAction::PreTerminate(Scope::new("demo", "pg", "proxy"))
            .parameters(&reader)
            .await
            .unwrap();
        assert!(!m.contains_key(COMPONENT_IS_SCALING_IN));
        assert_eq!(m[UNDELETED_COMPONENT_LIST], "postgresql");
    }

    #[tokio::test]
    async fn reconfigure_and_account_parameters() {
        let reader = MemoryReader::default();
        let changes = ConfigFileChanges {
            created: vec!["a.conf".to_string()],
            removed: vec![],
            updated: vec![
                ("my.cnf".to_string(), "abc".to_string()),
                ("log.conf".to_string(), "def".to_string()),
            ],
        };
        let m = LifecycleAction::Reconfigure(changes)
            .parameters(&reader)
            .await
            .unwrap();
        assert_eq!(m[CONFIG_FILES_CREATED], "a.conf");
        assert_eq!(m[CONFIG_FILES_REMOVED], "");
        assert_eq!(m[CONFIG_FILES_UPDATED], "my.cnf:abc,log.conf:def");

        let m = LifecycleAction::AccountProvision {
            statement: "CREATE USER".to_string(),
            user: "root".to_string(),
            password: "secret".to_string(),
        }
        .parameters(&reader)
        .await
        .unwrap();
        assert_eq!(m[ACCOUNT_NAME], "root");
        assert_eq!(m[ACCOUNT_PASSWORD], "secret");
        assert_eq!(m[ACCOUNT_STATEMENT], "CREATE USER");
    }

    #[tokio::test]
    async fn probes_and_shard_actions_carry_nothing() {
        let reader = MemoryReader::default();
        for lfa in [
            LifecycleAction::RoleProbe,
            LifecycleAction::DataDump,
            LifecycleAction::ShardAdd,
            LifecycleAction::ShardRemove,
        ] {
            assert!(lfa.parameters(&reader).await.unwrap().is_empty());
        }
    }
}
