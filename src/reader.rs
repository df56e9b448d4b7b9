//! Read-only access to cluster objects.
//!
//! The dispatcher never talks to the API server directly for reads. Callers
//! hand it a `Reader`, which keeps every lookup behind one seam.

use crate::constant::label_selector;
use crate::errors::*;
use async_trait::async_trait;
use kube::api::{Api, ApiResource, DynamicObject, ListParams};
use kube::{Client, Resource};
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;

#[async_trait]
pub trait Reader: Send + Sync {
    async fn get(&self, resource: &ApiResource, namespace: &str, name: &str)
        -> Result<DynamicObject>;

    /// Lists objects in `namespace` carrying all of `labels`.
    async fn list(
        &self,
        resource: &ApiResource,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<DynamicObject>>;
}

pub async fn get<K>(reader: &dyn Reader, namespace: &str, name: &str) -> Result<K>
where
    K: Resource<DynamicType = ()> + DeserializeOwned,
{
    let ar = ApiResource::erase::<K>(&());
    let obj = reader.get(&ar, namespace, name).await?;
    parse(obj)
}

pub async fn list<K>(
    reader: &dyn Reader,
    namespace: &str,
    labels: &BTreeMap<String, String>,
) -> Result<Vec<K>>
where
    K: Resource<DynamicType = ()> + DeserializeOwned,
{
    let ar = ApiResource::erase::<K>(&());
    reader
        .list(&ar, namespace, labels)
        .await?
        .into_iter()
        .map(parse)
        .collect()
}

fn parse<K: DeserializeOwned>(obj: DynamicObject) -> Result<K> {
    Ok(serde_json::from_value(serde_json::to_value(obj)?)?)
}

/// Reader backed by the API server.
#[derive(Clone)]
pub struct KubeReader {
    client: Client,
}

impl KubeReader {
    pub fn new(client: Client) -> Self {
        KubeReader { client }
    }
}

#[async_trait]
impl Reader for KubeReader {
    async fn get(
        &self,
        resource: &ApiResource,
        namespace: &str,
        name: &str,
    ) -> Result<DynamicObject> {
        let api: Api<DynamicObject> = Api::namespaced_with(self.client.clone(), namespace, resource);
        Ok(api.get(name).await?)
    }

    async fn list(
        &self,
        resource: &ApiResource,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<DynamicObject>> {
        let api: Api<DynamicObject> = Api::namespaced_with(self.client.clone(), namespace, resource);
        let mut lp = ListParams::default();
        if !labels.is_empty() {
            lp = lp.labels(&label_selector(labels));
        }
        Ok(api.list(&lp).await?.items)
    }
}
