//! Transports used to reach the agent sidecar of a pod.

use crate::config::AgentConfig;
use crate::errors::*;
use crate::proto::{ActionRequest, ActionResponse};
use async_trait::async_trait;
use futures::future::{self, Either};
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::{header, Method, Request};
use hyper_util::rt::TokioIo;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, Portforwarder};
use kube::{Client, ResourceExt};
use log::debug;
use std::fmt;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};

/// Address of an agent inside a pod.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: i32,
}

impl Endpoint {
    pub fn url(&self, path: &str) -> String {
        if self.host.contains(':') {
            format!("http://[{}]:{}{}", self.host, self.port, path)
        } else {
            format!("http://{}:{}{}", self.host, self.port, path)
        }
    }
}

/// One connection to one agent. Dropped after a single action call.
#[async_trait]
pub trait AgentClient: Send {
    async fn action(&mut self, req: &ActionRequest) -> Result<ActionResponse>;

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
pub trait AgentConnector: Send + Sync {
    async fn connect(&self, pod: &Pod, endpoint: &Endpoint) -> Result<Box<dyn AgentClient>>;
}

/// How the dispatcher reaches pods. Chosen by the caller, never probed.
#[derive(Clone)]
pub enum TransportMode {
    /// Plain HTTP to the pod IP; only routable from inside the cluster.
    InCluster,
    /// Tunnel through the API server's port-forward subresource.
    PortForward(Client),
    Custom(Arc<dyn AgentConnector>),
}

impl fmt::Debug for TransportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportMode::InCluster => f.write_str("InCluster"),
            TransportMode::PortForward(_) => f.write_str("PortForward"),
            TransportMode::Custom(_) => f.write_str("Custom"),
        }
    }
}

impl TransportMode {
    pub fn connector(&self, cfg: &AgentConfig) -> Result<Arc<dyn AgentConnector>> {
        Ok(match self {
            TransportMode::InCluster => Arc::new(HttpConnector::new(cfg)?),
            TransportMode::PortForward(client) => {
                Arc::new(PortForwardConnector::new(client.clone(), cfg))
            }
            TransportMode::Custom(connector) => connector.clone(),
        })
    }
}

pub struct HttpConnector {
    client: reqwest::Client,
    cfg: AgentConfig,
}

impl HttpConnector {
    pub fn new(cfg: &AgentConfig) -> Result<Self> {
        // pod IPs are dialed directly
        let client = reqwest::Client::builder().no_proxy().build()?;
        Ok(HttpConnector {
            client,
            cfg: cfg.clone(),
        })
    }
}

#[async_trait]
impl AgentConnector for HttpConnector {
    async fn connect(&self, _pod: &Pod, endpoint: &Endpoint) -> Result<Box<dyn AgentClient>> {
        Ok(Box::new(HttpClient {
            client: self.client.clone(),
            url: endpoint.url(&self.cfg.action_path),
            cfg: self.cfg.clone(),
        }))
    }
}

struct HttpClient {
    client: reqwest::Client,
    url: String,
    cfg: AgentConfig,
}

#[async_trait]
impl AgentClient for HttpClient {
    async fn action(&mut self, req: &ActionRequest) -> Result<ActionResponse> {
        debug!("POST {} action={}", self.url, req.action);
        let rsp = self
            .client
            .post(&self.url)
            .timeout(self.cfg.call_timeout(req))
            .json(req)
            .send()
            .await?
            .error_for_status()?;
        Ok(rsp.json::<ActionResponse>().await?)
    }
}

pub struct PortForwardConnector {
    client: Client,
    cfg: AgentConfig,
}

impl PortForwardConnector {
    pub fn new(client: Client, cfg: &AgentConfig) -> Self {
        PortForwardConnector {
            client,
            cfg: cfg.clone(),
        }
    }
}

#[async_trait]
impl AgentConnector for PortForwardConnector {
    async fn connect(&self, pod: &Pod, endpoint: &Endpoint) -> Result<Box<dyn AgentClient>> {
        let name = pod.name_any();
        let ns = pod.namespace().unwrap_or_default();
        let port = u16::try_from(endpoint.port)
            .chain_err(|| format!("invalid agent port {} of pod {}", endpoint.port, name))?;
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), &ns);
        let forwarder = pods
            .portforward(&name, &[port])
            .await
            .chain_err(|| format!("failed to port-forward to pod {}", name))?;
        Ok(Box::new(PortForwardClient {
            forwarder: Some(forwarder),
            port,
            cfg: self.cfg.clone(),
        }))
    }
}

struct PortForwardClient {
    forwarder: Option<Portforwarder>,
    port: u16,
    cfg: AgentConfig,
}

#[async_trait]
impl AgentClient for PortForwardClient {
    async fn action(&mut self, req: &ActionRequest) -> Result<ActionResponse> {
        let forwarder = self.forwarder.as_mut().ok_or("port-forward is closed")?;
        let stream = forwarder
            .take_stream(self.port)
            .ok_or_else(|| format!("port {} is not forwarded", self.port))?;
        let timeout = self.cfg.call_timeout(req);
        tokio::time::timeout(timeout, exchange(stream, &self.cfg.action_path, req))
            .await
            .chain_err(|| format!("agent request timed out after {:?}", timeout))?
    }

    // An aborted forwarder reports the cancellation from join(), so it is
    // only aborted and dropped.
    async fn close(&mut self) -> Result<()> {
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }
        Ok(())
    }
}

// HTTP/1 over an arbitrary byte stream; the connection is driven alongside the
// request and dropped as soon as the response body is read.
async fn exchange<S>(stream: S, path: &str, req: &ActionRequest) -> Result<ActionResponse>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream)).await?;
    let request = Request::builder()
        .method(Method::POST)
        .uri(path)
        .header(header::HOST, "localhost")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Full::new(Bytes::from(serde_json::to_vec(req)?)))?;

    match future::select(Box::pin(send(sender, request)), Box::pin(conn)).await {
        Either::Left((rsp, _)) => rsp,
        Either::Right((closed, pending)) => {
            closed?;
            pending.await
        }
    }
}

async fn send(
    mut sender: hyper::client::conn::http1::SendRequest<Full<Bytes>>,
    request: Request<Full<Bytes>>,
) -> Result<ActionResponse> {
    let rsp = sender.send_request(request).await?;
    let status = rsp.status();
    let body = rsp.into_body().collect().await?.to_bytes();
    if !status.is_success() {
        bail!(
            "agent responded with {}: {}",
            status,
            String::from_utf8_lossy(&body)
        );
    }
    Ok(serde_json::from_slice(&body)?)
}
