//! The cluster-scheduler port and its kubernetes client.
//!
//! In the cluster orchestration modes the edge nodes run as worker
//! nodes in a kubernetes cluster, labeled `node-id=<node id>`, and
//! every deployed workload is labeled with its application id. The
//! dispatcher consumes only the operations below; the scheduler itself
//! is an external collaborator.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use common::entities::Application;

use crate::agent::LifecycleStatus;
use crate::error::{Error, Result};

/// Label a node carries to map it back to a controller node id.
pub const NODE_ID_LABEL: &str = "node-id";

/// Label a workload carries to map it back to an application id.
pub const APP_ID_LABEL: &str = "app-id";

/// A scheduled workload resolved from a pod.
#[derive(Debug, Clone)]
pub struct PodInfo {
    /// Pod name.
    pub name: String,
    /// Controller node id of the hosting worker (from the node label).
    pub node_id: String,
    /// Application id (from the pod label).
    pub app_id: String,
}

/// Operations the orchestration dispatcher needs from a cluster
/// scheduler.
#[async_trait]
pub trait ClusterScheduler: Send + Sync {
    /// Liveness check run once at startup; a failure aborts startup.
    async fn ping(&self) -> Result<()>;
    /// Create the workload for an application on a labeled node.
    async fn deploy(&self, node_id: &str, app: &Application) -> Result<()>;
    /// Remove the workload.
    async fn undeploy(&self, app_id: &str) -> Result<()>;
    /// Scale the workload up.
    async fn start(&self, app_id: &str) -> Result<()>;
    /// Scale the workload down.
    async fn stop(&self, app_id: &str) -> Result<()>;
    /// Restart the workload's pods.
    async fn restart(&self, app_id: &str) -> Result<()>;
    /// Current lifecycle status, read at call time.
    async fn status(&self, app_id: &str) -> Result<LifecycleStatus>;
    /// Resolve a pod by its assigned IP.
    async fn pod_by_ip(&self, ip: &str) -> Result<PodInfo>;
}

/// Shared handle to the configured scheduler backend.
pub type Scheduler = Arc<dyn ClusterScheduler>;

/// Client TLS and endpoint configuration for the kubernetes API.
#[derive(Debug, Clone, Default)]
pub struct KubernetesConfig {
    /// API server host, e.g. `https://master:6443`.
    pub host: String,
    /// Optional path prefix in front of the standard API groups.
    pub api_path: String,
    /// Root CA bundle path for verifying the API server.
    pub ca_path: Option<PathBuf>,
    /// Client certificate path.
    pub cert_path: Option<PathBuf>,
    /// Client key path.
    pub key_path: Option<PathBuf>,
    /// Default user; sent as the impersonation header when set.
    pub username: String,
}

/// Kubernetes API client implementing the scheduler port.
pub struct KubernetesClient {
    base: String,
    http: reqwest::Client,
    username: String,
}

const NAMESPACE: &str = "default";

impl KubernetesClient {
    /// Build the client, loading certificate material from disk.
    pub fn from_config(config: &KubernetesConfig) -> anyhow::Result<Self> {
        if config.host.is_empty() {
            anyhow::bail!("kubernetes master host is required");
        }

        let mut builder = reqwest::Client::builder().use_rustls_tls();
        if let Some(ca_path) = &config.ca_path {
            let pem = std::fs::read(ca_path)?;
            builder = builder.add_root_certificate(reqwest::Certificate::from_pem(&pem)?);
        }
        if let (Some(cert_path), Some(key_path)) = (&config.cert_path, &config.key_path) {
            let mut pem = std::fs::read(cert_path)?;
            pem.extend(std::fs::read(key_path)?);
            builder = builder.identity(reqwest::Identity::from_pem(&pem)?);
        }

        let base = format!(
            "{}{}",
            config.host.trim_end_matches('/'),
            if config.api_path.is_empty() {
                String::new()
            } else {
                format!("/{}", config.api_path.trim_matches('/'))
            }
        );

        Ok(Self {
            base,
            http: builder.build()?,
            username: config.username.clone(),
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let mut req = self.http.request(method, format!("{}{path}", self.base));
        if !self.username.is_empty() {
            req = req.header("Impersonate-User", &self.username);
        }
        req
    }

    fn deployment_path(app_id: &str) -> String {
        format!("/apis/apps/v1/namespaces/{NAMESPACE}/deployments/app-{app_id}")
    }

    async fn scale(&self, app_id: &str, replicas: i64) -> Result<()> {
        let body = json!({ "spec": { "replicas": replicas } });
        let resp = self
            .request(
                reqwest::Method::PATCH,
                &format!("{}/scale", Self::deployment_path(app_id)),
            )
            .header("Content-Type", "application/merge-patch+json")
            .json(&body)
            .send()
            .await
            .map_err(transport)?;
        check(resp, app_id).await?;
        Ok(())
    }
}

fn transport(err: reqwest::Error) -> Error {
    Error::Unavailable(format!("kubernetes API unreachable: {err}"))
}

async fn check(resp: reqwest::Response, app_id: &str) -> Result<reqwest::Response> {
    match resp.status() {
        status if status.is_success() => Ok(resp),
        reqwest::StatusCode::NOT_FOUND => {
            Err(Error::NotFound(format!("application {app_id}")))
        }
        status => {
            let body = resp.text().await.unwrap_or_default();
            Err(Error::Internal(format!(
                "kubernetes API returned {status}: {body}"
            )))
        }
    }
}

#[async_trait]
impl ClusterScheduler for KubernetesClient {
    async fn ping(&self) -> Result<()> {
        let resp = self
            .request(reqwest::Method::GET, "/version")
            .send()
            .await
            .map_err(transport)?;
        if !resp.status().is_success() {
            return Err(Error::Unavailable(format!(
                "kubernetes API returned {}",
                resp.status()
            )));
        }
        Ok(())
    }

    async fn deploy(&self, node_id: &str, app: &Application) -> Result<()> {
        // Workloads are created scaled to zero; Start brings them up.
        let manifest = json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {
                "name": format!("app-{}", app.id),
                "labels": { APP_ID_LABEL: app.id },
            },
            "spec": {
                "replicas": 0,
                "selector": { "matchLabels": { APP_ID_LABEL: app.id } },
                "template": {
                    "metadata": { "labels": { APP_ID_LABEL: app.id } },
                    "spec": {
                        "nodeSelector": { NODE_ID_LABEL: node_id },
                        "containers": [{
                            "name": "app",
                            "image": app.source,
                            "resources": {
                                "limits": {
                                    "cpu": app.cores.to_string(),
                                    "memory": format!("{}Mi", app.memory),
                                },
                            },
                        }],
                    },
                },
            },
        });

        let resp = self
            .request(
                reqwest::Method::POST,
                &format!("/apis/apps/v1/namespaces/{NAMESPACE}/deployments"),
            )
            .json(&manifest)
            .send()
            .await
            .map_err(transport)?;
        if resp.status() == reqwest::StatusCode::CONFLICT {
            return Err(Error::Conflict(format!(
                "application {} already deployed",
                app.id
            )));
        }
        check(resp, &app.id).await?;
        Ok(())
    }

    async fn undeploy(&self, app_id: &str) -> Result<()> {
        let resp = self
            .request(reqwest::Method::DELETE, &Self::deployment_path(app_id))
            .send()
            .await
            .map_err(transport)?;
        check(resp, app_id).await?;
        Ok(())
    }

    async fn start(&self, app_id: &str) -> Result<()> {
        self.scale(app_id, 1).await
    }

    async fn stop(&self, app_id: &str) -> Result<()> {
        self.scale(app_id, 0).await
    }

    async fn restart(&self, app_id: &str) -> Result<()> {
        // Delete the workload's pods; the deployment recreates them.
        let resp = self
            .request(
                reqwest::Method::DELETE,
                &format!(
                    "/api/v1/namespaces/{NAMESPACE}/pods?labelSelector={APP_ID_LABEL}%3D{app_id}"
                ),
            )
            .send()
            .await
            .map_err(transport)?;
        check(resp, app_id).await?;
        Ok(())
    }

    async fn status(&self, app_id: &str) -> Result<LifecycleStatus> {
        let resp = self
            .request(reqwest::Method::GET, &Self::deployment_path(app_id))
            .send()
            .await
            .map_err(transport)?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(LifecycleStatus::NotFound);
        }
        let body: serde_json::Value = check(resp, app_id)
            .await?
            .json()
            .await
            .map_err(|err| Error::Internal(format!("malformed deployment object: {err}")))?;

        let replicas = body["spec"]["replicas"].as_i64().unwrap_or(0);
        let ready = body["status"]["readyReplicas"].as_i64().unwrap_or(0);
        Ok(deployment_status(replicas, ready))
    }

    async fn pod_by_ip(&self, ip: &str) -> Result<PodInfo> {
        let resp = self
            .request(
                reqwest::Method::GET,
                &format!("/api/v1/pods?fieldSelector=status.podIP%3D{ip}"),
            )
            .send()
            .await
            .map_err(transport)?;
        let body: serde_json::Value = check(resp, "")
            .await?
            .json()
            .await
            .map_err(|err| Error::Internal(format!("malformed pod list: {err}")))?;

        let Some(pod) = body["items"].as_array().and_then(|items| items.first()) else {
            return Err(Error::Internal("unable to get pod name by ip".into()));
        };

        let name = pod["metadata"]["name"].as_str().unwrap_or_default().to_string();
        let app_id = pod["metadata"]["labels"][APP_ID_LABEL]
            .as_str()
            .unwrap_or_default()
            .to_string();
        if app_id.is_empty() {
            return Err(Error::Internal(format!(
                "pod {name} carries no {APP_ID_LABEL} label"
            )));
        }

        // The node id comes from the hosting worker's label.
        let node_name = pod["spec"]["nodeName"].as_str().unwrap_or_default();
        let node_id = if node_name.is_empty() {
            String::new()
        } else {
            let resp = self
                .request(reqwest::Method::GET, &format!("/api/v1/nodes/{node_name}"))
                .send()
                .await
                .map_err(transport)?;
            let node: serde_json::Value = check(resp, "")
                .await?
                .json()
                .await
                .map_err(|err| Error::Internal(format!("malformed node object: {err}")))?;
            node["metadata"]["labels"][NODE_ID_LABEL]
                .as_str()
                .unwrap_or_default()
                .to_string()
        };

        Ok(PodInfo {
            name,
            node_id,
            app_id,
        })
    }
}

/// Map deployment scale and readiness to a lifecycle status.
fn deployment_status(replicas: i64, ready: i64) -> LifecycleStatus {
    if ready > 0 {
        LifecycleStatus::Running
    } else if replicas > 0 {
        LifecycleStatus::Starting
    } else {
        LifecycleStatus::Deployed
    }
}
