//! The orchestration dispatcher.
//!
//! Translates validated control-plane intents into agent RPCs or
//! cluster-scheduler calls, selected by orchestration mode. Application
//! lifecycle intents follow the mode; network intents (interfaces,
//! traffic policy, DNS) always go to the per-node agent over its
//! reverse-dial connection.

use std::collections::BTreeSet;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use common::entities::{Application, DnsConfig, NetworkInterface, TrafficPolicy};

use crate::agent::{
    AgentHandle, ApplicationDeploymentClient, ApplicationLifecycleClient, DnsServiceClient,
    InterfaceServiceClient, LifecycleStatus, TrafficPolicyClient,
};
use crate::error::{Error, Result};
use crate::k8s::Scheduler;
use crate::registry::AgentRegistry;

/// How application workloads are orchestrated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestrationMode {
    /// Every intent goes to the node-local agent.
    Native,
    /// Application lifecycle goes to the cluster scheduler.
    Kubernetes,
    /// Like [`Kubernetes`](Self::Kubernetes), with the OVN network overlay.
    KubernetesOvn,
}

impl OrchestrationMode {
    fn is_cluster(&self) -> bool {
        !matches!(self, OrchestrationMode::Native)
    }

    /// Canonical flag spelling.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrchestrationMode::Native => "native",
            OrchestrationMode::Kubernetes => "kubernetes",
            OrchestrationMode::KubernetesOvn => "kubernetes-ovn",
        }
    }
}

impl FromStr for OrchestrationMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "native" => Ok(OrchestrationMode::Native),
            "kubernetes" => Ok(OrchestrationMode::Kubernetes),
            "kubernetes-ovn" => Ok(OrchestrationMode::KubernetesOvn),
            other => anyhow::bail!("invalid orchestration mode {other}"),
        }
    }
}

/// Default time a dial waits for an absent node to reconnect.
pub const DIAL_TIMEOUT: Duration = Duration::from_secs(10);

/// Default time an in-flight agent RPC may take.
pub const RPC_TIMEOUT: Duration = Duration::from_secs(30);

/// Mode-selected strategy over the agent and scheduler backends.
pub struct Dispatcher {
    mode: OrchestrationMode,
    registry: AgentRegistry,
    scheduler: Option<Scheduler>,
    dial_timeout: Duration,
    rpc_timeout: Duration,
}

impl Dispatcher {
    /// Build a dispatcher for the selected mode.
    pub fn new(mode: OrchestrationMode, registry: AgentRegistry, scheduler: Option<Scheduler>) -> Self {
        Self {
            mode,
            registry,
            scheduler,
            dial_timeout: DIAL_TIMEOUT,
            rpc_timeout: RPC_TIMEOUT,
        }
    }

    /// Override the dial and RPC timeouts (tests).
    pub fn with_timeouts(mut self, dial: Duration, rpc: Duration) -> Self {
        self.dial_timeout = dial;
        self.rpc_timeout = rpc;
        self
    }

    /// The selected mode.
    pub fn mode(&self) -> OrchestrationMode {
        self.mode
    }

    /// Startup liveness check against the selected backend.
    pub async fn ensure_ready(&self) -> Result<()> {
        if self.mode.is_cluster() {
            self.scheduler()?.ping().await?;
        }
        Ok(())
    }

    fn scheduler(&self) -> Result<&Scheduler> {
        self.scheduler.as_ref().ok_or_else(|| {
            Error::Internal(format!(
                "orchestration mode {} requires a cluster scheduler client",
                self.mode.as_str()
            ))
        })
    }

    async fn dial(&self, node_id: &str) -> Result<AgentHandle> {
        let node_id = Uuid::try_parse(node_id)
            .map_err(|_| Error::NotFound(format!("node {node_id}")))?;
        self.registry.dial(node_id, self.dial_timeout).await
    }

    /// Deploy an application to a node.
    pub async fn deploy_app(&self, node_id: &str, app: &Application) -> Result<()> {
        if self.mode.is_cluster() {
            return self
                .scheduler()?
                .deploy(node_id, app)
                .await
                .map_err(|err| err.wrap("error deploying application"));
        }
        let conn = self.dial(node_id).await?;
        ApplicationDeploymentClient::new(&conn, self.rpc_timeout)
            .deploy(app)
            .await
    }

    /// Remove a deployed application from a node.
    pub async fn undeploy_app(&self, node_id: &str, app_id: &str) -> Result<()> {
        if self.mode.is_cluster() {
            return self
                .scheduler()?
                .undeploy(app_id)
                .await
                .map_err(|err| err.wrap("error undeploying application"));
        }
        let conn = self.dial(node_id).await?;
        ApplicationDeploymentClient::new(&conn, self.rpc_timeout)
            .undeploy(app_id)
            .await
    }

    /// Start a deployed application.
    pub async fn start_app(&self, node_id: &str, app_id: &str) -> Result<()> {
        if self.mode.is_cluster() {
            return self
                .scheduler()?
                .start(app_id)
                .await
                .map_err(|err| err.wrap("error starting application"));
        }
        let conn = self.dial(node_id).await?;
        ApplicationLifecycleClient::new(&conn, self.rpc_timeout)
            .start(app_id)
            .await
    }

    /// Stop a running application.
    pub async fn stop_app(&self, node_id: &str, app_id: &str) -> Result<()> {
        if self.mode.is_cluster() {
            return self
                .scheduler()?
                .stop(app_id)
                .await
                .map_err(|err| err.wrap("error stopping application"));
        }
        let conn = self.dial(node_id).await?;
        ApplicationLifecycleClient::new(&conn, self.rpc_timeout)
            .stop(app_id)
            .await
    }

    /// Restart a running application.
    pub async fn restart_app(&self, node_id: &str, app_id: &str) -> Result<()> {
        if self.mode.is_cluster() {
            return self
                .scheduler()?
                .restart(app_id)
                .await
                .map_err(|err| err.wrap("error restarting application"));
        }
        let conn = self.dial(node_id).await?;
        ApplicationLifecycleClient::new(&conn, self.rpc_timeout)
            .restart(app_id)
            .await
    }

    /// Read the application's status at call time. Status is never
    /// cached.
    pub async fn app_status(&self, node_id: &str, app_id: &str) -> Result<LifecycleStatus> {
        if self.mode.is_cluster() {
            return self
                .scheduler()?
                .status(app_id)
                .await
                .map_err(|err| err.wrap("error retrieving application"));
        }
        let conn = self.dial(node_id).await?;
        ApplicationLifecycleClient::new(&conn, self.rpc_timeout)
            .get_status(app_id)
            .await
    }

    /// Replace a node's interface set, all-or-nothing.
    ///
    /// The request must carry exactly the interface ids known for the
    /// node; any mismatch fails the whole request before dispatch and
    /// no partial mutation is performed. The agent enforces the same
    /// precondition on its side.
    pub async fn bulk_update_interfaces(
        &self,
        node_id: &str,
        requested: &[NetworkInterface],
        known: &[NetworkInterface],
    ) -> Result<()> {
        let prefix = "error bulk updating network interfaces";

        let requested_ids: BTreeSet<&str> =
            requested.iter().map(|iface| iface.id.as_str()).collect();
        for iface in known {
            if !requested_ids.contains(iface.id.as_str()) {
                return Err(Error::Precondition(format!(
                    "Network Interface {} missing from request",
                    iface.id
                ))
                .wrap(prefix));
            }
        }
        let known_ids: BTreeSet<&str> = known.iter().map(|iface| iface.id.as_str()).collect();
        for iface in requested {
            if !known_ids.contains(iface.id.as_str()) {
                return Err(Error::Precondition(format!(
                    "Network Interface {} does not exist on node",
                    iface.id
                ))
                .wrap(prefix));
            }
        }

        let conn = self.dial(node_id).await.map_err(|err| err.wrap(prefix))?;
        InterfaceServiceClient::new(&conn, self.rpc_timeout)
            .bulk_update(requested)
            .await
            .map_err(|err| err.wrap(prefix))
    }

    /// Apply (or clear) a traffic policy on an application.
    pub async fn set_app_policy(
        &self,
        node_id: &str,
        app_id: &str,
        policy: Option<&TrafficPolicy>,
    ) -> Result<()> {
        let conn = self.dial(node_id).await?;
        TrafficPolicyClient::new(&conn, self.rpc_timeout)
            .set_app_policy(app_id, policy)
            .await
    }

    /// Apply (or clear) a traffic policy on an interface.
    pub async fn set_interface_policy(
        &self,
        node_id: &str,
        interface_id: &str,
        policy: Option<&TrafficPolicy>,
    ) -> Result<()> {
        let conn = self.dial(node_id).await?;
        TrafficPolicyClient::new(&conn, self.rpc_timeout)
            .set_interface_policy(interface_id, policy)
            .await
    }

    /// Push a DNS configuration to a node.
    pub async fn set_dns(&self, node_id: &str, config: &DnsConfig) -> Result<()> {
        let conn = self.dial(node_id).await?;
        DnsServiceClient::new(&conn, self.rpc_timeout)
            .set_config(config)
            .await
    }

    /// Remove a DNS configuration from a node.
    pub async fn remove_dns(&self, node_id: &str, config_id: &str) -> Result<()> {
        let conn = self.dial(node_id).await?;
        DnsServiceClient::new(&conn, self.rpc_timeout)
            .remove_config(config_id)
            .await
    }

    /// Resolve a pod IP to the application id it runs (cluster modes).
    pub async fn container_by_ip(&self, ip: &str) -> Result<String> {
        if ip.is_empty() {
            return Err(Error::InvalidArgument("ip cannot be empty".into()));
        }
        if !self.mode.is_cluster() {
            return Err(Error::Precondition(
                "container lookup by IP requires a cluster orchestration mode".into(),
            ));
        }
        let pod = self.scheduler()?.pod_by_ip(ip).await?;
        Ok(pod.app_id)
    }
}
