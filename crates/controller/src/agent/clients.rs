//! Typed wrappers over the agent command channel, one per agent-side
//! service.

use std::time::Duration;

use common::entities::{Application, DnsConfig, NetworkInterface, TrafficPolicy};
use proto::agent_command::Command;
use proto::agent_reply::Reply;

use crate::error::{Error, Result};

use super::{convert, expect_ack, AgentHandle, LifecycleStatus};

/// Deploys applications onto a node and removes them.
pub struct ApplicationDeploymentClient<'a> {
    handle: &'a AgentHandle,
    timeout: Duration,
}

impl<'a> ApplicationDeploymentClient<'a> {
    /// Wrap a dialed connection.
    pub fn new(handle: &'a AgentHandle, timeout: Duration) -> Self {
        Self { handle, timeout }
    }

    /// Deploy an application.
    pub async fn deploy(&self, app: &Application) -> Result<()> {
        let reply = self
            .handle
            .call(
                Command::Deploy(proto::DeployApplication {
                    app: Some(convert::to_pb_app(app)),
                }),
                self.timeout,
            )
            .await
            .map_err(|err| err.wrap("error deploying application"))?;
        expect_ack(reply)
    }

    /// Remove a deployed application.
    pub async fn undeploy(&self, app_id: &str) -> Result<()> {
        let reply = self
            .handle
            .call(
                Command::Undeploy(proto::ApplicationId {
                    id: app_id.to_string(),
                }),
                self.timeout,
            )
            .await
            .map_err(|err| err.wrap("error undeploying application"))?;
        expect_ack(reply)
    }
}

/// Starts, stops, restarts and inspects deployed applications.
pub struct ApplicationLifecycleClient<'a> {
    handle: &'a AgentHandle,
    timeout: Duration,
}

impl<'a> ApplicationLifecycleClient<'a> {
    /// Wrap a dialed connection.
    pub fn new(handle: &'a AgentHandle, timeout: Duration) -> Self {
        Self { handle, timeout }
    }

    async fn lifecycle(
        &self,
        app_id: &str,
        cmd: proto::lifecycle_command::Cmd,
        prefix: &str,
    ) -> Result<()> {
        let reply = self
            .handle
            .call(
                Command::Lifecycle(proto::LifecycleCommand {
                    id: app_id.to_string(),
                    cmd: cmd as i32,
                }),
                self.timeout,
            )
            .await
            .map_err(|err| err.wrap(prefix))?;
        expect_ack(reply)
    }

    /// Start a stopped application.
    pub async fn start(&self, app_id: &str) -> Result<()> {
        self.lifecycle(
            app_id,
            proto::lifecycle_command::Cmd::Start,
            "error starting application",
        )
        .await
    }

    /// Stop a running application.
    pub async fn stop(&self, app_id: &str) -> Result<()> {
        self.lifecycle(
            app_id,
            proto::lifecycle_command::Cmd::Stop,
            "error stopping application",
        )
        .await
    }

    /// Restart a running application.
    pub async fn restart(&self, app_id: &str) -> Result<()> {
        self.lifecycle(
            app_id,
            proto::lifecycle_command::Cmd::Restart,
            "error restarting application",
        )
        .await
    }

    /// Retrieve an application's status.
    pub async fn get_status(&self, app_id: &str) -> Result<LifecycleStatus> {
        let reply = self
            .handle
            .call(
                Command::GetStatus(proto::ApplicationId {
                    id: app_id.to_string(),
                }),
                self.timeout,
            )
            .await
            .map_err(|err| err.wrap("error retrieving application"))?;
        match reply {
            Reply::Status(status) => Ok(status.status().into()),
            other => Err(Error::Internal(format!(
                "unexpected agent reply: {other:?}"
            ))),
        }
    }
}

/// Replaces the node's interface configuration.
pub struct InterfaceServiceClient<'a> {
    handle: &'a AgentHandle,
    timeout: Duration,
}

impl<'a> InterfaceServiceClient<'a> {
    /// Wrap a dialed connection.
    pub fn new(handle: &'a AgentHandle, timeout: Duration) -> Self {
        Self { handle, timeout }
    }

    /// Replace every interface on the node. The agent enforces the
    /// all-or-nothing precondition as well.
    pub async fn bulk_update(&self, interfaces: &[NetworkInterface]) -> Result<()> {
        let reply = self
            .handle
            .call(
                Command::UpdateInterfaces(proto::BulkInterfaceUpdate {
                    interfaces: interfaces.iter().map(convert::to_pb_interface).collect(),
                }),
                self.timeout,
            )
            .await?;
        expect_ack(reply)
    }
}

/// Applies traffic policies to applications and interfaces.
pub struct TrafficPolicyClient<'a> {
    handle: &'a AgentHandle,
    timeout: Duration,
}

impl<'a> TrafficPolicyClient<'a> {
    /// Wrap a dialed connection.
    pub fn new(handle: &'a AgentHandle, timeout: Duration) -> Self {
        Self { handle, timeout }
    }

    /// Set (or, with `None`, clear) the policy for an application.
    pub async fn set_app_policy(
        &self,
        app_id: &str,
        policy: Option<&TrafficPolicy>,
    ) -> Result<()> {
        let reply = self
            .handle
            .call(
                Command::SetAppPolicy(proto::AppPolicySet {
                    app_id: app_id.to_string(),
                    policy: Some(convert::to_pb_traffic_policy(app_id, policy)),
                }),
                self.timeout,
            )
            .await
            .map_err(|err| err.wrap("error setting traffic policy"))?;
        expect_ack(reply)
    }

    /// Set (or, with `None`, clear) the policy for an interface.
    pub async fn set_interface_policy(
        &self,
        interface_id: &str,
        policy: Option<&TrafficPolicy>,
    ) -> Result<()> {
        let reply = self
            .handle
            .call(
                Command::SetInterfacePolicy(proto::InterfacePolicySet {
                    interface_id: interface_id.to_string(),
                    policy: Some(convert::to_pb_traffic_policy(interface_id, policy)),
                }),
                self.timeout,
            )
            .await
            .map_err(|err| err.wrap("error setting traffic policy"))?;
        expect_ack(reply)
    }
}

/// Pushes DNS configuration to the node resolver.
pub struct DnsServiceClient<'a> {
    handle: &'a AgentHandle,
    timeout: Duration,
}

impl<'a> DnsServiceClient<'a> {
    /// Wrap a dialed connection.
    pub fn new(handle: &'a AgentHandle, timeout: Duration) -> Self {
        Self { handle, timeout }
    }

    /// Apply a DNS configuration.
    pub async fn set_config(&self, config: &DnsConfig) -> Result<()> {
        let reply = self
            .handle
            .call(
                Command::SetDns(proto::DnsConfigSet {
                    config: Some(convert::to_pb_dns_config(config)),
                }),
                self.timeout,
            )
            .await
            .map_err(|err| err.wrap("error setting DNS configuration"))?;
        expect_ack(reply)
    }

    /// Remove a previously applied DNS configuration.
    pub async fn remove_config(&self, config_id: &str) -> Result<()> {
        let reply = self
            .handle
            .call(
                Command::RemoveDns(proto::DnsConfigId {
                    id: config_id.to_string(),
                }),
                self.timeout,
            )
            .await
            .map_err(|err| err.wrap("error removing DNS configuration"))?;
        expect_ack(reply)
    }
}
