//! Outbound RPC plumbing toward node agents.
//!
//! The transport is the node's own inbound `ControlStream`: commands are
//! sent down the stream with a generated command id and the agent's
//! replies are routed back to the waiting caller through a pending map.
//! Ordering is FIFO per node because all commands for a node share one
//! channel.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, Mutex, Notify};
use uuid::Uuid;

use proto::agent_command::Command;
use proto::agent_reply::Reply;
use proto::AgentCommand;

use crate::error::{self, Error, Result};

mod clients;
mod convert;

pub use clients::{
    ApplicationDeploymentClient, ApplicationLifecycleClient, DnsServiceClient,
    InterfaceServiceClient, TrafficPolicyClient,
};
pub use convert::{from_pb_interfaces, to_pb_app, to_pb_dns_config, to_pb_interface,
    to_pb_traffic_policy};

/// Lifecycle state of an application on a node or cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleStatus {
    /// State could not be determined.
    Unknown,
    /// Deployment in progress.
    Deploying,
    /// Deployed but not started.
    Deployed,
    /// Start in progress.
    Starting,
    /// Running.
    Running,
    /// Stop in progress.
    Stopping,
    /// Stopped.
    Stopped,
    /// Failed.
    Error,
    /// Not present.
    NotFound,
}

impl From<proto::lifecycle_status::Status> for LifecycleStatus {
    fn from(status: proto::lifecycle_status::Status) -> Self {
        use proto::lifecycle_status::Status;
        match status {
            Status::Unknown => LifecycleStatus::Unknown,
            Status::Deploying => LifecycleStatus::Deploying,
            Status::Deployed => LifecycleStatus::Deployed,
            Status::Starting => LifecycleStatus::Starting,
            Status::Running => LifecycleStatus::Running,
            Status::Stopping => LifecycleStatus::Stopping,
            Status::Stopped => LifecycleStatus::Stopped,
            Status::Error => LifecycleStatus::Error,
            Status::NotFound => LifecycleStatus::NotFound,
        }
    }
}

type PendingMap = Arc<Mutex<HashMap<String, oneshot::Sender<Reply>>>>;

/// A live reverse-dial connection to one node agent.
///
/// Cheap to clone; clones share the command channel and pending map.
#[derive(Clone)]
pub struct AgentHandle {
    node_id: Uuid,
    command_tx: mpsc::Sender<AgentCommand>,
    pending: PendingMap,
    closed_flag: Arc<AtomicBool>,
    closed: Arc<Notify>,
}

impl AgentHandle {
    /// Wrap a command sender for a freshly registered stream.
    pub fn new(node_id: Uuid, command_tx: mpsc::Sender<AgentCommand>) -> Self {
        Self {
            node_id,
            command_tx,
            pending: Arc::new(Mutex::new(HashMap::new())),
            closed_flag: Arc::new(AtomicBool::new(false)),
            closed: Arc::new(Notify::new()),
        }
    }

    /// The node this handle dispatches to.
    pub fn node_id(&self) -> Uuid {
        self.node_id
    }

    /// Send one command and await the matched reply.
    pub async fn call(&self, command: Command, timeout: Duration) -> Result<Reply> {
        let command_id = Uuid::new_v4().to_string();
        let (reply_tx, reply_rx) = oneshot::channel();
        self.pending
            .lock()
            .await
            .insert(command_id.clone(), reply_tx);

        let send_res = self
            .command_tx
            .send(AgentCommand {
                command_id: command_id.clone(),
                command: Some(command),
            })
            .await;
        if send_res.is_err() {
            self.pending.lock().await.remove(&command_id);
            return Err(Error::Unavailable(format!(
                "connection to node {} is closed",
                self.node_id
            )));
        }

        match tokio::time::timeout(timeout, reply_rx).await {
            Ok(Ok(reply)) => match reply {
                Reply::Failure(failure) => Err(error::from_code(failure.code, failure.message)),
                other => Ok(other),
            },
            Ok(Err(_canceled)) => Err(Error::Unavailable(format!(
                "connection to node {} was lost",
                self.node_id
            ))),
            Err(_elapsed) => {
                self.pending.lock().await.remove(&command_id);
                Err(Error::Unavailable(format!(
                    "node {} did not reply in time",
                    self.node_id
                )))
            }
        }
    }

    /// Route a reply from the inbound stream to its waiting caller.
    pub async fn resolve(&self, command_id: &str, reply: Reply) {
        let waiter = self.pending.lock().await.remove(command_id);
        match waiter {
            Some(tx) => {
                let _ = tx.send(reply);
            }
            None => {
                tracing::debug!(
                    node_id = %self.node_id,
                    command_id,
                    "dropping reply with no waiting caller"
                );
            }
        }
    }

    /// Mark the connection closed, waking its stream task and failing
    /// all in-flight callers.
    pub fn close(&self) {
        self.closed_flag.store(true, Ordering::SeqCst);
        self.closed.notify_waiters();
        let pending = self.pending.clone();
        tokio::spawn(async move {
            pending.lock().await.clear();
        });
    }

    /// Resolves when [`close`](Self::close) is called, including calls
    /// that raced ahead of this wait.
    pub async fn closed(&self) {
        while !self.closed_flag.load(Ordering::SeqCst) {
            let notified = self.closed.notified();
            tokio::pin!(notified);
            // Register interest before re-checking so a close between
            // the check and the await cannot be missed.
            notified.as_mut().enable();
            if self.closed_flag.load(Ordering::SeqCst) {
                return;
            }
            notified.await;
        }
    }

    /// Whether the agent side of the channel is gone.
    pub fn is_closed(&self) -> bool {
        self.closed_flag.load(Ordering::SeqCst) || self.command_tx.is_closed()
    }

    /// Whether two handles wrap the same underlying stream.
    pub fn same_channel(&self, other: &AgentHandle) -> bool {
        self.command_tx.same_channel(&other.command_tx)
    }
}

/// Expect an Ack reply, surfacing anything else as an internal error.
pub(crate) fn expect_ack(reply: Reply) -> Result<()> {
    match reply {
        Reply::Ack(_) => Ok(()),
        other => Err(Error::Internal(format!(
            "unexpected agent reply: {other:?}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proto::agent_command::Command;

    fn handle() -> (AgentHandle, mpsc::Receiver<AgentCommand>) {
        let (tx, rx) = mpsc::channel(8);
        (AgentHandle::new(Uuid::new_v4(), tx), rx)
    }

    #[tokio::test]
    async fn call_resolves_matched_replies() {
        let (handle, mut rx) = handle();
        let responder = handle.clone();
        let server = tokio::spawn(async move {
            let cmd = rx.recv().await.expect("command");
            assert!(matches!(cmd.command, Some(Command::Ping(_))));
            responder
                .resolve(&cmd.command_id, Reply::Ack(proto::Ack {}))
                .await;
        });

        let reply = handle
            .call(Command::Ping(proto::Ping {}), Duration::from_secs(1))
            .await
            .expect("reply");
        assert!(matches!(reply, Reply::Ack(_)));
        server.await.expect("server");
    }

    #[tokio::test]
    async fn failure_replies_carry_their_kind() {
        let (handle, mut rx) = handle();
        let responder = handle.clone();
        tokio::spawn(async move {
            let cmd = rx.recv().await.expect("command");
            responder
                .resolve(
                    &cmd.command_id,
                    Reply::Failure(proto::Failure {
                        code: tonic::Code::FailedPrecondition as i32,
                        message: "Network Interface if1 missing from request".into(),
                    }),
                )
                .await;
        });

        let err = handle
            .call(Command::Ping(proto::Ping {}), Duration::from_secs(1))
            .await
            .expect_err("failure");
        assert!(matches!(err, Error::Precondition(_)));
        assert_eq!(
            err.to_string(),
            "Network Interface if1 missing from request"
        );
    }

    #[tokio::test]
    async fn closed_channel_is_unavailable() {
        let (handle, rx) = handle();
        drop(rx);
        let err = handle
            .call(Command::Ping(proto::Ping {}), Duration::from_secs(1))
            .await
            .expect_err("closed");
        assert!(matches!(err, Error::Unavailable(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_calls_time_out() {
        let (handle, mut rx) = handle();
        tokio::spawn(async move {
            // Swallow the command and never reply.
            let _ = rx.recv().await;
            std::future::pending::<()>().await;
        });

        let err = handle
            .call(Command::Ping(proto::Ping {}), Duration::from_secs(5))
            .await
            .expect_err("timeout");
        assert!(matches!(err, Error::Unavailable(_)));
        assert!(handle.pending.lock().await.is_empty());
    }
}
