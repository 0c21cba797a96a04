//! gRPC surface: enrollment (pre-auth), the agent control stream and
//! controller lookups (post-auth), served behind the dual-SNI TLS
//! front end.

use std::pin::Pin;
use std::time::Duration;

use futures_util::Stream;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tonic::{Request, Response, Status, Streaming};
use uuid::Uuid;

use common::entities::{Entity, Kind, Record};
use proto::agent_dispatch_server::{AgentDispatch, AgentDispatchServer};
use proto::agent_reply::Reply;
use proto::controller_server::{Controller, ControllerServer};
use proto::enrollment_server::{Enrollment, EnrollmentServer};
use proto::{AgentCommand, AgentReply, ContainerInfo, ContainerIp, Credentials, Identity};

use crate::agent::{from_pb_interfaces, AgentHandle};
use crate::app_state::AppState;
use crate::enrollment;
use crate::tls::{AuthenticatedStream, PeerIdentity, TlsFrontEnd, TlsProfile};

const COMMAND_CHANNEL_CAPACITY: usize = 32;

/// Credential issuance, reachable without a client certificate on the
/// enrollment SNI only.
pub struct EnrollmentService {
    state: AppState,
}

#[tonic::async_trait]
impl Enrollment for EnrollmentService {
    async fn request_credentials(
        &self,
        request: Request<Identity>,
    ) -> Result<Response<Credentials>, Status> {
        let identity = peer_identity(&request)?;
        if identity.profile != TlsProfile::Enrollment {
            return Err(Status::permission_denied(
                "enrollment is only served on the enrollment server name",
            ));
        }

        let creds = enrollment::request_credentials(
            &self.state.store,
            &self.state.ca,
            &self.state.registry,
            &request.get_ref().csr,
        )
        .await
        .map_err(Status::from)?;

        Ok(Response::new(Credentials {
            certificate: creds.certificate,
            ca_chain: creds.ca_chain,
            ca_pool: creds.ca_pool,
        }))
    }
}

/// The reverse-dial registration point for authenticated agents.
pub struct AgentDispatchService {
    state: AppState,
}

#[tonic::async_trait]
impl AgentDispatch for AgentDispatchService {
    type ControlStreamStream =
        Pin<Box<dyn Stream<Item = Result<AgentCommand, Status>> + Send + 'static>>;

    async fn control_stream(
        &self,
        request: Request<Streaming<AgentReply>>,
    ) -> Result<Response<Self::ControlStreamStream>, Status> {
        let node_id = authenticated_node(&request)?;

        // Only enrolled nodes may register; the CN is authoritative.
        let known = self
            .state
            .store
            .read(Kind::Node, &node_id.to_string())
            .await
            .map_err(Status::from)?;
        if known.is_none() {
            return Err(Status::unauthenticated("unknown node"));
        }

        let mut inbound = request.into_inner();

        // The first message announces the node's interface inventory.
        let hello = match inbound.next().await {
            Some(Ok(AgentReply {
                reply: Some(Reply::Hello(hello)),
                ..
            })) => hello,
            Some(Ok(_)) => {
                return Err(Status::failed_precondition(
                    "control stream must open with a hello",
                ))
            }
            Some(Err(status)) => return Err(status),
            None => return Err(Status::aborted("control stream closed before hello")),
        };
        self.register_interfaces(node_id, &hello.interfaces)
            .await
            .map_err(Status::from)?;

        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let handle = AgentHandle::new(node_id, command_tx);
        self.state.registry.register(handle.clone()).await;
        tracing::info!(%node_id, "node connected");

        let registry = self.state.registry.clone();
        tokio::spawn(async move {
            let reason = loop {
                tokio::select! {
                    _ = handle.closed() => break "replaced",
                    message = inbound.next() => match message {
                        Some(Ok(reply)) => {
                            if let AgentReply { command_id, reply: Some(payload) } = reply {
                                handle.resolve(&command_id, payload).await;
                            }
                        }
                        Some(Err(status)) => {
                            tracing::debug!(%node_id, %status, "control stream errored");
                            break "stream error";
                        }
                        None => break "stream closed",
                    },
                }
            };
            registry.remove_conn(&handle, reason).await;
        });

        let outbound = ReceiverStream::new(command_rx).map(Ok);
        Ok(Response::new(Box::pin(outbound)))
    }
}

impl AgentDispatchService {
    /// Persist the interface inventory on first contact. The set is
    /// fixed afterwards; later bulk updates replace members in place.
    async fn register_interfaces(
        &self,
        node_id: Uuid,
        interfaces: &[proto::NetworkInterface],
    ) -> crate::error::Result<()> {
        let node_id = node_id.to_string();
        let existing = self
            .state
            .store
            .filter(Kind::NetworkInterface, &[("node_id", &node_id)])
            .await?;
        if !existing.is_empty() {
            return Ok(());
        }

        let records: Vec<Record> = from_pb_interfaces(&node_id, interfaces)
            .into_iter()
            .filter(|iface| {
                if let Err(err) = iface.validate() {
                    tracing::warn!(
                        %node_id,
                        interface = %iface.id,
                        %err,
                        "skipping invalid interface in hello"
                    );
                    return false;
                }
                true
            })
            .map(Record::NetworkInterface)
            .collect();
        if records.is_empty() {
            return Ok(());
        }
        self.state.store.bulk_update(records).await
    }
}

/// Authenticated controller-side lookups.
pub struct ControllerService {
    state: AppState,
}

#[tonic::async_trait]
impl Controller for ControllerService {
    async fn get_container_by_ip(
        &self,
        request: Request<ContainerIp>,
    ) -> Result<Response<ContainerInfo>, Status> {
        authenticated_node(&request)?;
        let id = self
            .state
            .dispatcher
            .container_by_ip(&request.get_ref().ip)
            .await
            .map_err(Status::from)?;
        Ok(Response::new(ContainerInfo { id }))
    }
}

fn peer_identity<T>(request: &Request<T>) -> Result<PeerIdentity, Status> {
    request
        .extensions()
        .get::<PeerIdentity>()
        .cloned()
        .ok_or_else(|| Status::internal("connection carries no TLS identity"))
}

fn authenticated_node<T>(request: &Request<T>) -> Result<Uuid, Status> {
    let identity = peer_identity(request)?;
    if identity.profile != TlsProfile::Authenticated {
        return Err(Status::unauthenticated(
            "a verified client certificate is required",
        ));
    }
    identity
        .node_id
        .ok_or_else(|| Status::unauthenticated("peer certificate CN is not a node id"))
}

/// Serve all gRPC services on the TLS front end until `shutdown`
/// resolves.
pub async fn serve<F>(
    state: AppState,
    listener: TcpListener,
    tls: TlsFrontEnd,
    shutdown: F,
) -> anyhow::Result<()>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let (conn_tx, conn_rx) = mpsc::channel::<Result<AuthenticatedStream, std::io::Error>>(16);

    // Accept loop: terminate TLS per connection off the listener task so
    // one slow handshake cannot stall accepts.
    let acceptor = tokio::spawn(async move {
        loop {
            let (tcp, remote) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(err) => {
                    tracing::warn!(%err, "gRPC accept failed");
                    continue;
                }
            };
            let conn_tx = conn_tx.clone();
            let tls = tls.clone();
            tokio::spawn(async move {
                match tls.accept(tcp).await {
                    Ok(stream) => {
                        let _ = conn_tx.send(Ok(stream)).await;
                    }
                    Err(err) => {
                        tracing::debug!(%remote, %err, "TLS handshake rejected");
                    }
                }
            });
        }
    });

    let result = tonic::transport::Server::builder()
        .http2_keepalive_interval(Some(Duration::from_secs(30)))
        .http2_keepalive_timeout(Some(Duration::from_secs(20)))
        .add_service(EnrollmentServer::new(EnrollmentService {
            state: state.clone(),
        }))
        .add_service(AgentDispatchServer::new(AgentDispatchService {
            state: state.clone(),
        }))
        .add_service(ControllerServer::new(ControllerService {
            state: state.clone(),
        }))
        .serve_with_incoming_shutdown(ReceiverStream::new(conn_rx), shutdown)
        .await;

    acceptor.abort();
    state.registry.drain().await;
    result.map_err(Into::into)
}
