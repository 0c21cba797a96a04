//! Credential issuance for pre-approved nodes.
//!
//! A node moves through `Unknown -> Preapproved(serial) -> Enrolled(id)
//! -> Connected`. The operator's POST creates the preapproved row with
//! the hardware serial; the node then submits a CSR whose subject CN
//! carries that serial. The node id is derived deterministically from
//! the CSR's public key, so re-enrolling with the same key re-uses the
//! same id, and the preapproved row is rebound to it.

use uuid::Uuid;
use x509_parser::prelude::*;

use common::entities::{Kind, Node, Record};

use crate::error::{Error, Result};
use crate::persistence::Store;
use crate::pki::RootCa;
use crate::registry::AgentRegistry;

/// Credentials returned once to the node at enrollment.
#[derive(Debug, Clone)]
pub struct NodeCredentials {
    /// PEM-encoded leaf certificate; CN is the node id.
    pub certificate: String,
    /// CA chain the node uses to trust the controller.
    pub ca_chain: Vec<String>,
    /// CA pool the node uses to verify peers.
    pub ca_pool: Vec<String>,
}

/// Handle one `RequestCredentials` call.
pub async fn request_credentials(
    store: &Store,
    ca: &RootCa,
    registry: &AgentRegistry,
    pem_csr: &str,
) -> Result<NodeCredentials> {
    if pem_csr.trim().is_empty() {
        return Err(Error::InvalidArgument("CSR cannot be empty".into()));
    }

    // Decode the PEM once; both parsing and signing consume the DER.
    let block = ::pem::parse(pem_csr.as_bytes())
        .map_err(|_| Error::InvalidArgument("unable to parse CSR".into()))?;
    if block.tag() != "CERTIFICATE REQUEST" {
        return Err(Error::InvalidArgument("unable to parse CSR".into()));
    }
    let der = block.contents();

    let (_, csr) = X509CertificationRequest::from_der(der)
        .map_err(|_| Error::InvalidArgument("unable to parse CSR".into()))?;
    csr.verify_signature()
        .map_err(|_| Error::InvalidArgument("unable to verify CSR signature".into()))?;

    // The id is a stable fingerprint of the node's public key.
    let spki = csr.certification_request_info.subject_pki.raw;
    let node_id = Uuid::new_v5(&Uuid::NAMESPACE_OID, spki);

    let node = find_node(store, &csr, node_id).await?;
    if node.id != node_id.to_string() {
        bind_node_id(store, node, node_id).await?;
    }

    let certificate = ca
        .sign_csr(der, &node_id.to_string())
        .map_err(|err| Error::Internal(err.to_string()))?;

    // Known from here on: dials block for the connection instead of
    // failing as unknown.
    registry.prime(node_id).await;
    tracing::info!(%node_id, "node enrolled");

    Ok(NodeCredentials {
        certificate,
        ca_chain: ca.ca_chain(),
        ca_pool: ca.ca_chain(),
    })
}

/// Locate the node record the CSR speaks for: by derived id for
/// re-enrollment, else by the pre-approved serial in the CSR subject.
async fn find_node(
    store: &Store,
    csr: &X509CertificationRequest<'_>,
    node_id: Uuid,
) -> Result<Node> {
    if let Some(Record::Node(node)) = store.read(Kind::Node, &node_id.to_string()).await? {
        return Ok(node);
    }

    let serial = csr
        .certification_request_info
        .subject
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .unwrap_or_default();
    if serial.is_empty() {
        return Err(Error::Unauthenticated("node not pre-approved".into()));
    }

    let matches = store.filter(Kind::Node, &[("serial", serial)]).await?;
    match matches.into_iter().next() {
        Some(Record::Node(node)) => Ok(node),
        _ => Err(Error::Unauthenticated("node not pre-approved".into())),
    }
}

/// Rebind the preapproved row to the key-derived id.
async fn bind_node_id(store: &Store, node: Node, node_id: Uuid) -> Result<()> {
    let old_id = node.id.clone();
    let mut bound = node;
    bound.id = node_id.to_string();
    store.delete(Kind::Node, &old_id).await?;
    store.create(Record::Node(bound)).await?;
    tracing::debug!(%old_id, %node_id, "bound enrollment identity to preapproved node");
    Ok(())
}
