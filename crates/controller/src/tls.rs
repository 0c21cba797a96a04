//! The dual-profile TLS front end.
//!
//! One TCP listener terminates TLS for all gRPC traffic. The accepted
//! ClientHello is peeked before a config is committed, dispatching on
//! SNI: the enrollment name admits peers without a client certificate
//! (so nodes can obtain their first credentials), the authenticated
//! name requires and verifies a client certificate against the CA pool.
//! Any other server name fails the handshake.

use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use rustls::crypto::ring;
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::{RootCertStore, ServerConfig};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::LazyConfigAcceptor;
use tonic::transport::server::Connected;
use uuid::Uuid;
use x509_parser::prelude::*;

use crate::pki::{PkiError, RootCa};

/// Server name for post-enrollment, mutually-authenticated RPCs.
pub const SNI: &str = "controller.openness";

/// Server name for the pre-authentication enrollment service.
pub const ENROLLMENT_SNI: &str = "enroll.controller.openness";

/// Which TLS profile admitted the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsProfile {
    /// No client certificate; only enrollment RPCs are authorized.
    Enrollment,
    /// Client certificate verified against the CA pool.
    Authenticated,
}

/// Connection-level identity handed to gRPC handlers.
///
/// On the authenticated profile the peer certificate CN is the
/// authoritative node id for authorization decisions on the connection.
#[derive(Debug, Clone)]
pub struct PeerIdentity {
    /// The admitting profile.
    pub profile: TlsProfile,
    /// CN of the verified peer certificate, if any.
    pub common_name: Option<String>,
    /// The CN parsed as a node id, if it is one.
    pub node_id: Option<Uuid>,
    /// Remote socket address.
    pub remote_addr: Option<SocketAddr>,
}

/// Dual-SNI TLS acceptor for the gRPC listener.
#[derive(Clone)]
pub struct TlsFrontEnd {
    enrollment: Arc<ServerConfig>,
    authenticated: Arc<ServerConfig>,
}

impl TlsFrontEnd {
    /// Issue a fresh server certificate per profile from the CA and
    /// build both server configs.
    pub fn new(ca: &RootCa) -> anyhow::Result<Self> {
        let provider = Arc::new(pinned_provider());

        let mut roots = RootCertStore::empty();
        roots.add(CertificateDer::from(crate::pki::decode_pem(ca.cert_pem())?))?;

        let verifier = WebPkiClientVerifier::builder_with_provider(roots.into(), provider.clone())
            .build()
            .map_err(|err| anyhow::anyhow!("unable to build client verifier: {err}"))?;

        let (auth_chain, auth_key) = server_identity(ca, SNI)?;
        let mut authenticated = ServerConfig::builder_with_provider(provider.clone())
            .with_protocol_versions(rustls::ALL_VERSIONS)?
            .with_client_cert_verifier(verifier)
            .with_single_cert(auth_chain, auth_key)?;
        authenticated.alpn_protocols = vec![b"h2".to_vec()];

        let (enroll_chain, enroll_key) = server_identity(ca, ENROLLMENT_SNI)?;
        let mut enrollment = ServerConfig::builder_with_provider(provider)
            .with_protocol_versions(rustls::ALL_VERSIONS)?
            .with_no_client_auth()
            .with_single_cert(enroll_chain, enroll_key)?;
        enrollment.alpn_protocols = vec![b"h2".to_vec()];

        Ok(Self {
            enrollment: Arc::new(enrollment),
            authenticated: Arc::new(authenticated),
        })
    }

    /// Terminate TLS on an accepted connection, dispatching on SNI.
    pub async fn accept(&self, tcp: TcpStream) -> io::Result<AuthenticatedStream> {
        let remote_addr = tcp.peer_addr().ok();
        let start = LazyConfigAcceptor::new(rustls::server::Acceptor::default(), tcp).await?;

        let (profile, config) = match start.client_hello().server_name() {
            Some(ENROLLMENT_SNI) => (TlsProfile::Enrollment, self.enrollment.clone()),
            Some(SNI) => (TlsProfile::Authenticated, self.authenticated.clone()),
            other => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("unexpected server name: {}", other.unwrap_or("")),
                ));
            }
        };

        let stream = start.into_stream(config).await?;

        let common_name = match profile {
            TlsProfile::Authenticated => stream
                .get_ref()
                .1
                .peer_certificates()
                .and_then(|certs| certs.first())
                .and_then(|cert| peer_common_name(cert)),
            TlsProfile::Enrollment => None,
        };
        let node_id = common_name.as_deref().and_then(|cn| Uuid::try_parse(cn).ok());

        Ok(AuthenticatedStream {
            inner: stream,
            identity: PeerIdentity {
                profile,
                common_name,
                node_id,
                remote_addr,
            },
        })
    }
}

/// Provider restricted to the pinned ECDHE-ECDSA-AES128-GCM suite (plus
/// its TLS 1.3 analog, which rustls requires for a 1.3-capable config).
fn pinned_provider() -> rustls::crypto::CryptoProvider {
    let mut provider = ring::default_provider();
    provider.cipher_suites = vec![
        ring::cipher_suite::TLS13_AES_128_GCM_SHA256,
        ring::cipher_suite::TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256,
    ];
    provider
}

type ServerIdentity = (Vec<CertificateDer<'static>>, PrivateKeyDer<'static>);

fn server_identity(ca: &RootCa, sni: &str) -> Result<ServerIdentity, PkiError> {
    let issued = ca.new_tls_server_cert(sni)?;
    let chain = vec![
        CertificateDer::from(crate::pki::decode_pem(&issued.cert_pem)?),
        CertificateDer::from(crate::pki::decode_pem(ca.cert_pem())?),
    ];
    let key = PrivateKeyDer::from_pem_slice(issued.key_pem.as_bytes())
        .map_err(|err| PkiError::ParseKey(err.to_string()))?;
    Ok((chain, key))
}

fn peer_common_name(cert: &CertificateDer<'_>) -> Option<String> {
    let (_, parsed) = X509Certificate::from_der(cert.as_ref()).ok()?;
    let name = parsed
        .subject()
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .map(str::to_string);
    name
}

/// A terminated TLS stream carrying the peer identity into tonic.
pub struct AuthenticatedStream {
    inner: tokio_rustls::server::TlsStream<TcpStream>,
    identity: PeerIdentity,
}

impl Connected for AuthenticatedStream {
    type ConnectInfo = PeerIdentity;

    fn connect_info(&self) -> Self::ConnectInfo {
        self.identity.clone()
    }
}

impl AsyncRead for AuthenticatedStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for AuthenticatedStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}
