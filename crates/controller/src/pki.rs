//! The self-signed root certificate authority.
//!
//! The controller owns one root CA and uses it to issue leaf
//! certificates for its own TLS endpoints and for enrolled nodes. The
//! CA never sees a node's private key; nodes submit CSRs and receive
//! signed certificates back.

use std::fs;
use std::path::{Path, PathBuf};

use rcgen::{
    BasicConstraints, CertificateParams, CertificateSigningRequestParams, DistinguishedName,
    DnType, DnValue, ExtendedKeyUsagePurpose, IsCa, Issuer, KeyPair, KeyUsagePurpose,
    PublicKeyData, SerialNumber, PKCS_ECDSA_P384_SHA384,
};
use rustls::pki_types::CertificateSigningRequestDer;
use x509_parser::prelude::*;

/// Subject organization of the self-signed root certificate.
pub const CA_ORGANIZATION: &str = "Controller Authority";

const KEY_FILE: &str = "key.pem";
const CERT_FILE: &str = "cert.pem";
const CA_VALIDITY_DAYS: i64 = 3 * 365;

/// PKI failures, categorized so callers can decide to abort or retry.
#[derive(Debug, thiserror::Error)]
pub enum PkiError {
    /// Filesystem access to the certificates directory failed.
    #[error("certificate store io error: {0}")]
    Io(#[from] std::io::Error),
    /// A stored or submitted key could not be parsed.
    #[error("unable to parse key: {0}")]
    ParseKey(String),
    /// A stored certificate could not be parsed.
    #[error("unable to parse certificate: {0}")]
    ParseCertificate(String),
    /// A submitted CSR could not be parsed.
    #[error("unable to parse CSR: {0}")]
    ParseCsr(String),
    /// Key or certificate generation failed.
    #[error("unable to generate certificate: {0}")]
    Generate(String),
    /// Signing a certificate failed.
    #[error("unable to sign certificate: {0}")]
    Sign(String),
    /// The stored certificate does not belong to the stored key and
    /// could not be reconciled within one retry.
    #[error("CA certificate does not match CA key after re-initialization")]
    KeyMismatch,
}

/// A leaf certificate plus the private key it was issued for, both PEM.
#[derive(Debug, Clone)]
pub struct IssuedCert {
    /// PEM-encoded certificate.
    pub cert_pem: String,
    /// PEM-encoded PKCS#8 private key.
    pub key_pem: String,
}

/// The root CA: key and certificate, persisted under the certs dir.
pub struct RootCa {
    key_pem: String,
    cert_pem: String,
    not_after: ::time::OffsetDateTime,
}

impl RootCa {
    /// Load the CA from `certs_dir`, generating key and certificate as
    /// needed. If the stored certificate was not issued for the stored
    /// key, the certificate is removed and regenerated once.
    pub fn init(certs_dir: &Path) -> Result<Self, PkiError> {
        fs::create_dir_all(certs_dir)?;
        set_mode(certs_dir, 0o700)?;

        let key_file = certs_dir.join(KEY_FILE);
        let key_pem = match fs::read_to_string(&key_file) {
            Ok(pem) => {
                KeyPair::from_pem(&pem).map_err(|err| PkiError::ParseKey(err.to_string()))?;
                pem
            }
            Err(_) => {
                let key = KeyPair::generate_for(&PKCS_ECDSA_P384_SHA384)
                    .map_err(|err| PkiError::Generate(err.to_string()))?;
                let pem = key.serialize_pem();
                write_private(&key_file, &pem)?;
                tracing::debug!(path = %key_file.display(), "generated and stored CA key");
                pem
            }
        };

        let cert_file = certs_dir.join(CERT_FILE);
        for _ in 0..2 {
            let cert_pem = match fs::read_to_string(&cert_file) {
                Ok(pem) => pem,
                Err(_) => {
                    let pem = generate_root_cert(&key_pem)?;
                    write_private(&cert_file, &pem)?;
                    tracing::debug!(
                        path = %cert_file.display(),
                        "generated and stored CA certificate"
                    );
                    pem
                }
            };

            // The certificate must have been issued for the stored key;
            // a mismatch means one of the two was replaced out of band.
            let key = KeyPair::from_pem(&key_pem)
                .map_err(|err| PkiError::ParseKey(err.to_string()))?;
            let der = decode_pem(&cert_pem)?;
            let (_, cert) = X509Certificate::from_der(&der)
                .map_err(|err| PkiError::ParseCertificate(err.to_string()))?;
            if cert.public_key().raw != key.subject_public_key_info() {
                fs::remove_file(&cert_file)?;
                continue;
            }

            let not_after = ::time::OffsetDateTime::from_unix_timestamp(
                cert.validity().not_after.timestamp(),
            )
            .map_err(|err| PkiError::ParseCertificate(err.to_string()))?;

            return Ok(Self {
                key_pem,
                cert_pem,
                not_after,
            });
        }

        Err(PkiError::KeyMismatch)
    }

    /// The CA certificate, PEM-encoded.
    pub fn cert_pem(&self) -> &str {
        &self.cert_pem
    }

    /// The CA chain. The root is the issuing CA with no intermediates,
    /// so the chain is the root alone.
    pub fn ca_chain(&self) -> Vec<String> {
        vec![self.cert_pem.clone()]
    }

    /// Expiry of the root certificate; every issued leaf expires with it.
    pub fn not_after(&self) -> ::time::OffsetDateTime {
        self.not_after
    }

    /// Sign an ASN.1 DER encoded certificate signing request, issuing a
    /// certificate with the caller-supplied subject CN and the CSR's
    /// public key, valid until the CA expires.
    pub fn sign_csr(&self, csr_der: &[u8], subject_cn: &str) -> Result<String, PkiError> {
        let der = CertificateSigningRequestDer::from(csr_der.to_vec());
        let mut csr = CertificateSigningRequestParams::from_der(&der)
            .map_err(|err| PkiError::ParseCsr(err.to_string()))?;

        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, DnValue::Utf8String(subject_cn.to_string()));
        csr.params.distinguished_name = dn;
        csr.params.is_ca = IsCa::NoCa;
        csr.params.serial_number = Some(random_serial());
        csr.params.key_usages = vec![KeyUsagePurpose::DigitalSignature];
        csr.params.extended_key_usages = vec![
            ExtendedKeyUsagePurpose::ClientAuth,
            ExtendedKeyUsagePurpose::ServerAuth,
        ];
        csr.params.not_before = ::time::OffsetDateTime::now_utc();
        csr.params.not_after = self.not_after;

        let ca_key = self.load_key()?;
        let issuer = Issuer::from_ca_cert_pem(&self.cert_pem, &ca_key)
            .map_err(|err| PkiError::ParseCertificate(err.to_string()))?;
        let cert = csr
            .signed_by(&issuer)
            .map_err(|err| PkiError::Sign(err.to_string()))?;
        Ok(cert.pem())
    }

    /// Issue a TLS server certificate for one of the controller's own
    /// listeners, with CN and SAN set to the server name.
    pub fn new_tls_server_cert(&self, sni: &str) -> Result<IssuedCert, PkiError> {
        self.new_tls_cert(sni, ExtendedKeyUsagePurpose::ServerAuth)
    }

    /// Issue a TLS client certificate for controller-side outbound
    /// connections.
    pub fn new_tls_client_cert(&self, sni: &str) -> Result<IssuedCert, PkiError> {
        self.new_tls_cert(sni, ExtendedKeyUsagePurpose::ClientAuth)
    }

    fn new_tls_cert(
        &self,
        sni: &str,
        usage: ExtendedKeyUsagePurpose,
    ) -> Result<IssuedCert, PkiError> {
        let key = KeyPair::generate_for(&PKCS_ECDSA_P384_SHA384)
            .map_err(|err| PkiError::Generate(err.to_string()))?;

        let mut params = CertificateParams::new(vec![sni.to_string()])
            .map_err(|err| PkiError::Generate(err.to_string()))?;
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, DnValue::Utf8String(sni.to_string()));
        params.distinguished_name = dn;
        params.is_ca = IsCa::NoCa;
        params.serial_number = Some(random_serial());
        params.key_usages = vec![KeyUsagePurpose::DigitalSignature];
        params.extended_key_usages = vec![usage];
        params.not_before = ::time::OffsetDateTime::now_utc();
        params.not_after = self.not_after;

        let ca_key = self.load_key()?;
        let issuer = Issuer::from_ca_cert_pem(&self.cert_pem, &ca_key)
            .map_err(|err| PkiError::ParseCertificate(err.to_string()))?;
        let cert = params
            .signed_by(&key, &issuer)
            .map_err(|err| PkiError::Sign(err.to_string()))?;

        Ok(IssuedCert {
            cert_pem: cert.pem(),
            key_pem: key.serialize_pem(),
        })
    }

    fn load_key(&self) -> Result<KeyPair, PkiError> {
        KeyPair::from_pem(&self.key_pem).map_err(|err| PkiError::ParseKey(err.to_string()))
    }
}

/// Decode a single PEM block into its DER bytes.
pub fn decode_pem(pem_data: &str) -> Result<Vec<u8>, PkiError> {
    let block = ::pem::parse(pem_data.as_bytes())
        .map_err(|err| PkiError::ParseCertificate(err.to_string()))?;
    Ok(block.contents().to_vec())
}

fn generate_root_cert(key_pem: &str) -> Result<String, PkiError> {
    let key = KeyPair::from_pem(key_pem).map_err(|err| PkiError::ParseKey(err.to_string()))?;

    let mut params = CertificateParams::default();
    let mut dn = DistinguishedName::new();
    dn.push(
        DnType::OrganizationName,
        DnValue::Utf8String(CA_ORGANIZATION.to_string()),
    );
    params.distinguished_name = dn;
    params.is_ca = IsCa::Ca(BasicConstraints::Constrained(0));
    params.key_usages = vec![KeyUsagePurpose::KeyCertSign];
    params.extended_key_usages = vec![ExtendedKeyUsagePurpose::Any];
    params.serial_number = Some(random_serial());
    // Backdated slightly so freshly issued certs validate on hosts with
    // minor clock skew.
    params.not_before = ::time::OffsetDateTime::now_utc() - ::time::Duration::seconds(15);
    params.not_after = ::time::OffsetDateTime::now_utc() + ::time::Duration::days(CA_VALIDITY_DAYS);

    let cert = params
        .self_signed(&key)
        .map_err(|err| PkiError::Generate(err.to_string()))?;
    Ok(cert.pem())
}

/// A positive 63-bit serial from the process CSPRNG.
fn random_serial() -> SerialNumber {
    SerialNumber::from(rand::random::<u64>() >> 1)
}

fn write_private(path: &PathBuf, contents: &str) -> Result<(), PkiError> {
    fs::write(path, contents)?;
    set_mode(path, 0o600)?;
    Ok(())
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> Result<(), PkiError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> Result<(), PkiError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_csr() -> (KeyPair, Vec<u8>) {
        let key = KeyPair::generate_for(&PKCS_ECDSA_P384_SHA384).expect("node key");
        let mut params = CertificateParams::default();
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, DnValue::Utf8String("abc123".into()));
        params.distinguished_name = dn;
        let csr = params.serialize_request(&key).expect("csr");
        (key, csr.der().to_vec())
    }

    #[test]
    fn init_generates_and_reloads_the_same_ca() {
        let dir = tempfile::tempdir().expect("tempdir");
        let first = RootCa::init(dir.path()).expect("init");
        let second = RootCa::init(dir.path()).expect("reload");
        assert_eq!(first.cert_pem(), second.cert_pem());
        assert!(dir.path().join("key.pem").exists());
        assert!(dir.path().join("cert.pem").exists());
    }

    #[cfg(unix)]
    #[test]
    fn key_material_is_not_group_readable() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().expect("tempdir");
        RootCa::init(dir.path()).expect("init");
        let mode = |name: &str| {
            std::fs::metadata(dir.path().join(name))
                .expect("metadata")
                .permissions()
                .mode()
                & 0o777
        };
        assert_eq!(mode("key.pem"), 0o600);
        assert_eq!(mode("cert.pem"), 0o600);
        assert_eq!(
            std::fs::metadata(dir.path()).unwrap().permissions().mode() & 0o777,
            0o700
        );
    }

    #[test]
    fn mismatched_cert_is_replaced_once() {
        let dir = tempfile::tempdir().expect("tempdir");
        let original = RootCa::init(dir.path()).expect("init");

        // Replace the stored certificate with one for a different key.
        let other = tempfile::tempdir().expect("tempdir");
        let foreign = RootCa::init(other.path()).expect("foreign ca");
        std::fs::write(dir.path().join("cert.pem"), foreign.cert_pem()).expect("overwrite");

        let recovered = RootCa::init(dir.path()).expect("re-init");
        assert_ne!(recovered.cert_pem(), foreign.cert_pem());
        assert_ne!(recovered.cert_pem(), original.cert_pem());

        // The regenerated cert belongs to the original key.
        let key = KeyPair::from_pem(&recovered.key_pem).expect("key");
        let der = decode_pem(recovered.cert_pem()).expect("der");
        let (_, cert) = X509Certificate::from_der(&der).expect("cert");
        assert_eq!(cert.public_key().raw, key.public_key_der());
    }

    #[test]
    fn root_cert_has_ca_profile() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ca = RootCa::init(dir.path()).expect("init");
        let der = decode_pem(ca.cert_pem()).expect("der");
        let (_, cert) = X509Certificate::from_der(&der).expect("cert");

        assert!(cert.is_ca());
        let org = cert
            .subject()
            .iter_organization()
            .next()
            .and_then(|o| o.as_str().ok())
            .unwrap_or_default();
        assert_eq!(org, CA_ORGANIZATION);

        let bc = cert
            .basic_constraints()
            .expect("basic constraints")
            .expect("present");
        assert_eq!(bc.value.path_len_constraint, Some(0));
    }

    #[test]
    fn signed_csr_carries_subject_cn_and_csr_key() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ca = RootCa::init(dir.path()).expect("init");
        let (node_key, csr_der) = new_csr();

        let cert_pem = ca
            .sign_csr(&csr_der, "ef51be63-e397-4e45-a2e7-ecb5c7c752ef")
            .expect("sign");
        let der = decode_pem(&cert_pem).expect("der");
        let (_, cert) = X509Certificate::from_der(&der).expect("cert");

        let cn = cert
            .subject()
            .iter_common_name()
            .next()
            .and_then(|cn| cn.as_str().ok())
            .unwrap_or_default();
        assert_eq!(cn, "ef51be63-e397-4e45-a2e7-ecb5c7c752ef");
        assert_eq!(cert.public_key().raw, node_key.public_key_der());

        // Signed by the CA and valid until the CA expires.
        let ca_der = decode_pem(ca.cert_pem()).expect("ca der");
        let (_, ca_cert) = X509Certificate::from_der(&ca_der).expect("ca cert");
        cert.verify_signature(Some(ca_cert.public_key()))
            .expect("chain verification");
        assert_eq!(
            cert.validity().not_after.timestamp(),
            ca_cert.validity().not_after.timestamp()
        );
    }

    #[test]
    fn garbage_csr_is_a_parse_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ca = RootCa::init(dir.path()).expect("init");
        let err = ca.sign_csr(b"not a csr", "cn").expect_err("must fail");
        assert!(matches!(err, PkiError::ParseCsr(_)));
    }

    #[test]
    fn server_and_client_leaves_get_distinct_usages() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ca = RootCa::init(dir.path()).expect("init");

        let server = ca.new_tls_server_cert("controller.openness").expect("server");
        let der = decode_pem(&server.cert_pem).expect("der");
        let (_, cert) = X509Certificate::from_der(&der).expect("cert");
        let eku = cert.extended_key_usage().expect("eku").expect("present");
        assert!(eku.value.server_auth);
        assert!(!eku.value.client_auth);

        let client = ca.new_tls_client_cert("controller.openness").expect("client");
        let der = decode_pem(&client.cert_pem).expect("der");
        let (_, cert) = X509Certificate::from_der(&der).expect("cert");
        let eku = cert.extended_key_usage().expect("eku").expect("present");
        assert!(eku.value.client_auth);
    }
}
