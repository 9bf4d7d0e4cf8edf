//! Certificate material for the HTTPS server.
//!
//! [`create_certificate`] issues a throw-away certificate authority and a
//! server certificate signed by it. Tests trust the authority through
//! [`TestServer::ca_cert`](crate::TestServer::ca_cert).

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::Arc;

use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose,
    IsCa, KeyPair, KeyUsagePurpose, SanType,
};
use rustls::ServerConfig;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use time::{Duration, OffsetDateTime};
use tokio_rustls::TlsAcceptor;
use tracing::debug;

/// Default validity of issued certificates, in days.
pub const DEFAULT_CERTIFICATE_DAYS: u32 = 365;

/// Default common name of issued certificates.
pub const DEFAULT_COMMON_NAME: &str = "localhost";

const CA_COMMON_NAME: &str = "fixture-server CA";

/// Parameters of an issued certificate.
///
/// Unset fields fall back to [`DEFAULT_CERTIFICATE_DAYS`] and
/// [`DEFAULT_COMMON_NAME`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CertificateOptions {
    /// Validity of the certificate, in days.
    pub days: Option<u32>,
    /// Common name of the server certificate, also added as a DNS name.
    pub common_name: Option<String>,
}

impl CertificateOptions {
    /// Set the validity, in days.
    #[must_use]
    pub fn with_days(mut self, days: u32) -> Self {
        self.days = Some(days);
        self
    }

    /// Set the common name.
    #[must_use]
    pub fn with_common_name(mut self, common_name: impl Into<String>) -> Self {
        self.common_name = Some(common_name.into());
        self
    }

    fn days(&self) -> u32 {
        self.days.unwrap_or(DEFAULT_CERTIFICATE_DAYS)
    }

    fn common_name(&self) -> &str {
        self.common_name.as_deref().unwrap_or(DEFAULT_COMMON_NAME)
    }
}

/// PEM encoded key material of the HTTPS server.
#[derive(Clone, PartialEq, Eq, derive_more::Debug)]
pub struct CertificateMaterial {
    /// The server private key.
    #[debug("<redacted>")]
    pub key: String,
    /// The server certificate.
    pub cert: String,
    /// The certificate of the authority that signed [`cert`](Self::cert).
    pub ca_cert: String,
}

/// Errors raised while issuing or loading certificate material.
#[derive(Debug, derive_more::Error, derive_more::Display, derive_more::From)]
pub enum CertificateError {
    /// Key or certificate generation failed.
    #[display("Failed to generate certificate: {_0}")]
    GenerationError(rcgen::Error),

    /// The PEM material could not be read.
    #[display("Invalid PEM material: {_0}")]
    PemError(std::io::Error),

    /// The TLS configuration rejected the material.
    #[display("Invalid TLS configuration: {_0}")]
    TlsError(rustls::Error),

    /// The PEM key material holds no private key.
    #[from(ignore)]
    #[display("No private key found in the key material")]
    MissingPrivateKey,

    /// The generation task ended abnormally.
    #[display("Certificate task failed: {_0}")]
    TaskError(tokio::task::JoinError),
}

/// Issue a certificate authority and a server certificate signed by it.
///
/// The server certificate is valid for the common name, `localhost`,
/// `127.0.0.1` and `::1`. Key generation runs on the blocking thread pool.
///
/// # Errors
///
/// Fails if a key or a certificate cannot be generated.
///
/// # Example
///
/// ```rust
/// use fixture_server::{CertificateOptions, create_certificate};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), fixture_server::CertificateError> {
/// let options = CertificateOptions::default().with_common_name("foo.bar");
/// let material = create_certificate(options).await?;
/// assert!(material.ca_cert.starts_with("-----BEGIN CERTIFICATE-----"));
/// # Ok(())
/// # }
/// ```
pub async fn create_certificate(
    options: CertificateOptions,
) -> Result<CertificateMaterial, CertificateError> {
    tokio::task::spawn_blocking(move || issue(&options)).await?
}

fn issue(options: &CertificateOptions) -> Result<CertificateMaterial, CertificateError> {
    let common_name = options.common_name();
    let not_before = OffsetDateTime::now_utc() - Duration::days(1);
    let not_after = OffsetDateTime::now_utc() + Duration::days(i64::from(options.days()));

    let ca_key = KeyPair::generate()?;
    let mut ca_params = CertificateParams::default();
    ca_params.distinguished_name = distinguished_name(CA_COMMON_NAME);
    ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    ca_params.key_usages = vec![
        KeyUsagePurpose::KeyCertSign,
        KeyUsagePurpose::CrlSign,
        KeyUsagePurpose::DigitalSignature,
    ];
    ca_params.not_before = not_before;
    ca_params.not_after = not_after;
    let ca_cert = ca_params.self_signed(&ca_key)?;

    let mut dns_names = vec![common_name.to_owned()];
    if common_name != DEFAULT_COMMON_NAME {
        dns_names.push(DEFAULT_COMMON_NAME.to_owned());
    }
    let server_key = KeyPair::generate()?;
    let mut server_params = CertificateParams::new(dns_names)?;
    server_params
        .subject_alt_names
        .push(SanType::IpAddress(IpAddr::V4(Ipv4Addr::LOCALHOST)));
    server_params
        .subject_alt_names
        .push(SanType::IpAddress(IpAddr::V6(Ipv6Addr::LOCALHOST)));
    server_params.distinguished_name = distinguished_name(common_name);
    server_params.key_usages = vec![
        KeyUsagePurpose::DigitalSignature,
        KeyUsagePurpose::KeyEncipherment,
    ];
    server_params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
    server_params.use_authority_key_identifier_extension = true;
    server_params.not_before = not_before;
    server_params.not_after = not_after;
    let server_cert = server_params.signed_by(&server_key, &ca_cert, &ca_key)?;

    debug!(common_name, days = options.days(), "certificate issued");
    Ok(CertificateMaterial {
        key: server_key.serialize_pem(),
        cert: server_cert.pem(),
        ca_cert: ca_cert.pem(),
    })
}

fn distinguished_name(common_name: &str) -> DistinguishedName {
    let mut name = DistinguishedName::new();
    name.push(DnType::CommonName, common_name);
    name
}

/// Build the TLS acceptor of the HTTPS server from PEM material.
pub(crate) fn tls_acceptor(
    material: &CertificateMaterial,
) -> Result<TlsAcceptor, CertificateError> {
    let certs = rustls_pemfile::certs(&mut material.cert.as_bytes())
        .collect::<Result<Vec<CertificateDer<'static>>, _>>()?;
    let key: PrivateKeyDer<'static> = rustls_pemfile::private_key(&mut material.key.as_bytes())?
        .ok_or(CertificateError::MissingPrivateKey)?;

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let mut config = ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()?
        .with_no_client_auth()
        .with_single_cert(certs, key)?;
    config.alpn_protocols = vec![b"http/1.1".to_vec()];

    Ok(TlsAcceptor::from(Arc::new(config)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_apply_defaults() {
        let options = CertificateOptions::default();

        assert_eq!(options.days(), DEFAULT_CERTIFICATE_DAYS);
        assert_eq!(options.common_name(), DEFAULT_COMMON_NAME);
    }

    #[test]
    fn should_override_defaults() {
        let options = CertificateOptions::default()
            .with_days(2)
            .with_common_name("foo.bar");

        assert_eq!(options.days(), 2);
        assert_eq!(options.common_name(), "foo.bar");
    }

    #[tokio::test]
    async fn should_issue_pem_material() -> anyhow::Result<()> {
        let material = create_certificate(CertificateOptions::default()).await?;

        assert!(material.key.contains("PRIVATE KEY"));
        assert!(material.cert.starts_with("-----BEGIN CERTIFICATE-----"));
        assert!(material.ca_cert.starts_with("-----BEGIN CERTIFICATE-----"));
        assert_ne!(material.cert, material.ca_cert);
        Ok(())
    }

    #[tokio::test]
    async fn should_build_tls_acceptor() -> anyhow::Result<()> {
        let material =
            create_certificate(CertificateOptions::default().with_common_name("foo.bar")).await?;

        let acceptor = tls_acceptor(&material);

        assert!(acceptor.is_ok());
        Ok(())
    }

    #[test]
    fn should_reject_material_without_key() {
        let material = CertificateMaterial {
            key: String::new(),
            cert: String::new(),
            ca_cert: String::new(),
        };

        let result = tls_acceptor(&material);

        assert!(matches!(result, Err(CertificateError::MissingPrivateKey)));
    }

    #[test]
    fn should_redact_private_key() {
        let material = CertificateMaterial {
            key: "secret".to_owned(),
            cert: "cert".to_owned(),
            ca_cert: "ca".to_owned(),
        };

        let debug = format!("{material:?}");

        assert!(!debug.contains("secret"));
        assert!(debug.contains("<redacted>"));
    }
}
