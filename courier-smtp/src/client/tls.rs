use std::sync::Arc;

use courier_common::{
    config::{TlsConfig, TlsIdentity},
    internal,
};
use tokio::net::TcpStream;
use tokio_rustls::{
    TlsConnector,
    client::TlsStream,
    rustls::{
        ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme,
        client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
        pki_types::{CertificateDer, ServerName, UnixTime},
        version::{TLS12, TLS13},
    },
};

use super::error::{ClientError, Result};

/// Client side TLS settings, built once and shared by every outbound
/// connection.
///
/// TLS 1.2 is the minimum protocol version. Trust anchors come from the
/// platform's certificate store, and the peer is verified against the name
/// it was dialled by.
#[derive(Clone)]
pub struct ClientTls {
    config: Arc<ClientConfig>,
}

impl std::fmt::Debug for ClientTls {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientTls").finish_non_exhaustive()
    }
}

impl ClientTls {
    /// Build the shared client configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the identity is rejected by rustls.
    pub fn new(accept_invalid_certs: bool, identity: Option<TlsIdentity>) -> Result<Self> {
        let builder = ClientConfig::builder_with_protocol_versions(&[&TLS13, &TLS12])
            .with_root_certificates(native_roots());

        let mut config = match identity {
            Some(TlsIdentity { chain, key }) => builder.with_client_auth_cert(chain, key)?,
            None => builder.with_no_client_auth(),
        };

        if accept_invalid_certs {
            tracing::warn!(
                "SECURITY WARNING: TLS certificate validation is disabled for outbound connections"
            );
            config
                .dangerous()
                .set_certificate_verifier(Arc::new(NoVerifier));
        }

        Ok(Self {
            config: Arc::new(config),
        })
    }

    /// Build from configuration, loading the identity it names.
    ///
    /// # Errors
    ///
    /// Returns an error if the identity can't be loaded or is rejected.
    pub fn from_config(config: &TlsConfig) -> Result<Self> {
        Self::new(config.accept_invalid_certs, config.load_identity()?)
    }

    pub(crate) async fn handshake(
        &self,
        stream: TcpStream,
        server_name: &str,
    ) -> Result<TlsStream<TcpStream>> {
        let name = ServerName::try_from(server_name.to_string())
            .map_err(|e| ClientError::TlsError(format!("Invalid server name: {e}")))?;

        TlsConnector::from(Arc::clone(&self.config))
            .connect(name, stream)
            .await
            .map_err(|e| ClientError::TlsError(e.to_string()))
    }
}

fn native_roots() -> RootCertStore {
    let mut roots = RootCertStore::empty();
    let native = rustls_native_certs::load_native_certs();

    if !native.errors.is_empty() {
        tracing::warn!(errors = ?native.errors, "Some certificates could not be loaded");
    }

    let (added, ignored) = roots.add_parsable_certificates(native.certs);
    internal!("Loaded {added} trust anchors ({ignored} ignored)");

    roots
}

/// Accepts every certificate. Only installed when explicitly configured.
#[derive(Debug)]
struct NoVerifier;

impl ServerCertVerifier for NoVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, tokio_rustls::rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, tokio_rustls::rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, tokio_rustls::rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::ED25519,
        ]
    }
}
