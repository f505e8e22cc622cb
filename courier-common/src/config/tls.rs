use std::{
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};

use crate::{error::TlsError, internal};

/// Outbound TLS settings used on every TLS-capable transport tier.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Skip verification of the destination's certificate chain and name.
    #[serde(default)]
    pub accept_invalid_certs: bool,

    /// Client identity presented during the handshake, if any.
    #[serde(default)]
    pub identity: Option<IdentitySource>,
}

/// Where the client identity comes from.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub enum IdentitySource {
    /// PEM encoded certificate chain and private key on disk.
    Pem { certificate: PathBuf, key: PathBuf },

    /// A certificate generated in memory at startup for the given names.
    SelfSigned { names: Vec<String> },
}

/// A loaded certificate chain with its private key.
#[derive(Debug)]
pub struct TlsIdentity {
    pub chain: Vec<CertificateDer<'static>>,
    pub key: PrivateKeyDer<'static>,
}

impl Clone for TlsIdentity {
    fn clone(&self) -> Self {
        Self {
            chain: self.chain.clone(),
            key: self.key.clone_key(),
        }
    }
}

impl TlsConfig {
    /// Load the configured identity, if there is one.
    ///
    /// # Errors
    ///
    /// Returns an error when the certificate or key can't be read, or the
    /// self-signed identity can't be generated.
    pub fn load_identity(&self) -> Result<Option<TlsIdentity>, TlsError> {
        self.identity.as_ref().map(IdentitySource::load).transpose()
    }
}

impl IdentitySource {
    /// Produce the certificate chain and key described by this source.
    ///
    /// # Errors
    ///
    /// See [`TlsConfig::load_identity`].
    pub fn load(&self) -> Result<TlsIdentity, TlsError> {
        match self {
            Self::Pem { certificate, key } => Ok(TlsIdentity {
                chain: load_certs(certificate)?,
                key: load_key(key)?,
            }),
            Self::SelfSigned { names } => {
                internal!(level = DEBUG, "Generating self-signed identity for {names:?}");
                let generated = rcgen::generate_simple_self_signed(names.clone())?;

                Ok(TlsIdentity {
                    chain: vec![generated.cert.der().clone()],
                    key: PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(
                        generated.key_pair.serialize_der(),
                    )),
                })
            }
        }
    }
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    let display = path.display().to_string();
    let file = File::open(path).map_err(|source| TlsError::CertificateLoad {
        path: display.clone(),
        source,
    })?;

    let chain = rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|source| TlsError::CertificateLoad {
            path: display.clone(),
            source,
        })?;

    if chain.is_empty() {
        return Err(TlsError::NoCertificates(display));
    }

    Ok(chain)
}

fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>, TlsError> {
    let display = path.display().to_string();
    let file = File::open(path).map_err(|e| TlsError::KeyLoad {
        path: display.clone(),
        reason: e.to_string(),
    })?;

    rustls_pemfile::private_key(&mut BufReader::new(file))
        .map_err(|e| TlsError::KeyLoad {
            path: display.clone(),
            reason: e.to_string(),
        })?
        .ok_or_else(|| TlsError::KeyLoad {
            path: display,
            reason: "Unable to determine key file format (expected PKCS1, PKCS8, or SEC1)"
                .to_string(),
        })
}
