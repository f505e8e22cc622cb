//! DKIM signing of outbound messages.
//!
//! Signatures are produced by `mail-auth` with `rsa-sha256` and
//! `relaxed/relaxed` canonicalization, and the `DKIM-Signature` header is
//! prepended to the message. Line endings are normalised to CRLF first so
//! the signature covers exactly the bytes that are transmitted. Header
//! bytes are signed as they are, 8-bit or not.

use std::{fs, path::PathBuf};

use mail_auth::{
    common::{
        crypto::{RsaKey, Sha256},
        headers::HeaderWriter,
    },
    dkim::{Canonicalization, DkimSigner as Signer, Done},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum SigningError {
    #[error("Failed to read signing key {path}: {reason}")]
    KeyLoad { path: String, reason: String },

    #[error("Failed to parse signing key: {0}")]
    KeyParse(String),

    #[error("Message has no From header")]
    MissingFrom,

    #[error("DKIM signing failed: {0}")]
    Sign(String),
}

/// Hash used for the signature and the body hash.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
pub enum HashAlgorithm {
    #[default]
    Sha256,
}

/// The `dkim` section of the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct DkimConfig {
    /// Signing domain (`d=`).
    #[serde(default = "defaults::domain")]
    pub domain: String,

    /// Selector (`s=`), locating the public key under `_domainkey`.
    #[serde(default = "defaults::selector")]
    pub selector: String,

    /// PEM encoded RSA private key, PKCS#8 or PKCS#1.
    #[serde(default = "defaults::key")]
    pub key: PathBuf,

    #[serde(default)]
    pub hash: HashAlgorithm,

    /// Header fields to sign, when present. `From` is always signed.
    #[serde(default = "defaults::headers")]
    pub headers: Vec<String>,
}

impl Default for DkimConfig {
    fn default() -> Self {
        Self {
            domain: defaults::domain(),
            selector: defaults::selector(),
            key: defaults::key(),
            hash: HashAlgorithm::default(),
            headers: defaults::headers(),
        }
    }
}

mod defaults {
    use std::path::PathBuf;

    pub fn domain() -> String {
        String::from("custom-server.com")
    }

    pub fn selector() -> String {
        String::from("default")
    }

    pub fn key() -> PathBuf {
        PathBuf::from("./private_key.pem")
    }

    pub fn headers() -> Vec<String> {
        [
            "From",
            "Reply-To",
            "Subject",
            "Date",
            "To",
            "Cc",
            "Message-ID",
            "In-Reply-To",
            "References",
            "MIME-Version",
            "Content-Type",
            "Content-Transfer-Encoding",
        ]
        .into_iter()
        .map(String::from)
        .collect()
    }
}

/// Produces the signed form of a raw message.
///
/// Implementations are stateless with respect to the message: every call
/// signs from scratch.
pub trait MessageSigner: Send + Sync {
    /// # Errors
    ///
    /// Returns an error if the message can't be signed.
    fn sign(&self, message: &[u8]) -> Result<Vec<u8>, SigningError>;
}

/// RSA DKIM signer. The key is loaded once and never changes.
pub struct DkimSigner {
    domain: String,
    selector: String,
    hash: HashAlgorithm,
    signer: Signer<RsaKey<Sha256>, Done>,
}

impl std::fmt::Debug for DkimSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DkimSigner")
            .field("domain", &self.domain)
            .field("selector", &self.selector)
            .field("hash", &self.hash)
            .finish_non_exhaustive()
    }
}

impl DkimSigner {
    /// Build a signer from a PEM encoded key.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is neither PKCS#8 nor PKCS#1 RSA.
    pub fn new(config: &DkimConfig, key_pem: &str) -> Result<Self, SigningError> {
        let key = match config.hash {
            HashAlgorithm::Sha256 => RsaKey::<Sha256>::from_pkcs8_pem(key_pem)
                .or_else(|_| RsaKey::<Sha256>::from_rsa_pem(key_pem))
                .map_err(|e| SigningError::KeyParse(e.to_string()))?,
        };

        let signer = Signer::from_key(key)
            .domain(&config.domain)
            .selector(&config.selector)
            .headers(signed_headers(&config.headers))
            .header_canonicalization(Canonicalization::Relaxed)
            .body_canonicalization(Canonicalization::Relaxed);

        debug!(
            "DKIM signer initialised for domain {}, selector {}",
            config.domain, config.selector
        );

        Ok(Self {
            domain: config.domain.clone(),
            selector: config.selector.clone(),
            hash: config.hash,
            signer,
        })
    }

    /// Build a signer from the key file named in `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the key file can't be read or parsed.
    pub fn from_config(config: &DkimConfig) -> Result<Self, SigningError> {
        let pem = fs::read_to_string(&config.key).map_err(|e| SigningError::KeyLoad {
            path: config.key.display().to_string(),
            reason: e.to_string(),
        })?;

        Self::new(config, &pem)
    }
}

impl MessageSigner for DkimSigner {
    fn sign(&self, message: &[u8]) -> Result<Vec<u8>, SigningError> {
        let message = normalise_line_endings(message);

        if !has_from(&message) {
            return Err(SigningError::MissingFrom);
        }

        let signature = self
            .signer
            .sign(&message)
            .map_err(|e| SigningError::Sign(e.to_string()))?;

        let mut signed = signature.to_header().into_bytes();
        signed.extend_from_slice(&message);

        Ok(signed)
    }
}

/// The configured header names, with `From` first when it isn't listed.
fn signed_headers(configured: &[String]) -> Vec<String> {
    let mut headers = configured.to_vec();

    if !headers.iter().any(|name| name.eq_ignore_ascii_case("From")) {
        headers.insert(0, String::from("From"));
    }

    headers
}

fn normalise_line_endings(message: &[u8]) -> Vec<u8> {
    let mut normalised = Vec::with_capacity(message.len() + message.len() / 32);
    let mut previous = 0u8;

    for &byte in message {
        if byte == b'\n' && previous != b'\r' {
            normalised.push(b'\r');
        }
        normalised.push(byte);
        previous = byte;
    }

    normalised
}

/// Whether the header block has a `From` field. Expects CRLF line endings.
fn has_from(message: &[u8]) -> bool {
    message
        .split(|&byte| byte == b'\n')
        .take_while(|line| *line != b"\r" && !line.is_empty())
        .any(|line| {
            line.get(..4).is_some_and(|name| name.eq_ignore_ascii_case(b"from"))
                && line[4..].trim_ascii_start().starts_with(b":")
        })
}
